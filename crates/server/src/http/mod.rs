//! HTTP adapter
//!
//! `POST /connector/api` forwards raw request bytes to the device and
//! returns its response. `GET /connector/status` reports reachability as a
//! `key=value` block. Device calls run on the blocking pool.

pub mod handlers;
pub mod middleware;
mod server;

pub use handlers::status_body;
pub use middleware::{CorrelationId, HostAllowlist, extract_host};
pub use server::{AppState, create_router, run, shutdown_signal};
