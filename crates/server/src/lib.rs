//! hsm-connector daemon
//!
//! Exposes the USB HSM over a local HTTP API. The binary in `main.rs` wires
//! configuration, logging and service notifications around [`http::run`].

pub mod config;
pub mod http;
pub mod service;

pub use config::ConnectorConfig;
