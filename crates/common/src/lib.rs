//! Common utilities for hsm-connector
//!
//! This crate provides the pieces shared between the device core and the
//! daemon: the error type, logging setup, device serial canonicalization
//! and correlation id generation.

pub mod correlation;
pub mod error;
pub mod logging;
pub mod serial;

pub use correlation::new_correlation_id;
pub use error::{Error, Result};
pub use logging::{LogFormat, setup_logging};
pub use serial::Serial;
