//! Device core for hsm-connector
//!
//! Owns the single USB session to the HSM and proxies opaque request blobs
//! to it. The layers, leaves first:
//! - [`enumerator`] finds the device to adopt
//! - [`session`] opens, configures, probes and closes it
//! - [`transfers`] frames requests and responses onto bulk transfers
//! - [`proxy`] serializes callers and recovers from device errors by
//!   reopening the session
//!
//! The bus is reached through the traits in [`backend`]; [`usb`] implements
//! them with libusb.

pub mod backend;
pub mod enumerator;
pub mod error;
pub mod identity;
pub mod proxy;
pub mod session;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod transfers;
pub mod usb;

pub use backend::{DeviceHandle, EndpointInfo, UsbBackend};
pub use error::{DeviceError, Result};
pub use identity::DeviceIdentity;
pub use proxy::{Proxy, ProxyOptions};
pub use session::{DeviceSession, SessionState};
pub use usb::RusbBackend;
