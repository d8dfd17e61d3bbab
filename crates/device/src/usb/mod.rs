//! libusb backend
//!
//! Implements the backend traits on top of `rusb`. libusb reaches the device
//! through usbfs on Linux, IOKit on macOS and WinUSB on Windows, so one
//! backend serves every platform.

pub mod context;
pub mod device;

pub use context::RusbBackend;
pub use device::RusbDevice;
