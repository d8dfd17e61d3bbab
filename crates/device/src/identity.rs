//! Identification of the supported device class

use common::Serial;

/// USB vendor identifier of the supported device
pub const VENDOR_ID: u16 = 0x1050;
/// USB product identifier of the supported device
pub const PRODUCT_ID: u16 = 0x0030;

/// Configuration selected after open
pub const CONFIGURATION: u8 = 1;
/// Interface (and alternate setting) claimed after open
pub const INTERFACE: u8 = 0;
pub const ALT_SETTING: u8 = 0;

/// Bulk OUT endpoint carrying requests
pub const WRITE_ENDPOINT: u8 = 0x01;
/// Bulk IN endpoint carrying responses
pub const READ_ENDPOINT: u8 = 0x81;

/// Which device to adopt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Exact serial to match; [`Serial::any`] accepts every device
    pub serial: Serial,
}

impl DeviceIdentity {
    /// Identity of the supported device class, optionally pinned to a serial
    pub fn new(serial: Serial) -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            serial,
        }
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::new(Serial::any())
    }
}
