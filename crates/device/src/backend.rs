//! Backend capability traits
//!
//! The session and transport layers only talk to the bus through these
//! traits. The libusb backend lives in [`crate::usb`]; tests use the
//! simulated bus in `test_utils`.

use crate::error::Result;
use std::time::Duration;

/// A bulk endpoint resolved on a claimed interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: u8,
    pub max_packet_size: u16,
}

/// Access to the bus: finds and opens devices
pub trait UsbBackend: Send + 'static {
    type Handle: DeviceHandle;

    /// Open every attached device matching `vendor_id`/`product_id`
    ///
    /// Creates the process-wide USB context on first use. Devices that match
    /// but cannot be opened are skipped.
    fn open_devices(&mut self, vendor_id: u16, product_id: u16) -> Result<Vec<Self::Handle>>;
}

/// One opened device
///
/// Dropping the handle closes the device.
pub trait DeviceHandle: Send {
    /// Read the serial number string descriptor
    fn serial_number(&mut self) -> Result<String>;

    /// Make `config` the active configuration
    fn select_configuration(&mut self, config: u8) -> Result<()>;

    /// Claim `interface` and switch it to `alt_setting`
    fn claim_interface(&mut self, interface: u8, alt_setting: u8) -> Result<()>;

    /// Look up a bulk endpoint of the claimed alternate setting
    fn endpoint(&self, address: u8) -> Result<EndpointInfo>;

    fn release_interface(&mut self, interface: u8) -> Result<()>;

    /// Give up the selected configuration
    fn release_configuration(&mut self) -> Result<()> {
        Ok(())
    }

    /// One physical bulk OUT transfer; returns bytes written
    fn write_bulk(&mut self, endpoint: u8, data: &[u8]) -> Result<usize>;

    /// One physical bulk IN transfer; `None` waits forever
    fn read_bulk(&mut self, endpoint: u8, buf: &mut [u8], timeout: Option<Duration>)
    -> Result<usize>;

    /// Cheap round trip proving the device still answers
    fn check_alive(&mut self) -> Result<()>;
}
