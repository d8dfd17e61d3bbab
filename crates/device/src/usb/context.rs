//! Process-wide libusb context and device discovery

use crate::backend::UsbBackend;
use crate::error::{DeviceError, Result, map_enumeration_error};
use crate::usb::device::RusbDevice;
use rusb::{Context, UsbContext};
use tracing::{debug, warn};

/// Backend over a lazily created libusb context
///
/// The context is created on first use and lives until the backend is
/// dropped at process exit.
#[derive(Default)]
pub struct RusbBackend {
    context: Option<Context>,
}

impl RusbBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn context(&mut self) -> Result<&Context> {
        if self.context.is_none() {
            debug!("usb context not yet open");
            let context = Context::new().map_err(|e| DeviceError::Context(e.to_string()))?;
            self.context = Some(context);
        }
        self.context
            .as_ref()
            .ok_or_else(|| DeviceError::Context("context missing after creation".to_string()))
    }
}

impl UsbBackend for RusbBackend {
    type Handle = RusbDevice;

    fn open_devices(&mut self, vendor_id: u16, product_id: u16) -> Result<Vec<RusbDevice>> {
        let devices = self
            .context()?
            .devices()
            .map_err(map_enumeration_error)?;

        let mut opened = Vec::new();
        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(d) => d,
                Err(e) => {
                    debug!(
                        "Skipping device bus={} addr={}: no descriptor: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            if descriptor.vendor_id() != vendor_id || descriptor.product_id() != product_id {
                continue;
            }

            match device.open() {
                Ok(handle) => {
                    debug!(
                        "Opened candidate bus={} addr={}",
                        device.bus_number(),
                        device.address()
                    );
                    opened.push(RusbDevice::new(handle, descriptor));
                }
                Err(e) => {
                    // Other matches may still be usable
                    warn!(
                        "Failed to open device bus={} addr={}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                }
            }
        }

        Ok(opened)
    }
}
