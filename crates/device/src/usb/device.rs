//! libusb device handle

use crate::backend::{DeviceHandle, EndpointInfo};
use crate::error::{DeviceError, Result, map_configuration_error, map_transfer_error};
use rusb::{Context, DeviceDescriptor, TransferType};
use std::time::Duration;
use tracing::debug;

/// An opened libusb device
///
/// The underlying handle is closed when this value is dropped.
pub struct RusbDevice {
    handle: rusb::DeviceHandle<Context>,
    descriptor: DeviceDescriptor,
    /// Selected configuration number
    configuration: Option<u8>,
    /// Claimed (interface, alternate setting)
    interface: Option<(u8, u8)>,
}

impl RusbDevice {
    pub fn new(handle: rusb::DeviceHandle<Context>, descriptor: DeviceDescriptor) -> Self {
        Self {
            handle,
            descriptor,
            configuration: None,
            interface: None,
        }
    }

    fn config_descriptor(&self, number: u8) -> Result<rusb::ConfigDescriptor> {
        let device = self.handle.device();
        for index in 0..self.descriptor.num_configurations() {
            let config = device
                .config_descriptor(index)
                .map_err(map_configuration_error)?;
            if config.number() == number {
                return Ok(config);
            }
        }
        Err(DeviceError::Configuration(format!(
            "configuration {} not present",
            number
        )))
    }
}

impl DeviceHandle for RusbDevice {
    fn serial_number(&mut self) -> Result<String> {
        self.handle
            .read_serial_number_string_ascii(&self.descriptor)
            .map_err(map_transfer_error)
    }

    fn select_configuration(&mut self, config: u8) -> Result<()> {
        // Not every platform lets us detach kernel drivers
        match self.handle.set_auto_detach_kernel_driver(true) {
            Ok(()) | Err(rusb::Error::NotSupported) => {}
            Err(e) => debug!("Could not enable kernel driver auto-detach: {}", e),
        }

        let active = self.handle.active_configuration().unwrap_or(0);
        if active != config {
            self.handle
                .set_active_configuration(config)
                .map_err(map_configuration_error)?;
        }
        self.configuration = Some(config);
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8, alt_setting: u8) -> Result<()> {
        self.handle
            .claim_interface(interface)
            .map_err(map_configuration_error)?;
        self.interface = Some((interface, alt_setting));

        if alt_setting != 0 {
            self.handle
                .set_alternate_setting(interface, alt_setting)
                .map_err(map_configuration_error)?;
        }
        Ok(())
    }

    fn endpoint(&self, address: u8) -> Result<EndpointInfo> {
        let config_number = self
            .configuration
            .ok_or_else(|| DeviceError::Configuration("no configuration selected".into()))?;
        let (interface, alt_setting) = self
            .interface
            .ok_or_else(|| DeviceError::Configuration("no interface claimed".into()))?;

        let config = self.config_descriptor(config_number)?;
        config
            .interfaces()
            .filter(|i| i.number() == interface)
            .flat_map(|i| i.descriptors())
            .filter(|d| d.setting_number() == alt_setting)
            .flat_map(|d| d.endpoint_descriptors())
            .find(|ep| ep.address() == address && ep.transfer_type() == TransferType::Bulk)
            .map(|ep| EndpointInfo {
                address,
                max_packet_size: ep.max_packet_size(),
            })
            .ok_or_else(|| {
                DeviceError::Configuration(format!(
                    "bulk endpoint {:#04x} not found on interface {}/{}",
                    address, interface, alt_setting
                ))
            })
    }

    fn release_interface(&mut self, interface: u8) -> Result<()> {
        self.interface = None;
        self.handle
            .release_interface(interface)
            .map_err(map_configuration_error)
    }

    fn release_configuration(&mut self) -> Result<()> {
        self.configuration = None;
        Ok(())
    }

    fn write_bulk(&mut self, endpoint: u8, data: &[u8]) -> Result<usize> {
        // A zero duration means no timeout to libusb
        self.handle
            .write_bulk(endpoint, data, Duration::ZERO)
            .map_err(map_transfer_error)
    }

    fn read_bulk(
        &mut self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize> {
        self.handle
            .read_bulk(endpoint, buf, timeout.unwrap_or(Duration::ZERO))
            .map_err(map_transfer_error)
    }

    fn check_alive(&mut self) -> Result<()> {
        self.serial_number().map(|_| ())
    }
}
