//! Device error types

use thiserror::Error;

/// Errors raised by the device core
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Enumeration found no matching device
    #[error("device not found")]
    NotFound,

    /// The USB context could not be created or could not list devices
    #[error("usb context error: {0}")]
    Context(String),

    /// A physical write or read failed (disconnect, stall, bus error)
    #[error("usb transport error: {0}")]
    Transport(String),

    /// A read exceeded its deadline
    #[error("usb read timed out")]
    Timeout,

    /// Selecting configuration, interface or endpoints failed
    #[error("usb configuration error: {0}")]
    Configuration(String),

    /// I/O was attempted on a closed session
    #[error("usb session is not open")]
    NotOpen,
}

impl DeviceError {
    /// Whether this error is recovered by a reopen-and-retry cycle
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            DeviceError::Transport(_) | DeviceError::Timeout | DeviceError::NotOpen
        )
    }
}

/// Map a libusb error raised during a transfer
pub fn map_transfer_error(e: rusb::Error) -> DeviceError {
    match e {
        rusb::Error::Timeout => DeviceError::Timeout,
        other => DeviceError::Transport(other.to_string()),
    }
}

/// Map a libusb error raised while listing the bus
///
/// Not retried: the data path only reopens after transfer failures.
pub fn map_enumeration_error(e: rusb::Error) -> DeviceError {
    DeviceError::Context(format!("listing devices: {}", e))
}

/// Map a libusb error raised while selecting configuration or interface
pub fn map_configuration_error(e: rusb::Error) -> DeviceError {
    DeviceError::Configuration(e.to_string())
}

pub type Result<T> = std::result::Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(DeviceError::Transport("pipe".into()).is_transport());
        assert!(DeviceError::Timeout.is_transport());
        assert!(DeviceError::NotOpen.is_transport());
        assert!(!DeviceError::NotFound.is_transport());
        assert!(!DeviceError::Configuration("cfg".into()).is_transport());
    }

    #[test]
    fn test_map_transfer_error() {
        assert_eq!(map_transfer_error(rusb::Error::Timeout), DeviceError::Timeout);
        assert!(matches!(
            map_transfer_error(rusb::Error::NoDevice),
            DeviceError::Transport(_)
        ));
        assert!(matches!(
            map_transfer_error(rusb::Error::Pipe),
            DeviceError::Transport(_)
        ));
    }

    #[test]
    fn test_map_enumeration_error() {
        for e in [rusb::Error::Io, rusb::Error::NoMem, rusb::Error::Access] {
            let mapped = map_enumeration_error(e);
            assert!(matches!(mapped, DeviceError::Context(_)));
            assert!(!mapped.is_transport());
        }
    }
}
