//! Framed bulk transfers
//!
//! One logical write may take two physical transfers: the payload, then a
//! zero-length packet when the payload length is an exact multiple of the
//! endpoint's max packet size. Without it the device cannot tell that the
//! transfer ended. One logical read fills a fixed 8 KiB buffer and returns
//! exactly the bytes received.

use crate::backend::{DeviceHandle, EndpointInfo};
use crate::error::Result;
use std::time::Duration;
use tracing::debug;

/// Max packet size assumed when an endpoint reports none
pub const DEFAULT_MAX_PACKET_SIZE: u16 = 64;

/// Capacity of a single response read
pub const READ_BUFFER_SIZE: usize = 8192;

/// Whether a payload of `len` bytes needs a trailing zero-length packet
pub fn needs_zlp(len: usize, max_packet_size: u16) -> bool {
    let max = match max_packet_size {
        0 => DEFAULT_MAX_PACKET_SIZE,
        n => n,
    } as usize;
    len % max == 0
}

/// Write `payload` to `endpoint`, terminating it with a ZLP when required
///
/// A failure at either physical step is returned without retrying.
pub fn write_framed<H: DeviceHandle + ?Sized>(
    handle: &mut H,
    endpoint: &EndpointInfo,
    payload: &[u8],
    correlation_id: &str,
) -> Result<()> {
    let result = write_inner(handle, endpoint, payload);
    match &result {
        Ok(n) => debug!(correlation_id, n, len = payload.len(), "usb endpoint write"),
        Err(e) => debug!(
            correlation_id,
            len = payload.len(),
            error = %e,
            "usb endpoint write"
        ),
    }
    result.map(|_| ())
}

fn write_inner<H: DeviceHandle + ?Sized>(
    handle: &mut H,
    endpoint: &EndpointInfo,
    payload: &[u8],
) -> Result<usize> {
    let n = handle.write_bulk(endpoint.address, payload)?;
    if needs_zlp(payload.len(), endpoint.max_packet_size) {
        handle.write_bulk(endpoint.address, &[])?;
    }
    Ok(n)
}

/// Read one response from `endpoint`
///
/// A `None` or zero `timeout` waits without deadline. Timeouts and I/O
/// errors are both returned as errors; nothing is padded.
pub fn read_framed<H: DeviceHandle + ?Sized>(
    handle: &mut H,
    endpoint: &EndpointInfo,
    timeout: Option<Duration>,
    correlation_id: &str,
) -> Result<Vec<u8>> {
    let timeout = timeout.filter(|t| !t.is_zero());
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    match handle.read_bulk(endpoint.address, &mut buf, timeout) {
        Ok(n) => {
            buf.truncate(n);
            debug!(correlation_id, n, "usb endpoint read");
            Ok(buf)
        }
        Err(e) => {
            debug!(correlation_id, n = 0, error = %e, "usb endpoint read");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UsbBackend;
    use crate::error::DeviceError;
    use crate::identity::{PRODUCT_ID, READ_ENDPOINT, VENDOR_ID, WRITE_ENDPOINT};
    use crate::test_utils::{SimBus, SimHandle};

    fn open(bus: &mut SimBus) -> (SimHandle, EndpointInfo, EndpointInfo) {
        let mut handle = bus
            .open_devices(VENDOR_ID, PRODUCT_ID)
            .unwrap()
            .pop()
            .unwrap();
        handle.claim_interface(0, 0).unwrap();
        let out = handle.endpoint(WRITE_ENDPOINT).unwrap();
        let inp = handle.endpoint(READ_ENDPOINT).unwrap();
        (handle, out, inp)
    }

    #[test]
    fn test_needs_zlp() {
        assert!(needs_zlp(0, 64));
        assert!(needs_zlp(64, 64));
        assert!(needs_zlp(128, 64));
        assert!(!needs_zlp(1, 64));
        assert!(!needs_zlp(63, 64));
        assert!(!needs_zlp(65, 64));
        assert!(needs_zlp(512, 512));
        assert!(!needs_zlp(64, 512));
        // Unknown max packet size falls back to 64
        assert!(needs_zlp(64, 0));
    }

    #[test]
    fn test_multiple_of_packet_size_adds_zlp() {
        let mut bus = SimBus::with_device("0000000001");
        let (mut handle, out, _) = open(&mut bus);

        for len in [64usize, 128, 4096] {
            bus.clear_events();
            let payload = vec![0xa5; len];
            write_framed(&mut handle, &out, &payload, "cid").unwrap();
            assert_eq!(bus.writes(), vec![payload, Vec::new()]);
        }
    }

    #[test]
    fn test_other_lengths_single_write() {
        let mut bus = SimBus::with_device("0000000001");
        let (mut handle, out, _) = open(&mut bus);

        for len in [1usize, 3, 63, 65, 127, 1000] {
            bus.clear_events();
            let payload = vec![0x01; len];
            write_framed(&mut handle, &out, &payload, "cid").unwrap();
            assert_eq!(bus.writes(), vec![payload]);
        }
    }

    #[test]
    fn test_write_failure_not_retried() {
        let mut bus = SimBus::with_device("0000000001");
        let (mut handle, out, _) = open(&mut bus);
        bus.fail_writes(1);

        let result = write_framed(&mut handle, &out, &[1, 2, 3], "cid");
        assert!(matches!(result, Err(DeviceError::Transport(_))));
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn test_read_returns_exact_length() {
        let mut bus = SimBus::with_device("0000000001");
        let (mut handle, out, inp) = open(&mut bus);

        write_framed(&mut handle, &out, &[9, 8, 7], "cid").unwrap();
        let response = read_framed(&mut handle, &inp, None, "cid").unwrap();
        assert_eq!(response, vec![9, 8, 7]);
    }

    #[test]
    fn test_read_truncated_to_buffer() {
        let mut bus = SimBus::with_device("0000000001");
        bus.set_responder(|_| vec![0x42; READ_BUFFER_SIZE + 100]);
        let (mut handle, out, inp) = open(&mut bus);

        write_framed(&mut handle, &out, &[1], "cid").unwrap();
        let response = read_framed(&mut handle, &inp, None, "cid").unwrap();
        assert_eq!(response.len(), READ_BUFFER_SIZE);
    }

    #[test]
    fn test_read_timeout_is_error() {
        let mut bus = SimBus::with_device("0000000001");
        let (mut handle, _, inp) = open(&mut bus);

        let result = read_framed(&mut handle, &inp, Some(Duration::from_millis(1)), "cid");
        assert_eq!(result, Err(DeviceError::Timeout));
    }
}
