//! Device enumeration
//!
//! Scans the bus for the supported device class and picks the device to
//! adopt. When several devices qualify, the last one encountered wins and
//! every earlier candidate is closed as soon as it is superseded.

use crate::backend::{DeviceHandle, UsbBackend};
use crate::error::{DeviceError, Result};
use crate::identity::DeviceIdentity;
use tracing::debug;

/// Find the device to adopt for `identity`
///
/// Candidates whose serial cannot be read, or whose serial does not match a
/// requested one, are closed immediately. Returns [`DeviceError::NotFound`]
/// when nothing qualifies.
pub fn find<B: UsbBackend>(
    backend: &mut B,
    identity: &DeviceIdentity,
    correlation_id: &str,
) -> Result<B::Handle> {
    let candidates = backend.open_devices(identity.vendor_id, identity.product_id)?;
    debug!(
        correlation_id,
        candidates = candidates.len(),
        "enumerated matching devices"
    );

    let mut selected: Option<B::Handle> = None;
    for mut candidate in candidates {
        let serial = match candidate.serial_number() {
            Ok(serial) => serial,
            Err(e) => {
                debug!(correlation_id, error = %e, "couldn't read serial number from device");
                drop(candidate);
                continue;
            }
        };

        if !identity.serial.matches(&serial) {
            debug!(
                correlation_id,
                device_serial = %serial,
                wanted_serial = %identity.serial,
                "device skipped for non-matching serial"
            );
            drop(candidate);
            continue;
        }

        debug!(
            correlation_id,
            device_serial = %serial,
            wanted_serial = %identity.serial,
            "matched device"
        );
        // A later match overrides the previous one, which is closed here
        selected = Some(candidate);
    }

    selected.ok_or(DeviceError::NotFound)
}
