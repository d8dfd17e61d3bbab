//! Device session lifecycle
//!
//! A [`DeviceSession`] owns the open device handle together with its selected
//! configuration, claimed interface and bulk endpoints. They are acquired
//! together on [`DeviceSession::open`] and released together on
//! [`DeviceSession::close`]; the endpoints exist exactly when the session is
//! open.

use crate::backend::{DeviceHandle, EndpointInfo, UsbBackend};
use crate::enumerator;
use crate::error::{DeviceError, Result};
use crate::identity::{
    ALT_SETTING, CONFIGURATION, DeviceIdentity, INTERFACE, READ_ENDPOINT, WRITE_ENDPOINT,
};
use crate::transfers;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Deadline of the read that discards stale input after open
const DRAIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Observable session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Open,
}

/// Resources held while the session is open
struct ActiveDevice<H> {
    handle: H,
    configuration: u8,
    interface: u8,
    write_endpoint: EndpointInfo,
    read_endpoint: EndpointInfo,
}

/// The live association between the process and one device
pub struct DeviceSession<B: UsbBackend> {
    backend: B,
    identity: DeviceIdentity,
    active: Option<ActiveDevice<B::Handle>>,
}

impl<B: UsbBackend> DeviceSession<B> {
    /// Create a closed session; nothing touches the bus until `open`
    pub fn new(backend: B, identity: DeviceIdentity) -> Self {
        Self {
            backend,
            identity,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.active.is_some() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// Open the session; a no-op when already open
    ///
    /// Any failure after the device was found releases everything acquired
    /// so far before the error is returned.
    pub fn open(&mut self, correlation_id: &str) -> Result<()> {
        if self.active.is_some() {
            debug!(correlation_id, "usb device already open");
            return Ok(());
        }

        let handle = enumerator::find(&mut self.backend, &self.identity, correlation_id)?;
        let active = Self::configure(handle, correlation_id)?;
        self.active = Some(active);

        info!(
            correlation_id,
            serial = %self.identity.serial,
            "usb session opened"
        );

        // Discard whatever a previous client left in the IN buffer
        if let Err(e) = self.read(Some(DRAIN_TIMEOUT), correlation_id) {
            debug!(correlation_id, error = %e, "drain read after open");
        }
        Ok(())
    }

    fn configure(mut handle: B::Handle, correlation_id: &str) -> Result<ActiveDevice<B::Handle>> {
        if let Err(e) = handle.select_configuration(CONFIGURATION) {
            warn!(correlation_id, error = %e, "failed to select configuration");
            return Err(e);
        }

        if let Err(e) = handle.claim_interface(INTERFACE, ALT_SETTING) {
            warn!(correlation_id, error = %e, "failed to claim interface");
            release(&mut handle, Some(CONFIGURATION), None, correlation_id);
            return Err(e);
        }

        let endpoints = handle
            .endpoint(WRITE_ENDPOINT)
            .and_then(|w| handle.endpoint(READ_ENDPOINT).map(|r| (w, r)));
        let (write_endpoint, read_endpoint) = match endpoints {
            Ok(pair) => pair,
            Err(e) => {
                warn!(correlation_id, error = %e, "failed to resolve endpoints");
                release(&mut handle, Some(CONFIGURATION), Some(INTERFACE), correlation_id);
                return Err(e);
            }
        };

        Ok(ActiveDevice {
            handle,
            configuration: CONFIGURATION,
            interface: INTERFACE,
            write_endpoint,
            read_endpoint,
        })
    }

    /// Release interface, configuration and handle; a no-op when closed
    pub fn close(&mut self, correlation_id: &str) {
        if let Some(mut active) = self.active.take() {
            release(
                &mut active.handle,
                Some(active.configuration),
                Some(active.interface),
                correlation_id,
            );
            drop(active);
            debug!(correlation_id, "usb session closed");
        }
    }

    /// Close, then open again
    ///
    /// `why` is only logged.
    pub fn reopen(&mut self, why: &DeviceError, correlation_id: &str) -> Result<()> {
        warn!(correlation_id, why = %why, "reopening usb session");
        self.close(correlation_id);
        self.open(correlation_id)
    }

    /// Probe the open device with a cheap round trip
    pub fn check_alive(&mut self, correlation_id: &str) -> Result<()> {
        let active = self.active.as_mut().ok_or(DeviceError::NotOpen)?;
        let result = active.handle.check_alive();
        if let Err(e) = &result {
            debug!(correlation_id, error = %e, "device health probe failed");
        }
        result
    }

    /// Write one framed request
    pub fn write(&mut self, payload: &[u8], correlation_id: &str) -> Result<()> {
        let active = self.active.as_mut().ok_or(DeviceError::NotOpen)?;
        transfers::write_framed(
            &mut active.handle,
            &active.write_endpoint,
            payload,
            correlation_id,
        )
    }

    /// Read one response; `None` waits without deadline
    pub fn read(&mut self, timeout: Option<Duration>, correlation_id: &str) -> Result<Vec<u8>> {
        let active = self.active.as_mut().ok_or(DeviceError::NotOpen)?;
        transfers::read_framed(&mut active.handle, &active.read_endpoint, timeout, correlation_id)
    }
}

impl<B: UsbBackend> Drop for DeviceSession<B> {
    fn drop(&mut self) {
        self.close("session dropped");
    }
}

/// Release derived resources in order; one failure does not stop the rest
fn release<H: DeviceHandle>(
    handle: &mut H,
    configuration: Option<u8>,
    interface: Option<u8>,
    correlation_id: &str,
) {
    if let Some(interface) = interface {
        if let Err(e) = handle.release_interface(interface) {
            warn!(correlation_id, interface, error = %e, "failed to release interface");
        }
    }
    if configuration.is_some() {
        if let Err(e) = handle.release_configuration() {
            warn!(correlation_id, error = %e, "failed to release configuration");
        }
    }
}
