//! Test utilities for the device core
//!
//! [`SimBus`] is an in-memory USB bus implementing [`UsbBackend`]. It records
//! every physical operation as a [`SimEvent`], counts handle drops per
//! device, and lets tests inject failures at each step.
//!
//! # Example
//!
//! ```
//! use device::test_utils::{SimBus, SimDevice};
//!
//! let bus = SimBus::new();
//! bus.plug(SimDevice::hsm("0000000001"));
//! assert_eq!(bus.enumerations(), 0);
//! ```

use crate::backend::{DeviceHandle, EndpointInfo, UsbBackend};
use crate::error::{DeviceError, Result};
use crate::identity::{PRODUCT_ID, READ_ENDPOINT, VENDOR_ID, WRITE_ENDPOINT};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Computes a response from a request
pub type Responder = Box<dyn Fn(&[u8]) -> Vec<u8> + Send>;

/// Description of a simulated device
#[derive(Debug, Clone)]
pub struct SimDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    /// `None` simulates a device whose serial cannot be read
    pub serial: Option<String>,
    pub max_packet_size: u16,
    /// Whether the bulk endpoints exist on interface 0
    pub has_endpoints: bool,
}

impl SimDevice {
    /// A device of the supported class with the given serial
    pub fn hsm(serial: &str) -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            serial: Some(serial.to_string()),
            max_packet_size: 64,
            has_endpoints: true,
        }
    }

    /// A device of the supported class whose serial read fails
    pub fn unreadable() -> Self {
        Self {
            serial: None,
            ..Self::hsm("")
        }
    }

    /// A device of some other class
    pub fn foreign(vendor_id: u16, product_id: u16, serial: &str) -> Self {
        Self {
            vendor_id,
            product_id,
            ..Self::hsm(serial)
        }
    }
}

/// A physical operation observed by the simulated bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    /// Device list scanned
    Enumerate,
    /// Bulk OUT transfer with its payload
    Write(Vec<u8>),
    /// Bulk OUT transfer that failed
    WriteFailed,
    /// Successful bulk IN transfer with its length
    Read(usize),
    /// Bulk IN transfer that failed
    ReadFailed,
    /// Interface claimed on device index
    Claimed(usize),
    /// Interface released on device index
    Released(usize),
    /// Handle to device index dropped
    Closed(usize),
    /// Health probe
    AliveCheck,
}

struct SimState {
    devices: Vec<SimDevice>,
    attached: Vec<bool>,
    closes: Vec<usize>,
    events: Vec<SimEvent>,
    enumerations: usize,
    /// Responses waiting in the device's IN buffer
    pending: VecDeque<Vec<u8>>,
    responder: Responder,
    write_failures: usize,
    read_failures: usize,
    alive_failures: usize,
    configure_failures: usize,
    write_delay: Option<Duration>,
}

/// Simulated USB bus shared between a backend and the test inspecting it
#[derive(Clone)]
pub struct SimBus {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    /// An empty bus whose devices echo requests back
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                devices: Vec::new(),
                attached: Vec::new(),
                closes: Vec::new(),
                events: Vec::new(),
                enumerations: 0,
                pending: VecDeque::new(),
                responder: Box::new(|req| req.to_vec()),
                write_failures: 0,
                read_failures: 0,
                alive_failures: 0,
                configure_failures: 0,
                write_delay: None,
            })),
        }
    }

    /// A bus with a single supported device attached
    pub fn with_device(serial: &str) -> Self {
        let bus = Self::new();
        bus.plug(SimDevice::hsm(serial));
        bus
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a device; returns its index
    pub fn plug(&self, device: SimDevice) -> usize {
        let mut state = self.state();
        state.devices.push(device);
        state.attached.push(true);
        state.closes.push(0);
        state.devices.len() - 1
    }

    /// Detach every device; open handles start failing
    pub fn unplug_all(&self) {
        self.state().attached.fill(false);
    }

    /// Re-attach every device removed by [`SimBus::unplug_all`]
    pub fn replug_all(&self) {
        self.state().attached.fill(true);
    }

    pub fn set_responder(&self, responder: impl Fn(&[u8]) -> Vec<u8> + Send + 'static) {
        self.state().responder = Box::new(responder);
    }

    /// Fail the next `n` non-empty bulk writes
    pub fn fail_writes(&self, n: usize) {
        self.state().write_failures = n;
    }

    /// Fail the next `n` data reads (reads with no deadline)
    pub fn fail_reads(&self, n: usize) {
        self.state().read_failures = n;
    }

    /// Fail the next `n` health probes
    pub fn fail_alive_checks(&self, n: usize) {
        self.state().alive_failures = n;
    }

    /// Fail the next `n` configuration selections
    pub fn fail_configuration(&self, n: usize) {
        self.state().configure_failures = n;
    }

    /// Sleep inside every bulk write, widening race windows
    pub fn set_write_delay(&self, delay: Duration) {
        self.state().write_delay = Some(delay);
    }

    /// Queue stale data in the device's IN buffer
    pub fn push_stale(&self, data: Vec<u8>) {
        self.state().pending.push_back(data);
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Payloads of all bulk writes, zero-length packets included
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                SimEvent::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Non-empty bulk writes attempted, failed ones included
    pub fn write_attempts(&self) -> usize {
        self.state()
            .events
            .iter()
            .filter(|e| match e {
                SimEvent::Write(data) => !data.is_empty(),
                SimEvent::WriteFailed => true,
                _ => false,
            })
            .count()
    }

    /// How often the device list was scanned
    pub fn enumerations(&self) -> usize {
        self.state().enumerations
    }

    /// How often handles to device `index` were dropped
    pub fn closes(&self, index: usize) -> usize {
        self.state().closes[index]
    }

    fn is_attached(&self, index: usize) -> bool {
        self.state().attached[index]
    }
}

impl UsbBackend for SimBus {
    type Handle = SimHandle;

    fn open_devices(&mut self, vendor_id: u16, product_id: u16) -> Result<Vec<SimHandle>> {
        let mut state = self.state();
        state.enumerations += 1;
        state.events.push(SimEvent::Enumerate);

        let handles = state
            .devices
            .iter()
            .enumerate()
            .filter(|(index, d)| {
                state.attached[*index] && d.vendor_id == vendor_id && d.product_id == product_id
            })
            .map(|(index, _)| SimHandle {
                bus: self.clone(),
                index,
                claimed: false,
            })
            .collect();
        Ok(handles)
    }
}

/// Handle to a simulated device
pub struct SimHandle {
    bus: SimBus,
    index: usize,
    claimed: bool,
}

impl SimHandle {
    /// Index of the device on the bus
    pub fn index(&self) -> usize {
        self.index
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.bus.is_attached(self.index) {
            Ok(())
        } else {
            Err(DeviceError::Transport(
                "no such device (it may have been disconnected)".into(),
            ))
        }
    }
}

impl DeviceHandle for SimHandle {
    fn serial_number(&mut self) -> Result<String> {
        self.ensure_attached()?;
        self.bus.state().devices[self.index]
            .serial
            .clone()
            .ok_or_else(|| DeviceError::Transport("serial descriptor unreadable".into()))
    }

    fn select_configuration(&mut self, _config: u8) -> Result<()> {
        let mut state = self.bus.state();
        if state.configure_failures > 0 {
            state.configure_failures -= 1;
            return Err(DeviceError::Configuration("set configuration failed".into()));
        }
        Ok(())
    }

    fn claim_interface(&mut self, _interface: u8, _alt_setting: u8) -> Result<()> {
        self.claimed = true;
        self.bus.state().events.push(SimEvent::Claimed(self.index));
        Ok(())
    }

    fn endpoint(&self, address: u8) -> Result<EndpointInfo> {
        let state = self.bus.state();
        let device = &state.devices[self.index];
        if !self.claimed
            || !device.has_endpoints
            || (address != WRITE_ENDPOINT && address != READ_ENDPOINT)
        {
            return Err(DeviceError::Configuration(format!(
                "bulk endpoint {:#04x} not found",
                address
            )));
        }
        Ok(EndpointInfo {
            address,
            max_packet_size: device.max_packet_size,
        })
    }

    fn release_interface(&mut self, _interface: u8) -> Result<()> {
        self.claimed = false;
        self.bus.state().events.push(SimEvent::Released(self.index));
        Ok(())
    }

    fn write_bulk(&mut self, _endpoint: u8, data: &[u8]) -> Result<usize> {
        let delay = self.bus.state().write_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let mut state = self.bus.state();
        if !state.attached[self.index] {
            state.events.push(SimEvent::WriteFailed);
            return Err(DeviceError::Transport(
                "no such device (it may have been disconnected)".into(),
            ));
        }
        if !data.is_empty() && state.write_failures > 0 {
            state.write_failures -= 1;
            state.events.push(SimEvent::WriteFailed);
            return Err(DeviceError::Transport("pipe error".into()));
        }
        state.events.push(SimEvent::Write(data.to_vec()));
        if !data.is_empty() {
            let response = (state.responder)(data);
            state.pending.push_back(response);
        }
        Ok(data.len())
    }

    fn read_bulk(
        &mut self,
        _endpoint: u8,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize> {
        self.ensure_attached()?;

        let mut state = self.bus.state();
        if timeout.is_none() && state.read_failures > 0 {
            state.read_failures -= 1;
            state.events.push(SimEvent::ReadFailed);
            return Err(DeviceError::Transport("read failed".into()));
        }
        match state.pending.pop_front() {
            Some(response) => {
                let n = response.len().min(buf.len());
                buf[..n].copy_from_slice(&response[..n]);
                state.events.push(SimEvent::Read(n));
                Ok(n)
            }
            None => {
                state.events.push(SimEvent::ReadFailed);
                if timeout.is_some() {
                    Err(DeviceError::Timeout)
                } else {
                    Err(DeviceError::Transport("no response pending".into()))
                }
            }
        }
    }

    fn check_alive(&mut self) -> Result<()> {
        self.ensure_attached()?;
        let mut state = self.bus.state();
        state.events.push(SimEvent::AliveCheck);
        if state.alive_failures > 0 {
            state.alive_failures -= 1;
            return Err(DeviceError::Transport("serial re-read failed".into()));
        }
        Ok(())
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        let mut state = self.bus.state();
        state.closes[self.index] += 1;
        state.events.push(SimEvent::Closed(self.index));
    }
}
