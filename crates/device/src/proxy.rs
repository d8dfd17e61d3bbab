//! Proxy orchestrator
//!
//! Entry point for request handlers. A single mutex around the session turns
//! concurrent callers into a strict sequence of device transactions: each
//! call holds the lock from open through the final read.

use crate::backend::UsbBackend;
use crate::error::Result;
use crate::session::{DeviceSession, SessionState};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of write+read attempts per transaction
pub const DEFAULT_ATTEMPTS: u32 = 2;

/// Tunables of the data path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyOptions {
    /// Write+read attempts per transaction, reopening between attempts
    pub attempts: u32,
    /// Deadline of the response read; `None` waits forever
    pub read_timeout: Option<Duration>,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            read_timeout: None,
        }
    }
}

/// Serializes all device access through one session
pub struct Proxy<B: UsbBackend> {
    session: Mutex<DeviceSession<B>>,
    options: ProxyOptions,
}

impl<B: UsbBackend> Proxy<B> {
    pub fn new(session: DeviceSession<B>, options: ProxyOptions) -> Self {
        Self {
            session: Mutex::new(session),
            options: ProxyOptions {
                attempts: options.attempts.max(1),
                ..options
            },
        }
    }

    /// Acquire the device lock
    ///
    /// A panic while the lock was held leaves the session in an unknown
    /// state, so a poisoned lock is recovered by closing the session.
    fn lock(&self, correlation_id: &str) -> MutexGuard<'_, DeviceSession<B>> {
        match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(correlation_id, "device lock poisoned, resetting session");
                self.session.clear_poison();
                let mut guard = poisoned.into_inner();
                guard.close(correlation_id);
                guard
            }
        }
    }

    /// Send `request` to the device and return its response
    ///
    /// A transport failure at either step reopens the session and retries
    /// the whole exchange, up to [`ProxyOptions::attempts`] in total. A
    /// failing reopen ends the transaction immediately.
    pub fn transact(&self, request: &[u8], correlation_id: &str) -> Result<Vec<u8>> {
        let mut session = self.lock(correlation_id);
        session.open(correlation_id)?;

        let mut attempt = 1;
        loop {
            let result = session
                .write(request, correlation_id)
                .and_then(|()| session.read(self.options.read_timeout, correlation_id));

            match result {
                Ok(response) => {
                    debug!(
                        correlation_id,
                        attempt,
                        request_len = request.len(),
                        response_len = response.len(),
                        "transaction complete"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_transport() && attempt < self.options.attempts => {
                    session.reopen(&e, correlation_id)?;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(correlation_id, attempt, error = %e, "transaction failed");
                    if e.is_transport() {
                        // Next request starts from a fresh open
                        session.close(correlation_id);
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Ensure the device is reachable, reopening until it answers
    ///
    /// Only a failing open ends the loop early, so a successful return means
    /// the device completed a round trip.
    pub fn check(&self, correlation_id: &str) -> Result<()> {
        let mut session = self.lock(correlation_id);
        session.open(correlation_id)?;

        loop {
            match session.check_alive(correlation_id) {
                Ok(()) => return Ok(()),
                Err(e) => session.reopen(&e, correlation_id)?,
            }
        }
    }

    /// Current session state; waits for any in-flight transaction
    pub fn state(&self) -> SessionState {
        self.lock("state").state()
    }

    /// Close the session ahead of process exit
    pub fn shutdown(&self, correlation_id: &str) {
        self.lock(correlation_id).close(correlation_id);
    }
}

