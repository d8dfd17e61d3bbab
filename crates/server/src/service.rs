//! Systemd service integration
//!
//! Speaks systemd's sd-notify protocol so the connector can run as a
//! `Type=notify` unit with watchdog supervision. Every call is a no-op when
//! `NOTIFY_SOCKET` is not set.

use anyhow::Result;
use std::env;
use std::time::Duration;
use tracing::{debug, error, info};

#[cfg(unix)]
fn notify(message: &str) -> Result<bool> {
    use anyhow::Context;
    use std::os::unix::net::UnixDatagram;

    let Ok(socket_path) = env::var("NOTIFY_SOCKET") else {
        return Ok(false);
    };
    let socket = UnixDatagram::unbound().context("Failed to create Unix socket")?;
    socket
        .send_to(message.as_bytes(), &socket_path)
        .with_context(|| format!("Failed to send {} notification to systemd", message))?;
    Ok(true)
}

#[cfg(not(unix))]
fn notify(_message: &str) -> Result<bool> {
    Ok(false)
}

/// Notify systemd that the connector accepts requests
pub fn notify_ready() -> Result<()> {
    if notify("READY=1")? {
        info!("Notified systemd: service ready");
    } else {
        debug!("NOTIFY_SOCKET not set, skipping systemd notification");
    }
    Ok(())
}

/// Notify systemd that shutdown has begun
pub fn notify_stopping() -> Result<()> {
    if notify("STOPPING=1")? {
        info!("Notified systemd: service stopping");
    }
    Ok(())
}

/// Send watchdog keepalive to systemd
pub fn notify_watchdog() -> Result<()> {
    if notify("WATCHDOG=1")? {
        debug!("Notified systemd: watchdog keepalive");
    }
    Ok(())
}

/// Send a status line shown by `systemctl status`
pub fn notify_status(status: &str) -> Result<()> {
    if notify(&format!("STATUS={}", status))? {
        debug!(status, "Notified systemd: status");
    }
    Ok(())
}

/// Watchdog timeout configured by systemd, in microseconds
pub fn get_watchdog_timeout() -> Option<u64> {
    env::var("WATCHDOG_USEC").ok().and_then(|s| s.parse().ok())
}

/// Check if running under systemd
pub fn is_systemd() -> bool {
    env::var("NOTIFY_SOCKET").is_ok()
}

/// Keepalive period for a watchdog timeout: half of it, at least a second
pub fn watchdog_interval(timeout_usec: u64) -> Duration {
    Duration::from_secs((timeout_usec / 1_000_000 / 2).max(1))
}

/// Spawn a task sending WATCHDOG=1 at half the watchdog interval
///
/// Returns `None` when the watchdog is not enabled.
pub fn spawn_watchdog_task() -> Option<tokio::task::JoinHandle<()>> {
    let Some(timeout_usec) = get_watchdog_timeout() else {
        debug!("Systemd watchdog not enabled, skipping watchdog task");
        return None;
    };
    let interval = watchdog_interval(timeout_usec);

    info!(
        interval_secs = interval.as_secs(),
        timeout_secs = timeout_usec / 1_000_000,
        "Systemd watchdog enabled"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = notify_watchdog() {
                error!("Failed to send watchdog keepalive: {:#}", e);
            }
        }
    }))
}
