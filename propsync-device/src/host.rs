//! Host implementations of the hardware seams.

use std::sync::atomic::{AtomicBool, Ordering};

use propsync::{
    Result,
    lifecycle::{PowerControl, WakeSource},
    local::NetworkControl,
};

/// Logs power transitions. Returning from `deep_sleep` lets the engine stop,
/// which ends the process.
#[derive(Debug, Default)]
pub struct HostPower;

impl PowerControl for HostPower {
    fn configure_wake(&self, source: WakeSource) -> Result<()> {
        match source {
            WakeSource::Gpio { pin, level_low } => {
                tracing::info!(pin, level = if level_low { "low" } else { "high" }, "wake on gpio");
            }
            WakeSource::Timer { secs } => tracing::info!(secs, "wake on timer"),
        }
        Ok(())
    }

    fn deep_sleep(&self) {
        tracing::info!("deep sleep");
    }
}

/// Tracks whether the network would be powered. The broker session keeps
/// running on a host.
#[derive(Debug)]
pub struct HostNetwork {
    up: AtomicBool,
}

impl HostNetwork {
    pub fn new() -> Self {
        Self { up: AtomicBool::new(true) }
    }
}

impl Default for HostNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkControl for HostNetwork {
    fn stop_network(&self) -> Result<()> {
        if self.up.swap(false, Ordering::Relaxed) {
            tracing::info!("network stopped");
        }
        Ok(())
    }

    fn start_network(&self) -> Result<()> {
        if !self.up.swap(true, Ordering::Relaxed) {
            tracing::info!("network started");
        }
        Ok(())
    }
}
