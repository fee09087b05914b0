use std::{
    convert::Infallible,
    future::Future,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use propsync_common::Value;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, MissedTickBehavior};

use crate::{Result, registry::Registry};

/// Time of the last inbound command, shared by both transports.
#[derive(Debug, Clone)]
pub struct ActivityClock {
    inner: Arc<Mutex<Activity>>,
}

#[derive(Debug)]
struct Activity {
    last: Instant,
    suspended: bool,
}

/// Signals from the firmware-update collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareSignal {
    /// An image transfer started; idle sleep must not interrupt it
    BeginUpdate,
    /// The running image was confirmed good
    MarkValid,
}

impl ActivityClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Activity { last: Instant::now(), suspended: false })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Activity> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn touch(&self) {
        self.lock().last = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.lock().last.elapsed()
    }

    pub fn is_suspended(&self) -> bool {
        self.lock().suspended
    }

    pub fn firmware(&self, signal: FirmwareSignal) {
        let mut activity = self.lock();
        match signal {
            FirmwareSignal::BeginUpdate => {
                tracing::info!("firmware update started, idle sleep suspended");
                activity.suspended = true;
            }
            FirmwareSignal::MarkValid => {
                tracing::info!("firmware marked valid, idle sleep resumed");
                activity.suspended = false;
                activity.last = Instant::now();
            }
        }
    }
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

/// What brings the device back out of deep sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WakeSource {
    Gpio { pin: u8, level_low: bool },
    Timer { secs: u64 },
}

impl Default for WakeSource {
    fn default() -> Self {
        WakeSource::Gpio { pin: 0, level_low: true }
    }
}

pub trait PowerControl: Send + Sync + 'static {
    fn configure_wake(&self, source: WakeSource) -> Result<()>;

    /// Enters deep sleep. On hardware this does not return.
    fn deep_sleep(&self);
}

/// Runs `report` every `period`, starting one period from now. Never returns.
pub async fn heartbeat<F, Fut>(period: Duration, mut report: F) -> Infallible
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        tracing::debug!("heartbeat");
        report().await;
    }
}

/// Puts the device to sleep once no command has arrived for longer than the
/// integer property `sleep_key` (seconds).
pub struct IdleSleep {
    pub registry: Arc<Registry>,
    pub activity: ActivityClock,
    pub sleep_key: String,
    pub period: Duration,
    pub wake: WakeSource,
    pub power: Arc<dyn PowerControl>,
}

impl IdleSleep {
    /// Returns after deep sleep was entered.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if self.activity.is_suspended() {
                continue;
            }

            let Some(limit) = self.limit() else {
                continue;
            };

            let idle = self.activity.idle_for();
            if idle <= limit {
                continue;
            }

            tracing::info!(?idle, ?limit, "no commands received, entering deep sleep");

            self.registry.collaborator().on_before_sleep(&self.registry);

            if let Err(e) = self.power.configure_wake(self.wake) {
                tracing::error!(?self.wake, "failed to configure wake source: {e}");
            }

            self.power.deep_sleep();
            return;
        }
    }

    fn limit(&self) -> Option<Duration> {
        match self.registry.get(&self.sleep_key) {
            Ok(Value::Integer(secs)) if secs >= 0 => Some(Duration::from_secs(secs as u64)),
            Ok(value) => {
                tracing::warn!(key = %self.sleep_key, %value, "sleep time must be a whole number");
                None
            }
            Err(e) => {
                tracing::warn!("cannot read sleep time: {e}");
                None
            }
        }
    }
}
