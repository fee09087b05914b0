//! Stand-ins for the scale's sensor tasks.

use std::{convert::Infallible, time::Duration};

use propsync::{
    EngineHandle, Registry,
    common::{Bounds, Value, command::Outbound},
};
use tokio::time::{Instant, MissedTickBehavior};

use crate::scale::{REPORT_DELAY_MS, WEIGHT, WEIGHT_LIMIT};

const SAMPLE_PERIOD: Duration = Duration::from_millis(200);
const REPORT_SLICE: Duration = Duration::from_millis(500);
const REPORT_BOUNDS: Bounds = Bounds { min: Some(100), max: Some(5000) };

/// Load on the simulated cell after `elapsed`, in whole grams.
pub fn sample(elapsed: Duration) -> i32 {
    let t = elapsed.as_secs_f64();
    let grams = 250.0 + 40.0 * (t / 7.0).sin();
    (grams.round() as i32).clamp(0, WEIGHT_LIMIT)
}

pub fn report_delay(registry: &Registry) -> Duration {
    let ms = registry
        .get(REPORT_DELAY_MS)
        .ok()
        .and_then(|v| v.as_integer())
        .unwrap_or(5000);
    Duration::from_millis(REPORT_BOUNDS.clamp(ms) as u64)
}

/// Writes a new weight every 200 ms and pushes it to the local radio.
pub async fn weigh(handle: EngineHandle) -> Infallible {
    let start = Instant::now();
    let mut ticker = tokio::time::interval(SAMPLE_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let grams = sample(start.elapsed());
        if let Err(e) = handle.registry().update(WEIGHT, Value::Integer(grams)) {
            tracing::error!("failed to store weight: {e}");
            continue;
        }

        if let Err(e) = handle.indicate_by_name(WEIGHT) {
            tracing::warn!("failed to indicate weight: {e}");
        }
    }
}

/// Publishes the weight every `report_delay_ms`. The delay is re-read while
/// waiting so a shorter setting takes effect without waiting out the old one.
pub async fn report(handle: EngineHandle) -> Infallible {
    loop {
        let mut waited = Duration::ZERO;
        loop {
            let delay = report_delay(handle.registry());
            if waited >= delay {
                break;
            }

            let slice = (delay - waited).min(REPORT_SLICE);
            tokio::time::sleep(slice).await;
            waited += slice;
        }

        let message = match handle.registry().find(WEIGHT) {
            Ok(prop) => {
                Outbound::Update { msg_id: 0, key: prop.name().clone(), value: prop.value() }
            }
            Err(e) => {
                tracing::error!("{e}");
                continue;
            }
        };

        if let Err(e) = handle.publish(&message).await {
            tracing::debug!("weight report not sent: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use propsync::common::PropertySpec;

    use super::*;

    #[test]
    fn samples_stay_in_range() {
        for secs in 0..120 {
            let grams = sample(Duration::from_secs(secs));
            assert!((210..=290).contains(&grams), "{grams} g at {secs} s");
        }
    }

    #[test]
    fn report_delay_is_clamped() {
        let registry = Arc::new(
            Registry::builder()
                .property(PropertySpec::integer(REPORT_DELAY_MS, 20).read_write())
                .build()
                .unwrap(),
        );
        assert_eq!(report_delay(&registry), Duration::from_millis(100));

        registry.update(REPORT_DELAY_MS, Value::Integer(60_000)).unwrap();
        assert_eq!(report_delay(&registry), Duration::from_millis(5000));

        let empty = Registry::builder().build().unwrap();
        assert_eq!(report_delay(&empty), Duration::from_millis(5000));
    }
}
