use std::{path::Path, time::Duration};

use compact_str::{CompactString, format_compact};
use propsync_common::DeviceId;
use serde::{Deserialize, Serialize};

use crate::{Error, Result, lifecycle::WakeSource};

pub const DEFAULT_BROKER: &str = "easysmart.local:1883";

/// Engine settings. Every field has a default, so a config file only needs the
/// fields it changes. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Broker-side identity, usually the MAC address
    pub device_id: DeviceId,
    /// MQTT client id, defaults to `propsync-{device_id}`
    pub client_id: Option<CompactString>,
    /// First failover candidate, always present
    pub static_broker: CompactString,
    #[serde(with = "secs")]
    pub failover_period: Duration,
    #[serde(with = "secs")]
    pub heartbeat_period: Duration,
    #[serde(with = "secs")]
    pub idle_check_period: Duration,
    /// Integer property holding the idle timeout in seconds
    pub sleep_time_key: CompactString,
    pub wake_source: WakeSource,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_id: DeviceId::from("000000000000"),
            client_id: None,
            static_broker: DEFAULT_BROKER.into(),
            failover_period: Duration::from_secs(3),
            heartbeat_period: Duration::from_secs(10),
            idle_check_period: Duration::from_secs(10),
            sleep_time_key: "sleep_time".into(),
            wake_source: WakeSource::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Periods drive tokio intervals, which cannot tick every zero seconds.
    pub fn validate(&self) -> Result<()> {
        let periods = [
            (self.failover_period, "failover_period must be non-zero"),
            (self.heartbeat_period, "heartbeat_period must be non-zero"),
            (self.idle_check_period, "idle_check_period must be non-zero"),
        ];

        match periods.into_iter().find(|(period, _)| period.is_zero()) {
            Some((_, reason)) => Err(Error::InvalidConfig(reason)),
            None => Ok(()),
        }
    }

    pub fn client_id(&self) -> CompactString {
        match &self.client_id {
            Some(id) => id.clone(),
            None => format_compact!("propsync-{}", self.device_id),
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        let period = Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)?;
        if period.is_zero() {
            return Err(serde::de::Error::custom("period must be non-zero"));
        }
        Ok(period)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: EngineConfig =
            serde_json::from_value(json!({"device_id": "a4cf12001122", "heartbeat_period": 30}))
                .unwrap();

        assert_eq!(config.device_id, DeviceId::from("a4cf12001122"));
        assert_eq!(config.heartbeat_period, Duration::from_secs(30));
        assert_eq!(config.failover_period, Duration::from_secs(3));
        assert_eq!(config.static_broker, DEFAULT_BROKER);
        assert_eq!(config.sleep_time_key, "sleep_time");
        assert_eq!(config.client_id(), "propsync-a4cf12001122");
    }

    #[test]
    fn fractional_and_negative_periods() {
        let config: EngineConfig =
            serde_json::from_value(json!({"idle_check_period": 0.5})).unwrap();
        assert_eq!(config.idle_check_period, Duration::from_millis(500));

        assert!(serde_json::from_value::<EngineConfig>(json!({"failover_period": -1})).is_err());
    }

    #[test]
    fn zero_periods_are_rejected() {
        for field in ["failover_period", "heartbeat_period", "idle_check_period"] {
            let result = serde_json::from_value::<EngineConfig>(json!({ field: 0 }));
            assert!(result.is_err(), "{field} = 0 accepted");
        }

        let config = EngineConfig { heartbeat_period: Duration::ZERO, ..Default::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn from_file_validates() {
        let name = format!("propsync-config-{}.json", std::process::id());
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, r#"{"static_broker": "10.0.0.2:1883"}"#).unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.static_broker, "10.0.0.2:1883");

        std::fs::write(&path, r#"{"idle_check_period": 0}"#).unwrap();
        assert!(matches!(EngineConfig::from_file(&path), Err(Error::SerdeJson(_))));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn explicit_client_id_wins() {
        let config = EngineConfig { client_id: Some("scale-1".into()), ..Default::default() };
        assert_eq!(config.client_id(), "scale-1");
    }
}
