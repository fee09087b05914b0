use std::sync::Arc;

use compact_str::CompactString;
use propsync_common::command::Outbound;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinSet};

use crate::{
    Result,
    broker::{BrokerAdapter, BrokerState},
    config::EngineConfig,
    dispatch::Dispatcher,
    hooks::Collaborator,
    lifecycle::{ActivityClock, FirmwareSignal, IdleSleep, PowerControl, heartbeat},
    local::{LocalAdapter, NetworkControl, Radio, RadioEvent},
    registry::{Registry, RegistryBuilder},
};

pub struct EngineBuilder {
    config: EngineConfig,
    registry: RegistryBuilder,
    collaborator: Arc<dyn Collaborator>,
    power: Arc<dyn PowerControl>,
    local: Option<LocalParts>,
}

struct LocalParts {
    radio: Arc<dyn Radio>,
    events: UnboundedReceiver<RadioEvent>,
    network: Arc<dyn NetworkControl>,
}

impl EngineBuilder {
    /// Serves the registry over a local radio as well as the broker.
    pub fn local_radio(
        mut self,
        radio: Arc<dyn Radio>,
        events: UnboundedReceiver<RadioEvent>,
        network: Arc<dyn NetworkControl>,
    ) -> Self {
        self.local = Some(LocalParts { radio, events, network });
        self
    }

    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        let registry = Arc::new(self.registry.hook(self.collaborator).build()?);
        let activity = ActivityClock::new();

        let dispatcher = Dispatcher::new(registry.clone(), activity.clone());
        let broker = BrokerAdapter::new(
            self.config.device_id.clone(),
            self.config.client_id(),
            self.config.static_broker.clone(),
            self.config.failover_period,
            dispatcher,
        );

        let local = match self.local {
            Some(LocalParts { radio, events, network }) => {
                let adapter =
                    LocalAdapter::start(registry.clone(), radio, network, activity.clone())?;
                Some((adapter, events))
            }
            None => None,
        };

        tracing::info!(
            device = %self.config.device_id,
            properties = registry.len(),
            local_radio = local.is_some(),
            "engine built"
        );

        Ok(Engine { config: self.config, registry, activity, broker, local, power: self.power })
    }
}

/// One device: the registry, both transports and the lifecycle tasks.
pub struct Engine {
    config: EngineConfig,
    registry: Arc<Registry>,
    activity: ActivityClock,
    broker: Arc<BrokerAdapter>,
    local: Option<(Arc<LocalAdapter>, UnboundedReceiver<RadioEvent>)>,
    power: Arc<dyn PowerControl>,
}

impl Engine {
    pub fn builder(
        config: EngineConfig,
        registry: RegistryBuilder,
        collaborator: Arc<dyn Collaborator>,
        power: Arc<dyn PowerControl>,
    ) -> EngineBuilder {
        EngineBuilder { config, registry, collaborator, power, local: None }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            registry: self.registry.clone(),
            activity: self.activity.clone(),
            broker: self.broker.clone(),
            local: self.local.as_ref().map(|(adapter, _)| adapter.clone()),
        }
    }

    /// Runs until the device goes to sleep.
    pub async fn run(self) {
        let mut tasks = JoinSet::<()>::new();

        tasks.spawn({
            let broker = self.broker.clone();
            async move { match broker.run().await {} }
        });

        if let Some((adapter, events)) = self.local {
            tasks.spawn(adapter.run(events));
        }

        tasks.spawn({
            let broker = self.broker.clone();
            let period = self.config.heartbeat_period;

            async move {
                let report = move || {
                    let broker = broker.clone();
                    async move {
                        if let Err(e) = broker.report().await {
                            tracing::debug!("heartbeat report not sent: {e}");
                        }
                    }
                };

                match heartbeat(period, report).await {}
            }
        });

        IdleSleep {
            registry: self.registry,
            activity: self.activity,
            sleep_key: self.config.sleep_time_key.to_string(),
            period: self.config.idle_check_period,
            wake: self.config.wake_source,
            power: self.power,
        }
        .run()
        .await;

        tasks.abort_all();
    }
}

/// Cloneable access to a running engine for collaborator tasks.
#[derive(Clone)]
pub struct EngineHandle {
    registry: Arc<Registry>,
    activity: ActivityClock,
    broker: Arc<BrokerAdapter>,
    local: Option<Arc<LocalAdapter>>,
}

impl EngineHandle {
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn broker_state(&self) -> BrokerState {
        self.broker.state()
    }

    pub async fn publish(&self, message: &Outbound) -> Result<()> {
        self.broker.publish(message).await
    }

    pub async fn report(&self) -> Result<()> {
        self.broker.report().await
    }

    /// Refreshes the property's local radio slot; a no-op without a local radio.
    pub fn indicate(&self, index: usize) -> Result<()> {
        match &self.local {
            Some(local) => local.indicate(index),
            None => Ok(()),
        }
    }

    pub fn indicate_by_name(&self, name: &str) -> Result<()> {
        let index = self.registry.find(name)?.index();
        self.indicate(index)
    }

    pub fn firmware(&self, signal: FirmwareSignal) {
        self.activity.firmware(signal);
    }

    pub fn add_discovered_broker(&self, addr: impl Into<CompactString>) {
        self.broker.add_discovered_broker(addr);
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use propsync_common::{PropertySpec, Value};

    use super::*;
    use crate::{Error, lifecycle::WakeSource, local::LoopbackRadio};

    #[derive(Default)]
    struct Power(Mutex<Vec<String>>);

    impl PowerControl for Power {
        fn configure_wake(&self, source: WakeSource) -> Result<()> {
            self.0.lock().unwrap().push(format!("{source:?}"));
            Ok(())
        }

        fn deep_sleep(&self) {
            self.0.lock().unwrap().push("sleep".into());
        }
    }

    struct NoNetwork;

    impl NetworkControl for NoNetwork {
        fn stop_network(&self) -> Result<()> {
            Ok(())
        }

        fn start_network(&self) -> Result<()> {
            Ok(())
        }
    }

    fn registry() -> RegistryBuilder {
        Registry::builder()
            .property(PropertySpec::identity("device_type", "TD01"))
            .property(PropertySpec::integer("sleep_time", 5).read_write())
            .property(PropertySpec::float("weight", 0.0).readable())
    }

    fn config() -> EngineConfig {
        EngineConfig {
            // nothing listens here, so every attempt fails fast
            static_broker: "127.0.0.1:9".into(),
            idle_check_period: Duration::from_secs(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn handle_without_broker() {
        let (radio, events) = LoopbackRadio::new();
        let engine = Engine::builder(config(), registry(), Arc::new(()), Arc::new(Power::default()))
            .local_radio(radio.clone(), events, Arc::new(NoNetwork))
            .build()
            .unwrap();
        let handle = engine.handle();

        assert_eq!(handle.broker_state(), BrokerState::Disconnected);
        assert!(matches!(handle.report().await, Err(Error::NotConnected)));

        handle.registry().update("weight", Value::Float(1.5)).unwrap();
        handle.indicate_by_name("weight").unwrap();
        assert!(matches!(handle.indicate_by_name("nope"), Err(Error::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn run_ends_in_sleep() {
        let power = Arc::new(Power::default());
        let engine = Engine::builder(config(), registry(), Arc::new(()), power.clone())
            .build()
            .unwrap();

        engine.run().await;

        assert_eq!(*power.0.lock().unwrap(), ["Gpio { pin: 0, level_low: true }", "sleep"]);
    }

    #[test]
    fn zero_period_fails_build() {
        let config = EngineConfig { idle_check_period: Duration::ZERO, ..config() };
        let result = Engine::builder(config, registry(), Arc::new(()), Arc::new(Power::default()))
            .build();
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn invalid_registry_fails_build() {
        let registry = Registry::builder()
            .property(PropertySpec::integer("a", 0))
            .property(PropertySpec::integer("a", 1));

        let result = Engine::builder(config(), registry, Arc::new(()), Arc::new(Power::default()))
            .build();
        assert!(matches!(result, Err(Error::DuplicateName(_))));
    }
}
