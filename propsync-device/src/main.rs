use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use clap::Parser;
use propsync::{
    Engine, EngineConfig, Registry,
    common::DeviceId,
    local::LoopbackRadio,
};

use self::host::{HostNetwork, HostPower};

mod host;
mod scale;
mod sim;

#[derive(Parser)]
struct Args {
    /// JSON engine configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Device id used in broker topics, usually the MAC address
    #[arg(long)]
    device_id: Option<String>,

    /// Static MQTT broker address
    #[arg(long)]
    broker: Option<String>,

    /// Second broker, tried after the static one fails
    #[arg(long)]
    discovered_broker: Option<String>,

    /// Serve only the broker, without the loopback radio
    #[arg(long)]
    no_local_radio: bool,
}

impl Args {
    fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::from_file(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => EngineConfig::default(),
        };

        if let Some(id) = &self.device_id {
            config.device_id = DeviceId::from(id);
        }
        if let Some(broker) = &self.broker {
            config.static_broker = broker.as_str().into();
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    propsync::log::init();

    let args = Args::parse();
    let config = args.engine_config()?;

    let registry = Registry::builder().properties(scale::properties());

    let mut builder =
        Engine::builder(config, registry, Arc::new(scale::Scale), Arc::new(HostPower));
    if !args.no_local_radio {
        let (radio, events) = LoopbackRadio::new();
        builder = builder.local_radio(radio, events, Arc::new(HostNetwork::new()));
    }

    let engine = builder.build().context("failed to build engine")?;
    let handle = engine.handle();

    if let Some(addr) = &args.discovered_broker {
        handle.add_discovered_broker(addr.as_str());
    }

    tokio::spawn(sim::weigh(handle.clone()));
    tokio::spawn(sim::report(handle.clone()));

    tokio::select! {
        _ = engine.run() => tracing::info!("engine stopped"),
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            tracing::info!("interrupted");
        }
    }

    Ok(())
}
