use std::time::Duration;

use anyhow::Context as _;
use btleplug::api::Peripheral as _;
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt as _;
use propsync::local::RadioMode;
use propsync_common::{PropText, Value, ValueKind};

mod gatt;

type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("btleplug error: {0}")]
    Btleplug(#[from] btleplug::Error),
    #[error("no bluetooth adapter found")]
    NoAdapter,
    #[error("device {0:?} not found")]
    DeviceNotFound(String),
    #[error("device has no property {0:?}")]
    NoSuchProperty(String),
}

#[derive(Parser)]
struct Args {
    /// Seconds to scan before giving up on a device
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List devices advertising the property service
    Scan,
    /// Read one property, or list all of them
    Read {
        device: String,
        key: Option<String>,
        #[arg(long, value_enum, default_value_t = Kind::Integer)]
        kind: Kind,
    },
    /// Write one property
    Write {
        device: String,
        key: String,
        value: String,
        #[arg(long, value_enum, default_value_t = Kind::Integer)]
        kind: Kind,
    },
    /// Switch the device between its network and the local radio
    Mode { device: String, mode: Mode },
    /// Print indications as they arrive
    Watch {
        device: String,
        #[arg(long, value_enum, default_value_t = Kind::Integer)]
        kind: Kind,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Integer,
    Float,
    Text,
}

impl From<Kind> for ValueKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Integer => ValueKind::Integer,
            Kind::Float => ValueKind::Float,
            Kind::Text => ValueKind::Text,
        }
    }
}

impl Kind {
    fn parse(self, input: &str) -> anyhow::Result<Value> {
        Ok(match self {
            Kind::Integer => Value::Integer(input.parse().context("not an integer")?),
            Kind::Float => Value::Float(input.parse().context("not a float")?),
            Kind::Text => Value::Text(PropText::new(input)),
        })
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Network,
    Local,
}

impl From<Mode> for RadioMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Network => RadioMode::Network,
            Mode::Local => RadioMode::LocalRadio,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    propsync::log::init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);
    let central = gatt::adapter().await?;

    match args.command {
        Command::Scan => {
            let mut sightings = gatt::scan(&central).await?;
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    sighting = sightings.recv() => {
                        let Some(sighting) = sighting else { break };
                        let sighting = sighting?;
                        println!(
                            "{}  {}  {:>4}  {}",
                            sighting.timestamp.with_timezone(&Local).format("%H:%M:%S"),
                            sighting.address,
                            sighting.rssi.map(|r| r.to_string()).unwrap_or_default(),
                            sighting.name.as_deref().unwrap_or("?"),
                        );
                    }
                }
            }
        }

        Command::Read { device, key, kind } => {
            let peripheral = gatt::connect(&central, &device, timeout).await?;
            let properties = gatt::properties(&peripheral).await?;

            match key {
                Some(key) => {
                    let property = gatt::find(&properties, &key)?;
                    let raw = gatt::read(&peripheral, property).await?;
                    println!("{}", gatt::render(kind.into(), &raw));
                }
                None => {
                    for property in &properties {
                        let name = property.name.as_deref().unwrap_or("?");
                        match gatt::read(&peripheral, property).await {
                            Ok(raw) => println!(
                                "{:>3}  {name:<24} {}",
                                property.index,
                                gatt::render(kind.into(), &raw)
                            ),
                            Err(_) => println!("{:>3}  {name:<24} (write only)", property.index),
                        }
                    }
                }
            }

            peripheral.disconnect().await?;
        }

        Command::Write { device, key, value, kind } => {
            let value = kind.parse(&value)?;
            let peripheral = gatt::connect(&central, &device, timeout).await?;
            let properties = gatt::properties(&peripheral).await?;

            let property = gatt::find(&properties, &key)?;
            gatt::write(&peripheral, property, &value).await?;
            tracing::info!(index = property.index, ?value, "written");

            peripheral.disconnect().await?;
        }

        Command::Mode { device, mode } => {
            let peripheral = gatt::connect(&central, &device, timeout).await?;
            gatt::set_mode(&peripheral, RadioMode::from(mode) as u8).await?;
            peripheral.disconnect().await?;
        }

        Command::Watch { device, kind } => {
            let peripheral = gatt::connect(&central, &device, timeout).await?;
            let properties = gatt::properties(&peripheral).await?;
            let mut updates = gatt::watch(&peripheral, &properties).await?;

            while let Some((index, raw)) = updates.next().await {
                let name = properties
                    .iter()
                    .find(|p| p.index == index)
                    .and_then(|p| p.name.as_deref())
                    .unwrap_or("?");

                println!(
                    "{}  {name} = {}",
                    Local::now().format("%H:%M:%S%.3f"),
                    gatt::render(kind.into(), &raw)
                );
            }

            tracing::warn!("notification stream ended");
        }
    }

    Ok(())
}
