//! Central side of the local-radio service.

use std::time::Duration;

use btleplug::{
    api::{
        CharPropFlags, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _,
        ScanFilter, ValueNotification, WriteType,
        bleuuid::{BleUuid as _, uuid_from_u16},
    },
    platform::{Adapter, Manager, Peripheral},
};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt, stream::BoxStream};
use propsync::local::table::{
    PROPERTY_UUID_BASE, RADIO_MODE_UUID, SERVICE_UUID, USER_DESCRIPTION_UUID,
};
use propsync_common::{Value, ValueKind, binary};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{Error, Result};

#[derive(Debug)]
pub struct Sighting {
    pub name: Option<String>,
    pub address: String,
    pub rssi: Option<i16>,
    pub timestamp: DateTime<Utc>,
}

/// One value characteristic of a connected device.
#[derive(Debug, Clone)]
pub struct RemoteProperty {
    pub index: u16,
    pub name: Option<String>,
    pub characteristic: Characteristic,
}

pub async fn adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    manager.adapters().await?.into_iter().next().ok_or(Error::NoAdapter)
}

fn service_filter() -> ScanFilter {
    ScanFilter { services: vec![uuid_from_u16(SERVICE_UUID)] }
}

/// Devices advertising the property service, as they are seen.
pub async fn scan(central: &Adapter) -> Result<UnboundedReceiver<Result<Sighting>>> {
    let mut events = central.events().await?;
    central.start_scan(service_filter()).await?;

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let central = central.clone();

    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let (CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id)) = event
            else {
                continue;
            };

            let sighting = async {
                let peripheral = central.peripheral(&id).await?;
                let (name, rssi) = peripheral
                    .properties()
                    .await?
                    .map(|p| (p.local_name, p.rssi))
                    .unwrap_or_default();

                Ok::<_, Error>(Sighting {
                    name,
                    address: peripheral.address().to_string(),
                    rssi,
                    timestamp: Utc::now(),
                })
            };

            if tx.send(sighting.await).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

/// Scans until a device whose name or address matches `target` shows up, then
/// connects to it.
pub async fn connect(central: &Adapter, target: &str, timeout: Duration) -> Result<Peripheral> {
    let mut sightings = scan(central).await?;

    let found = tokio::time::timeout(timeout, async {
        while let Some(sighting) = sightings.recv().await {
            let sighting = sighting?;
            if sighting.address.eq_ignore_ascii_case(target)
                || sighting.name.as_deref() == Some(target)
            {
                return Ok(Some(sighting.address));
            }
        }
        Ok::<_, Error>(None)
    })
    .await
    .unwrap_or(Ok(None))?;

    central.stop_scan().await?;

    let Some(address) = found else {
        return Err(Error::DeviceNotFound(target.to_owned()));
    };

    for peripheral in central.peripherals().await? {
        if peripheral.address().to_string() == address {
            tracing::info!(%address, "connecting");
            peripheral.connect().await?;
            peripheral.discover_services().await?;
            return Ok(peripheral);
        }
    }

    Err(Error::DeviceNotFound(target.to_owned()))
}

/// Registry index encoded in a value characteristic's uuid.
pub fn property_index(uuid: u16) -> Option<u16> {
    uuid.checked_sub(PROPERTY_UUID_BASE)
}

/// Value characteristics of the property service, ordered by index.
pub async fn properties(peripheral: &Peripheral) -> Result<Vec<RemoteProperty>> {
    let service = uuid_from_u16(SERVICE_UUID);
    let description = uuid_from_u16(USER_DESCRIPTION_UUID);

    let mut found = Vec::new();
    for characteristic in peripheral.characteristics() {
        if characteristic.service_uuid != service {
            continue;
        }
        let Some(index) = characteristic.uuid.to_ble_u16().and_then(property_index) else {
            continue;
        };

        let name = match characteristic.descriptors.iter().find(|d| d.uuid == description) {
            Some(descriptor) => {
                let raw = peripheral.read_descriptor(descriptor).await?;
                Some(String::from_utf8_lossy(&raw).into_owned())
            }
            None => None,
        };

        found.push(RemoteProperty { index, name, characteristic });
    }

    found.sort_by_key(|p| p.index);
    Ok(found)
}

pub fn find<'a>(properties: &'a [RemoteProperty], key: &str) -> Result<&'a RemoteProperty> {
    properties
        .iter()
        .find(|p| p.name.as_deref() == Some(key) || key.parse() == Ok(p.index))
        .ok_or_else(|| Error::NoSuchProperty(key.to_owned()))
}

pub async fn read(peripheral: &Peripheral, property: &RemoteProperty) -> Result<Vec<u8>> {
    Ok(peripheral.read(&property.characteristic).await?)
}

pub async fn write(
    peripheral: &Peripheral,
    property: &RemoteProperty,
    value: &Value,
) -> Result<()> {
    let data = binary::encode(value);
    tracing::trace!(index = property.index, ?data, "write");
    peripheral
        .write(&property.characteristic, &data, WriteType::WithResponse)
        .await?;
    Ok(())
}

pub async fn set_mode(peripheral: &Peripheral, mode: u8) -> Result<()> {
    let uuid = uuid_from_u16(RADIO_MODE_UUID);
    let Some(control) = peripheral.characteristics().into_iter().find(|c| c.uuid == uuid) else {
        return Err(Error::NoSuchProperty("radio mode".into()));
    };

    peripheral.write(&control, &[mode], WriteType::WithoutResponse).await?;
    Ok(())
}

/// Subscribes to every readable property and yields `(index, raw value)`.
pub async fn watch(
    peripheral: &Peripheral,
    properties: &[RemoteProperty],
) -> Result<BoxStream<'static, (u16, Vec<u8>)>> {
    for property in properties {
        if property.characteristic.properties.contains(CharPropFlags::NOTIFY) {
            peripheral.subscribe(&property.characteristic).await?;
        }
    }

    Ok(property_values(peripheral.notifications().await?))
}

/// Keeps notifications from value characteristics, tagged with their index.
fn property_values(
    notifications: impl Stream<Item = ValueNotification> + Send + 'static,
) -> BoxStream<'static, (u16, Vec<u8>)> {
    notifications
        .filter_map(|n| async move {
            let index = n.uuid.to_ble_u16().and_then(property_index)?;
            Some((index, n.value))
        })
        .boxed()
}

/// Human-readable rendering of a raw value, falling back to hex when it does
/// not decode as `kind`.
pub fn render(kind: ValueKind, raw: &[u8]) -> String {
    match binary::decode(kind, raw) {
        Ok(Value::Integer(i)) => i.to_string(),
        Ok(Value::Float(f)) => f.to_string(),
        Ok(Value::Text(t)) => format!("{:?}", t.as_str()),
        Err(e) => {
            let hex = raw.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ");
            format!("[{hex}] ({e})")
        }
    }
}
