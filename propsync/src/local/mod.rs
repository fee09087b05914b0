//! Local side: the attribute table served over a short-range radio.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use propsync_common::binary;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{Error, Result, lifecycle::ActivityClock, registry::Registry};

mod loopback;
mod radio;
pub mod table;

pub use self::{
    loopback::LoopbackRadio,
    radio::{PeerId, Radio, RadioEvent},
    table::{AttributeTable, PropertySlots, SlotRole},
};

/// Which transport is powered. Written by peers to the radio mode slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RadioMode {
    Network = 0,
    LocalRadio = 1,
}

impl TryFrom<u8> for RadioMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RadioMode::Network),
            1 => Ok(RadioMode::LocalRadio),
            other => Err(other),
        }
    }
}

/// Power switch for the network stack carrying the broker connection.
pub trait NetworkControl: Send + Sync + 'static {
    fn stop_network(&self) -> Result<()>;
    fn start_network(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Advertising,
    /// Most recent peer; the only one that receives indications
    Connected(PeerId),
}

impl LinkState {
    pub fn peer(self) -> Option<PeerId> {
        match self {
            LinkState::Connected(peer) => Some(peer),
            _ => None,
        }
    }
}

struct LocalState {
    table: AttributeTable,
    handles: Vec<u16>,
    slot_by_handle: HashMap<u16, usize>,
    /// Per registry index
    notify: Vec<bool>,
    link: LinkState,
    mode: RadioMode,
}

pub struct LocalAdapter {
    registry: Arc<Registry>,
    radio: Arc<dyn Radio>,
    network: Arc<dyn NetworkControl>,
    activity: ActivityClock,
    state: Mutex<LocalState>,
}

impl LocalAdapter {
    /// Builds the table from the registry's current values, registers it with
    /// the radio and starts advertising.
    pub fn start(
        registry: Arc<Registry>,
        radio: Arc<dyn Radio>,
        network: Arc<dyn NetworkControl>,
        activity: ActivityClock,
    ) -> Result<Arc<Self>> {
        let table = AttributeTable::build(&registry);

        let handles = radio.register(&table)?;
        if handles.len() != table.len() {
            return Err(Error::TableMismatch { expected: table.len(), found: handles.len() });
        }

        let slot_by_handle = handles.iter().enumerate().map(|(slot, h)| (*h, slot)).collect();

        radio.start_advertising()?;
        tracing::info!(slots = table.len(), "local radio service started");

        Ok(Arc::new(Self {
            state: Mutex::new(LocalState {
                notify: vec![false; registry.len()],
                table,
                handles,
                slot_by_handle,
                link: LinkState::Advertising,
                mode: RadioMode::Network,
            }),
            registry,
            radio,
            network,
            activity,
        }))
    }

    fn state(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn link(&self) -> LinkState {
        self.state().link
    }

    pub fn mode(&self) -> RadioMode {
        self.state().mode
    }

    pub fn notifications_enabled(&self, index: usize) -> bool {
        self.state().notify.get(index).copied().unwrap_or(false)
    }

    pub async fn run(self: Arc<Self>, mut events: UnboundedReceiver<RadioEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }

        tracing::warn!("local radio event stream ended");
    }

    pub fn handle_event(&self, event: RadioEvent) {
        match event {
            RadioEvent::Connected(peer) => {
                tracing::info!(peer, "local peer connected");
                self.state().link = LinkState::Connected(peer);
            }
            RadioEvent::Disconnected(peer) => {
                tracing::info!(peer, "local peer disconnected");

                let mut state = self.state();
                if state.link != LinkState::Connected(peer) {
                    return;
                }
                state.link = LinkState::Advertising;
                drop(state);

                if let Err(e) = self.radio.start_advertising() {
                    tracing::error!("failed to restart advertising: {e}");
                }
            }
            RadioEvent::Write { peer, handle, data } => {
                let role = {
                    let mut state = self.state();
                    state.link = LinkState::Connected(peer);
                    state
                        .slot_by_handle
                        .get(&handle)
                        .and_then(|slot| state.table.role(*slot))
                };

                let Some(role) = role else {
                    tracing::warn!(peer, handle, "write to unknown handle");
                    return;
                };

                self.activity.touch();

                match role {
                    SlotRole::Console => {
                        let text = String::from_utf8_lossy(&data);
                        tracing::info!(peer, bytes = ?data.as_ref(), %text, "console write");
                    }
                    SlotRole::RadioMode => self.write_mode(&data),
                    SlotRole::Value(index) => self.write_value(peer, index, &data),
                    SlotRole::Config(index) => self.write_config(index, &data),
                    SlotRole::Service | SlotRole::Declaration | SlotRole::Description(_) => {
                        tracing::warn!(peer, handle, "write to read-only slot");
                    }
                }
            }
        }
    }

    fn write_value(&self, peer: PeerId, index: usize, data: &[u8]) {
        let Some(prop) = self.registry.at(index) else {
            return;
        };

        if !prop.access().writeable {
            tracing::warn!(name = %prop.name(), "local write to non-writeable property");
            return;
        }

        let value = match binary::decode(prop.kind(), data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(name = %prop.name(), ?data, "ignoring local write: {e}");
                return;
            }
        };

        tracing::info!(name = %prop.name(), %value, "set from local radio");

        if let Err(e) = self.registry.set_at(index, value) {
            tracing::warn!(name = %prop.name(), "ignoring local write: {e}");
            return;
        }

        if let Err(e) = self.refresh(index, Some(peer)) {
            tracing::error!(name = %prop.name(), "failed to refresh local value: {e}");
        }
    }

    fn write_config(&self, index: usize, data: &[u8]) {
        let &[lo, hi, ..] = data else {
            tracing::warn!(index, ?data, "client configuration write too short");
            return;
        };

        let enabled = u16::from_le_bytes([lo, hi]) & 0x0003 != 0;
        tracing::debug!(index, enabled, "client configuration write");

        let mut state = self.state();
        state.notify[index] = enabled;
        if let Some(slot) = state.table.slots(index).and_then(|s| s.config) {
            state.table.store(slot, &[lo, hi]);
        }
    }

    fn write_mode(&self, data: &[u8]) {
        let Some(&raw) = data.first() else {
            return;
        };

        let mode = match RadioMode::try_from(raw) {
            Ok(mode) => mode,
            Err(other) => {
                tracing::warn!(mode = other, "unknown radio mode");
                return;
            }
        };

        {
            let mut state = self.state();
            state.mode = mode;
            state.table.store(table::RADIO_MODE_VALUE, &[raw]);
        }

        match mode {
            RadioMode::LocalRadio => {
                tracing::info!("switching to local radio, stopping network");

                if let Err(e) = self.network.stop_network() {
                    tracing::error!("failed to stop network: {e}");
                }
                if let Err(e) = self.radio.start_advertising() {
                    tracing::error!("failed to restart advertising: {e}");
                }

                self.registry.collaborator().on_first_ready(&self.registry);
            }
            RadioMode::Network => {
                tracing::info!("switching to network");

                if let Err(e) = self.network.start_network() {
                    tracing::error!("failed to start network: {e}");
                }
            }
        }
    }

    /// Pushes the current value of the property at `index` to the radio and
    /// indicates it to the connected peer if it enabled notifications.
    pub fn indicate(&self, index: usize) -> Result<()> {
        self.refresh(index, None)
    }

    fn refresh(&self, index: usize, peer: Option<PeerId>) -> Result<()> {
        let prop = self
            .registry
            .at(index)
            .ok_or_else(|| Error::NotFound(format!("#{index}")))?;
        let bytes = binary::encode(&prop.value());

        let (handle, notify, peer) = {
            let mut state = self.state();
            let Some(slots) = state.table.slots(index) else {
                return Ok(());
            };

            state.table.store(slots.value, &bytes);
            let peer = peer.or(state.link.peer());
            (state.handles[slots.value], state.notify[index], peer)
        };

        self.radio.set_value(handle, &bytes)?;

        if let (true, Some(peer)) = (notify, peer) {
            tracing::debug!(name = %prop.name(), peer, "indicating");
            self.radio.indicate(peer, handle, &bytes)?;
        }

        Ok(())
    }
}
