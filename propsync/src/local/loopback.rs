//! In-memory radio for hosts without a peripheral-capable adapter, and for tests.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::Bytes;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use super::{
    radio::{PeerId, Radio, RadioEvent},
    table::AttributeTable,
};
use crate::{Error, Result};

/// First handle handed out by [`LoopbackRadio::register`].
pub const HANDLE_BASE: u16 = 40;

#[derive(Debug, Default)]
struct State {
    handles: Vec<u16>,
    values: BTreeMap<u16, Vec<u8>>,
    indications: Vec<(PeerId, u16, Vec<u8>)>,
    advertising: u32,
}

/// Radio that keeps the attribute values in memory. Peer activity is injected
/// with [`connect`](Self::connect) and [`write`](Self::write).
#[derive(Debug)]
pub struct LoopbackRadio {
    state: Mutex<State>,
    events: UnboundedSender<RadioEvent>,
}

impl LoopbackRadio {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<RadioEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let radio = Arc::new(Self { state: Mutex::new(State::default()), events: tx });
        (radio, rx)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: RadioEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| Error::Radio("event receiver dropped".into()))
    }

    pub fn connect(&self, peer: PeerId) -> Result<()> {
        self.emit(RadioEvent::Connected(peer))
    }

    pub fn disconnect(&self, peer: PeerId) -> Result<()> {
        self.emit(RadioEvent::Disconnected(peer))
    }

    /// Simulates a peer writing `data` to table slot `slot`.
    pub fn write(&self, peer: PeerId, slot: usize, data: &[u8]) -> Result<()> {
        let handle = self.handle(slot).ok_or_else(|| Error::Radio(format!("no slot {slot}")))?;
        self.emit(RadioEvent::Write { peer, handle, data: Bytes::copy_from_slice(data) })
    }

    pub fn handle(&self, slot: usize) -> Option<u16> {
        self.state().handles.get(slot).copied()
    }

    /// Current value of table slot `slot` as a peer would read it.
    pub fn value(&self, slot: usize) -> Option<Vec<u8>> {
        let state = self.state();
        let handle = state.handles.get(slot)?;
        state.values.get(handle).cloned()
    }

    /// Drains the indications sent so far.
    pub fn take_indications(&self) -> Vec<(PeerId, u16, Vec<u8>)> {
        std::mem::take(&mut self.state().indications)
    }

    pub fn advertise_count(&self) -> u32 {
        self.state().advertising
    }
}

impl Radio for LoopbackRadio {
    fn register(&self, table: &AttributeTable) -> Result<Vec<u16>> {
        let handles: Vec<u16> = (0..table.len()).map(|slot| HANDLE_BASE + slot as u16).collect();
        let values = handles
            .iter()
            .zip(table.attributes())
            .map(|(handle, attr)| (*handle, attr.value.clone()))
            .collect();

        let mut state = self.state();
        state.handles = handles.clone();
        state.values = values;

        tracing::debug!(slots = table.len(), "loopback service registered");

        Ok(handles)
    }

    fn start_advertising(&self) -> Result<()> {
        self.state().advertising += 1;
        Ok(())
    }

    fn set_value(&self, handle: u16, value: &[u8]) -> Result<()> {
        match self.state().values.get_mut(&handle) {
            Some(slot) => {
                *slot = value.to_vec();
                Ok(())
            }
            None => Err(Error::Radio(format!("unknown handle {handle}"))),
        }
    }

    fn indicate(&self, peer: PeerId, handle: u16, value: &[u8]) -> Result<()> {
        tracing::trace!(peer, handle, ?value, "indicate");
        self.state().indications.push((peer, handle, value.to_vec()));
        Ok(())
    }
}
