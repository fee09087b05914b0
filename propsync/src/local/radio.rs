use bytes::Bytes;

use super::table::AttributeTable;
use crate::Result;

/// Connection id assigned by the radio stack.
pub type PeerId = u16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    Connected(PeerId),
    Disconnected(PeerId),
    /// A peer wrote `data` to the attribute with this handle
    Write { peer: PeerId, handle: u16, data: Bytes },
}

/// Peripheral-side radio stack hosting the attribute table.
///
/// Calls are fire-and-forget; a stack that queues internally should return
/// as soon as the request is accepted.
pub trait Radio: Send + Sync + 'static {
    /// Creates the service. Returns one handle per table slot, in slot order.
    fn register(&self, table: &AttributeTable) -> Result<Vec<u16>>;

    fn start_advertising(&self) -> Result<()>;

    /// Updates the value a peer reads from `handle`.
    fn set_value(&self, handle: u16, value: &[u8]) -> Result<()>;

    fn indicate(&self, peer: PeerId, handle: u16, value: &[u8]) -> Result<()>;
}
