//! Device-specific behaviour plugged into the engine.

use propsync_common::PropName;

use crate::registry::Registry;

/// Callbacks a device capability set provides. Every method runs inline on the
/// task that triggered it and has a no-op default.
pub trait Collaborator: Send + Sync + 'static {
    /// A transport wrote `name`. Runs once per successful [`Registry::set`], after
    /// the new value is stored. Clamping or rejecting a value is done by writing
    /// the corrected value back with [`Registry::update`].
    fn on_property_mutated(&self, registry: &Registry, name: &PropName) {
        let _ = (registry, name);
    }

    /// The broker accepted a connection, or the local radio became the active
    /// transport. Delivered again on every reconnection.
    fn on_first_ready(&self, registry: &Registry) {
        let _ = registry;
    }

    /// Last call before deep sleep. Quiesce displays and peripherals here.
    fn on_before_sleep(&self, registry: &Registry) {
        let _ = registry;
    }

    /// An inbound envelope with a method the engine does not handle itself.
    fn on_action(&self, registry: &Registry, payload: &serde_json::Value) {
        let _ = (registry, payload);
    }
}

impl Collaborator for () {}
