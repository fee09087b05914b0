//! Applies decoded broker commands to the registry.

use std::sync::Arc;

use propsync_common::{
    Value,
    command::{Command, MsgId, Outbound},
};

use crate::{Error, Result, lifecycle::ActivityClock, registry::Registry};

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    activity: ActivityClock,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, activity: ActivityClock) -> Self {
        Self { registry, activity }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Decodes one inbound payload and applies it. Returns the messages to
    /// publish in response; malformed payloads produce none.
    pub fn handle_payload(&self, payload: &[u8]) -> Vec<Outbound> {
        let command = match Command::decode(payload) {
            Ok(command) => command,
            Err(e) => {
                let text = String::from_utf8_lossy(payload);
                tracing::warn!(payload = %text, "dropping inbound message: {e}");
                return Vec::new();
            }
        };

        self.activity.touch();
        self.apply(command)
    }

    pub fn apply(&self, command: Command) -> Vec<Outbound> {
        tracing::debug!(method = command.method(), "applying command");

        match command {
            Command::Get { key, msg_id } => {
                self.get(&key, msg_id).map_or_else(skip, |out| vec![out])
            }
            Command::Set { key, value, msg_id } => {
                self.set(&key, &value, msg_id).map_or_else(skip, |out| vec![out])
            }
            Command::Update { entries, msg_id } => entries
                .iter()
                .filter_map(|(key, value)| match self.set(key, value, msg_id) {
                    Ok(out) => Some(out),
                    Err(e) => {
                        tracing::warn!(%key, "skipping key of update: {e}");
                        None
                    }
                })
                .collect(),
            Command::Action(payload) => {
                self.registry.collaborator().on_action(&self.registry, &payload);
                Vec::new()
            }
        }
    }

    pub fn get(&self, key: &str, msg_id: MsgId) -> Result<Outbound> {
        let prop = self.registry.find(key)?;

        if !prop.access().readable {
            return Err(Error::AccessDenied { name: key.to_owned(), access: "readable" });
        }

        Ok(Outbound::Update { msg_id, key: prop.name().clone(), value: prop.value() })
    }

    /// Coerces `value` to the property's kind and stores it through
    /// [`Registry::set`]. The echo carries the value as it stands after the
    /// mutation hook ran.
    pub fn set(&self, key: &str, value: &serde_json::Value, msg_id: MsgId) -> Result<Outbound> {
        let prop = self.registry.find(key)?;

        if !prop.access().writeable {
            return Err(Error::AccessDenied { name: key.to_owned(), access: "writeable" });
        }

        let value = Value::coerce(prop.kind(), value)?;
        tracing::info!(%key, %value, "set from broker");

        self.registry.set_at(prop.index(), value)?;

        Ok(Outbound::Update { msg_id, key: prop.name().clone(), value: prop.value() })
    }

    pub fn report(&self) -> Outbound {
        Outbound::Report(self.registry.report())
    }
}

fn skip(e: Error) -> Vec<Outbound> {
    tracing::warn!("skipping command: {e}");
    Vec::new()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use propsync_common::{Bounds, PropName, PropertySpec};
    use serde_json::json;

    use super::*;
    use crate::hooks::Collaborator;

    /// Clamps integers to their bounds, like a device driver would.
    #[derive(Default)]
    struct Clamp {
        actions: Mutex<Vec<serde_json::Value>>,
    }

    impl Collaborator for Clamp {
        fn on_property_mutated(&self, registry: &Registry, name: &PropName) {
            let prop = registry.find(name).unwrap();
            if let Value::Integer(v) = prop.value() {
                registry.update(name, Value::Integer(prop.bounds().clamp(v))).unwrap();
            }
        }

        fn on_action(&self, _: &Registry, payload: &serde_json::Value) {
            self.actions.lock().unwrap().push(payload.clone());
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<Clamp>) {
        let hooks = Arc::new(Clamp::default());
        let registry = Registry::builder()
            .property(PropertySpec::identity("device_type", "DZC01"))
            .property(PropertySpec::integer("voltage", 0).read_write())
            .property(PropertySpec::integer("report_delay_ms", 200).read_write().bounds(100, 5000))
            .property(PropertySpec::float("weight", 0.0).readable())
            .property(PropertySpec::text("line1_text", "").read_write())
            .property(PropertySpec::integer("secret", 9).writeable())
            .hook(hooks.clone())
            .build()
            .unwrap();

        (Dispatcher::new(Arc::new(registry), ActivityClock::new()), hooks)
    }

    fn to_json(out: &[Outbound]) -> Vec<serde_json::Value> {
        out.iter().map(|o| serde_json::to_value(o).unwrap()).collect()
    }

    #[test]
    fn set_then_get() {
        let (dispatcher, _) = dispatcher();

        let out = dispatcher.handle_payload(br#"{"method":"set","key":"voltage","value":42}"#);
        assert_eq!(to_json(&out), [
            json!({"method": "update", "msg_id": -1, "key": "voltage", "value": 42})
        ]);
        assert_eq!(dispatcher.registry().get("voltage").unwrap(), Value::Integer(42));

        let out = dispatcher.handle_payload(br#"{"method":"get","key":"voltage","msg_id":9}"#);
        assert_eq!(to_json(&out), [
            json!({"method": "update", "msg_id": 9, "key": "voltage", "value": 42})
        ]);
    }

    #[test]
    fn unknown_key_is_silent() {
        let (dispatcher, _) = dispatcher();
        assert!(dispatcher.handle_payload(br#"{"method":"set","key":"nope","value":1}"#).is_empty());
        assert!(dispatcher.handle_payload(br#"{"method":"get","key":"nope"}"#).is_empty());
    }

    #[test]
    fn echo_reflects_clamped_value() {
        let (dispatcher, _) = dispatcher();

        let out = dispatcher
            .handle_payload(br#"{"method":"set","key":"report_delay_ms","value":20,"msg_id":4}"#);
        assert_eq!(to_json(&out), [
            json!({"method": "update", "msg_id": 4, "key": "report_delay_ms", "value": 100})
        ]);
        assert_eq!(
            dispatcher.registry().find("report_delay_ms").unwrap().bounds(),
            Bounds { min: Some(100), max: Some(5000) }
        );
    }

    #[test]
    fn access_flags_are_enforced() {
        let (dispatcher, _) = dispatcher();

        assert!(dispatcher.handle_payload(br#"{"method":"set","key":"weight","value":1.0}"#).is_empty());
        assert!(dispatcher.handle_payload(br#"{"method":"get","key":"secret"}"#).is_empty());
        assert!(matches!(
            dispatcher.set("device_type", &json!("X"), 1),
            Err(Error::AccessDenied { access: "writeable", .. })
        ));
    }

    #[test]
    fn type_mismatch_is_skipped() {
        let (dispatcher, _) = dispatcher();

        assert!(dispatcher.handle_payload(br#"{"method":"set","key":"voltage","value":"hi"}"#).is_empty());
        assert_eq!(dispatcher.registry().get("voltage").unwrap(), Value::Integer(0));
        assert!(matches!(dispatcher.set("line1_text", &json!(5), 1), Err(Error::Coerce(_))));
    }

    #[test]
    fn update_applies_keys_independently() {
        let (dispatcher, _) = dispatcher();

        let out = dispatcher.handle_payload(
            br#"{"method":"update","voltage":7,"nope":1,"weight":3.0,"line1_text":"hi","msg_id":5}"#,
        );
        assert_eq!(to_json(&out), [
            json!({"method": "update", "msg_id": 5, "key": "voltage", "value": 7}),
            json!({"method": "update", "msg_id": 5, "key": "line1_text", "value": "hi"}),
        ]);
        assert_eq!(dispatcher.registry().get("voltage").unwrap(), Value::Integer(7));
        assert_eq!(dispatcher.registry().get("weight").unwrap(), Value::Float(0.0));
    }

    #[test]
    fn other_methods_go_to_the_collaborator() {
        let (dispatcher, hooks) = dispatcher();

        let out = dispatcher.handle_payload(br#"{"method":"tare","msg_id":3}"#);
        assert!(out.is_empty());
        assert_eq!(*hooks.actions.lock().unwrap(), [json!({"method": "tare", "msg_id": 3})]);
    }

    #[test]
    fn malformed_payloads_are_dropped() {
        let (dispatcher, _) = dispatcher();
        assert!(dispatcher.handle_payload(b"{oops").is_empty());
        assert!(dispatcher.handle_payload(br#"{"key":"voltage"}"#).is_empty());
    }

    #[test]
    fn report_shape() {
        let (dispatcher, _) = dispatcher();
        dispatcher.registry().update("weight", Value::Float(1.5)).unwrap();

        assert_eq!(
            serde_json::to_string(&dispatcher.report()).unwrap(),
            r#"{"method":"report","device_type":"DZC01","voltage":0,"report_delay_ms":200,"weight":1.5,"line1_text":""}"#
        );
    }
}
