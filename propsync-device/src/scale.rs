//! Capability set of the DZC01 kitchen scale.

use propsync::{
    Collaborator, Registry,
    common::{PropName, PropertySpec, Value},
};

pub const DEVICE_TYPE: &str = "DZC01";

pub const WEIGHT: &str = "weight";
pub const REPORT_DELAY_MS: &str = "report_delay_ms";
pub const BUTTON2: &str = "button2";
pub const LINE1_TEXT: &str = "line1_text";

/// Heaviest load the cell reports, in grams.
pub const WEIGHT_LIMIT: i32 = 5000;

pub fn properties() -> Vec<PropertySpec> {
    vec![
        PropertySpec::identity("device_type", DEVICE_TYPE),
        PropertySpec::integer("sleep_time", 7200).read_write(),
        PropertySpec::integer("battery", 0).readable(),
        PropertySpec::integer(WEIGHT, 0).readable().bounds(0, WEIGHT_LIMIT),
        PropertySpec::integer(REPORT_DELAY_MS, 5000).read_write().bounds(100, 5000),
        PropertySpec::integer("display_mode", 1).read_write().bounds(0, 2),
        PropertySpec::integer("display_on", 1).read_write().bounds(0, 1),
        PropertySpec::integer("display_contrast", 255).read_write().bounds(0, 255),
        PropertySpec::text(LINE1_TEXT, "").read_write(),
        PropertySpec::text("line2_text", "").read_write(),
        PropertySpec::integer(BUTTON2, 0).readable(),
    ]
}

#[derive(Debug, Default)]
pub struct Scale;

impl Collaborator for Scale {
    fn on_property_mutated(&self, registry: &Registry, name: &PropName) {
        let Ok(prop) = registry.find(name) else {
            return;
        };

        let Value::Integer(v) = prop.value() else {
            return;
        };

        let clamped = prop.bounds().clamp(v);
        if clamped != v {
            tracing::info!(%name, requested = v, clamped, "value out of range");
            if let Err(e) = registry.update(name, Value::Integer(clamped)) {
                tracing::error!(%name, "failed to write back clamped value: {e}");
            }
        }

        match name.as_str() {
            "display_contrast" => tracing::info!(contrast = clamped, "display contrast"),
            "display_on" => tracing::info!(on = clamped != 0, "display power"),
            _ => {}
        }
    }

    fn on_first_ready(&self, registry: &Registry) {
        if let Err(e) = registry.update(LINE1_TEXT, Value::from("Connected")) {
            tracing::error!("failed to update {LINE1_TEXT}: {e}");
        }
    }

    fn on_before_sleep(&self, _: &Registry) {
        tracing::info!("display off");
    }

    fn on_action(&self, _: &Registry, payload: &serde_json::Value) {
        tracing::info!(%payload, "no custom actions");
    }
}
