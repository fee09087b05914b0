use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use propsync_common::{
    Access, Bounds, PropName, PropertySpec, Value, ValueKind,
    command::Report,
};

use crate::{Error, Result, hooks::Collaborator};

struct Entry {
    name: PropName,
    kind: ValueKind,
    access: Access,
    bounds: Bounds,
    identity: bool,
    value: RwLock<Value>,
    busy: AtomicBool,
}

/// The set of device properties, fixed at construction.
///
/// Values sit behind a lock per property, so the broker, the local radio and
/// collaborator tasks can all read and write through a shared `Arc<Registry>`.
pub struct Registry {
    entries: Box<[Entry]>,
    index: HashMap<PropName, usize>,
    hook: Arc<dyn Collaborator>,
}

#[derive(Default)]
pub struct RegistryBuilder {
    specs: Vec<PropertySpec>,
    hook: Option<Arc<dyn Collaborator>>,
}

impl RegistryBuilder {
    pub fn property(mut self, spec: PropertySpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn properties(mut self, specs: impl IntoIterator<Item = PropertySpec>) -> Self {
        self.specs.extend(specs);
        self
    }

    pub fn hook(mut self, hook: Arc<dyn Collaborator>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Validates names and the identity property. The identity property, if
    /// any, is moved to the front; everything else keeps registration order.
    pub fn build(self) -> Result<Registry> {
        let mut specs = self.specs;

        let mut identity = None;
        for (i, spec) in specs.iter().enumerate() {
            if !spec.identity {
                continue;
            }

            let well_formed =
                spec.readable && !spec.writeable && spec.kind() == ValueKind::Text;

            if !well_formed || identity.is_some() {
                return Err(Error::Identity(spec.name.to_string()));
            }

            identity = Some(i);
        }

        if let Some(i) = identity {
            let spec = specs.remove(i);
            specs.insert(0, spec);
        }

        let mut index = HashMap::with_capacity(specs.len());
        let mut entries = Vec::with_capacity(specs.len());

        for (i, spec) in specs.into_iter().enumerate() {
            let name = PropName::new(&spec.name)?;

            if index.insert(name.clone(), i).is_some() {
                return Err(Error::DuplicateName(name.to_string()));
            }

            entries.push(Entry {
                name,
                kind: spec.kind(),
                access: Access { readable: spec.readable, writeable: spec.writeable },
                bounds: Bounds { min: spec.min, max: spec.max },
                identity: spec.identity,
                value: RwLock::new(spec.initial),
                busy: AtomicBool::new(false),
            });
        }

        Ok(Registry {
            entries: entries.into_boxed_slice(),
            index,
            hook: self.hook.unwrap_or_else(|| Arc::new(())),
        })
    }
}

/// Borrowed view of one registered property.
#[derive(Clone, Copy)]
pub struct PropertyRef<'a> {
    index: usize,
    entry: &'a Entry,
}

impl<'a> PropertyRef<'a> {
    /// Position in registration order, stable for the life of the registry
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &'a PropName {
        &self.entry.name
    }

    pub fn kind(&self) -> ValueKind {
        self.entry.kind
    }

    pub fn access(&self) -> Access {
        self.entry.access
    }

    pub fn bounds(&self) -> Bounds {
        self.entry.bounds
    }

    pub fn is_identity(&self) -> bool {
        self.entry.identity
    }

    pub fn value(&self) -> Value {
        self.entry.value.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Collaborator-owned flag; the engine never reads it.
    pub fn is_busy(&self) -> bool {
        self.entry.busy.load(Ordering::Acquire)
    }

    pub fn set_busy(&self, busy: bool) {
        self.entry.busy.store(busy, Ordering::Release);
    }
}

impl std::fmt::Debug for PropertyRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyRef")
            .field("index", &self.index)
            .field("name", &self.entry.name)
            .field("value", &self.value())
            .finish()
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn collaborator(&self) -> &dyn Collaborator {
        self.hook.as_ref()
    }

    pub fn find(&self, name: &str) -> Result<PropertyRef<'_>> {
        self.index
            .get(name)
            .map(|&index| PropertyRef { index, entry: &self.entries[index] })
            .ok_or_else(|| Error::NotFound(name.to_owned()))
    }

    pub fn at(&self, index: usize) -> Option<PropertyRef<'_>> {
        self.entries.get(index).map(|entry| PropertyRef { index, entry })
    }

    pub fn iter(&self) -> impl Iterator<Item = PropertyRef<'_>> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, entry)| PropertyRef { index, entry })
    }

    pub fn for_each(&self, visitor: impl FnMut(PropertyRef<'_>)) {
        self.iter().for_each(visitor);
    }

    pub fn identity(&self) -> Option<PropertyRef<'_>> {
        self.at(0).filter(|p| p.is_identity())
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        Ok(self.find(name)?.value())
    }

    /// Stores `value` and runs the mutation hook once. Every transport write
    /// goes through here.
    pub fn set(&self, name: &str, value: Value) -> Result<()> {
        let index = self.find(name)?.index;
        self.set_at(index, value)
    }

    pub fn set_at(&self, index: usize, value: Value) -> Result<()> {
        let entry = self.store(index, value)?;
        self.hook.on_property_mutated(self, &entry.name);
        Ok(())
    }

    /// Stores `value` without running the mutation hook. Used by collaborators
    /// for sensor readings and for writing back corrected values.
    pub fn update(&self, name: &str, value: Value) -> Result<()> {
        let index = self.find(name)?.index;
        self.store(index, value).map(|_| ())
    }

    fn store(&self, index: usize, value: Value) -> Result<&Entry> {
        let entry = self
            .entries
            .get(index)
            .ok_or_else(|| Error::NotFound(format!("#{index}")))?;

        if value.kind() != entry.kind {
            return Err(Error::TypeMismatch {
                name: entry.name.to_string(),
                expected: entry.kind,
                found: value.kind(),
            });
        }

        tracing::trace!(name = %entry.name, %value, "storing property");

        *entry.value.write().unwrap_or_else(PoisonError::into_inner) = value;

        Ok(entry)
    }

    /// Every readable property, identity first.
    pub fn report(&self) -> Report {
        let mut report = Report::default();
        for prop in self.iter().filter(|p| p.access().readable) {
            report.push(prop.name().clone(), prop.value());
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        mutated: Mutex<Vec<String>>,
    }

    impl Collaborator for Recorder {
        fn on_property_mutated(&self, registry: &Registry, name: &PropName) {
            // the new value is already visible to the hook
            let _ = registry.get(name).unwrap();
            self.mutated.lock().unwrap().push(name.to_string());
        }
    }

    fn fixture() -> RegistryBuilder {
        Registry::builder()
            .property(PropertySpec::integer("voltage", 0).read_write())
            .property(PropertySpec::integer("sleep_time", 7200).read_write())
            .property(PropertySpec::float("pressure", 0.0).readable())
            .property(PropertySpec::text("label", "").writeable())
            .property(PropertySpec::integer("raw_adc", 0))
            .property(PropertySpec::identity("device_type", "TD01"))
    }

    #[test]
    fn read_after_write() {
        let registry = fixture().build().unwrap();

        registry.set("voltage", Value::Integer(42)).unwrap();
        assert_eq!(registry.get("voltage").unwrap(), Value::Integer(42));

        registry.set("pressure", Value::Float(1.25)).unwrap();
        assert_eq!(registry.get("pressure").unwrap(), Value::Float(1.25));

        registry.set("label", Value::from("hello")).unwrap();
        assert_eq!(registry.get("label").unwrap(), Value::from("hello"));
    }

    #[test]
    fn type_mismatch_leaves_value() {
        let registry = fixture().build().unwrap();

        let err = registry.set("voltage", Value::Float(1.0)).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch {
            expected: ValueKind::Integer,
            found: ValueKind::Float,
            ..
        }));
        assert_eq!(registry.get("voltage").unwrap(), Value::Integer(0));
    }

    #[test]
    fn unknown_name() {
        let registry = fixture().build().unwrap();
        assert!(matches!(registry.get("nope"), Err(Error::NotFound(name)) if name == "nope"));
        assert!(matches!(registry.set("nope", Value::Integer(1)), Err(Error::NotFound(_))));
        assert!(registry.find("Voltage").is_err());
    }

    #[test]
    fn hook_fires_once_per_set_and_never_for_update() {
        let recorder = Arc::new(Recorder::default());
        let registry = fixture().hook(recorder.clone()).build().unwrap();

        registry.set("voltage", Value::Integer(1)).unwrap();
        registry.set("voltage", Value::Integer(1)).unwrap();
        registry.update("voltage", Value::Integer(2)).unwrap();
        let _ = registry.set("voltage", Value::from("x"));
        let _ = registry.set("missing", Value::Integer(3));

        assert_eq!(*recorder.mutated.lock().unwrap(), ["voltage", "voltage"]);
        assert_eq!(registry.get("voltage").unwrap(), Value::Integer(2));
    }

    #[test]
    fn identity_leads_iteration() {
        let registry = fixture().build().unwrap();

        let names: Vec<_> = registry.iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, [
            "device_type",
            "voltage",
            "sleep_time",
            "pressure",
            "label",
            "raw_adc"
        ]);
        assert_eq!(registry.identity().unwrap().name(), "device_type");
        assert_eq!(registry.find("pressure").unwrap().index(), 3);
    }

    #[test]
    fn report_lists_readable_properties() {
        let registry = fixture().build().unwrap();
        let report = registry.report();

        let names: Vec<_> = report.entries.iter().map(|(n, _)| n.to_string()).collect();
        assert_eq!(names, ["device_type", "voltage", "sleep_time", "pressure"]);
        assert_eq!(report.entries[0].1, Value::from("TD01"));
    }

    #[test]
    fn rejects_bad_registrations() {
        let dup = Registry::builder()
            .property(PropertySpec::integer("a", 0))
            .property(PropertySpec::float("a", 0.0))
            .build();
        assert!(matches!(dup, Err(Error::DuplicateName(name)) if name == "a"));

        let long = Registry::builder().property(PropertySpec::integer("x".repeat(32), 0)).build();
        assert!(matches!(long, Err(Error::Name(_))));

        let two = Registry::builder()
            .property(PropertySpec::identity("device_type", "A"))
            .property(PropertySpec::identity("model", "B"))
            .build();
        assert!(matches!(two, Err(Error::Identity(name)) if name == "model"));

        let writeable = Registry::builder()
            .property(PropertySpec { identity: true, ..PropertySpec::text("t", "A").read_write() })
            .build();
        assert!(matches!(writeable, Err(Error::Identity(_))));
    }

    #[test]
    fn busy_flag_is_opaque() {
        let registry = fixture().build().unwrap();
        let prop = registry.find("pressure").unwrap();

        assert!(!prop.is_busy());
        prop.set_busy(true);
        assert!(registry.find("pressure").unwrap().is_busy());
        registry.set("pressure", Value::Float(2.0)).unwrap();
        assert!(registry.find("pressure").unwrap().is_busy());
    }

    #[test]
    fn for_each_visits_in_order() {
        let registry = fixture().build().unwrap();
        let mut seen = Vec::new();
        registry.for_each(|p| seen.push(p.index()));
        assert_eq!(seen, [0, 1, 2, 3, 4, 5]);
    }
}
