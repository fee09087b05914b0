use core::fmt::Display;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::PropText;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// 32-bit signed integer
    Integer,
    /// 32-bit float
    Float,
    /// Short UTF-8 string
    Text,
}

impl ValueKind {
    /// Size of the value slot this kind occupies in the characteristic table.
    pub const fn slot_len(self) -> usize {
        match self {
            ValueKind::Integer | ValueKind::Float => 4,
            ValueKind::Text => crate::TEXT_CAPACITY,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Text => "text",
        }
    }
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("expected {expected} value, got json {found}")]
pub struct CoerceError {
    pub expected: ValueKind,
    pub found: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i32),
    Float(f32),
    Text(PropText),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Converts a JSON scalar received from the broker into a value of `kind`.
    ///
    /// Integers accept any JSON number, truncated toward zero and saturated to
    /// the `i32` range. Floats accept any JSON number. Text accepts only strings.
    pub fn coerce(kind: ValueKind, json: &serde_json::Value) -> Result<Self, CoerceError> {
        let mismatch = || CoerceError { expected: kind, found: json_type(json) };

        match (kind, json) {
            (ValueKind::Integer, serde_json::Value::Number(n)) => {
                let v = match n.as_i64() {
                    Some(i) => i.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
                    None => n.as_f64().map(|f| f as i32).ok_or_else(mismatch)?,
                };
                Ok(Value::Integer(v))
            }
            (ValueKind::Float, serde_json::Value::Number(n)) => {
                n.as_f64().map(|f| Value::Float(f as f32)).ok_or_else(mismatch)
            }
            (ValueKind::Text, serde_json::Value::String(s)) => Ok(Value::Text(PropText::new(s))),
            _ => Err(mismatch()),
        }
    }
}

fn json_type(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Integer(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(PropText::new(value))
    }
}

impl From<PropText> for Value {
    fn from(value: PropText) -> Self {
        Value::Text(value)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
        }
    }
}

/// Build-time description of one property, supplied by the device's
/// capability set and turned into a registry entry at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySpec {
    pub name: CompactString,
    pub initial: Value,
    pub readable: bool,
    pub writeable: bool,
    /// Advisory lower bound, enforced by collaborators
    pub min: Option<i32>,
    /// Advisory upper bound, enforced by collaborators
    pub max: Option<i32>,
    /// Marks the device-type identity property
    pub identity: bool,
}

impl PropertySpec {
    pub fn new(name: impl Into<CompactString>, initial: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            initial: initial.into(),
            readable: false,
            writeable: false,
            min: None,
            max: None,
            identity: false,
        }
    }

    pub fn integer(name: impl Into<CompactString>, initial: i32) -> Self {
        Self::new(name, initial)
    }

    pub fn float(name: impl Into<CompactString>, initial: f32) -> Self {
        Self::new(name, initial)
    }

    pub fn text(name: impl Into<CompactString>, initial: &str) -> Self {
        Self::new(name, initial)
    }

    /// The read-only text property naming the device type.
    pub fn identity(name: impl Into<CompactString>, device_type: &str) -> Self {
        Self { identity: true, ..Self::text(name, device_type).readable() }
    }

    pub fn readable(mut self) -> Self {
        self.readable = true;
        self
    }

    pub fn writeable(mut self) -> Self {
        self.writeable = true;
        self
    }

    pub fn read_write(self) -> Self {
        self.readable().writeable()
    }

    pub fn bounds(mut self, min: i32, max: i32) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn kind(&self) -> ValueKind {
        self.initial.kind()
    }
}

/// Transport access flags of a registered property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub readable: bool,
    pub writeable: bool,
}

impl Access {
    pub const fn exposed(self) -> bool {
        self.readable || self.writeable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl Bounds {
    pub fn clamp(self, value: i32) -> i32 {
        let value = self.min.map_or(value, |min| value.max(min));
        self.max.map_or(value, |max| value.min(max))
    }
}
