use core::{borrow::Borrow, fmt::Display, ops::Deref};

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Maximum length of a property name in bytes.
pub const NAME_CAPACITY: usize = 31;

/// Maximum length of a text value in bytes.
pub const TEXT_CAPACITY: usize = 31;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("property name is empty")]
    Empty,
    #[error("property name {0:?} is longer than {NAME_CAPACITY} bytes")]
    TooLong(CompactString),
    #[error("property name {0:?} contains a NUL byte")]
    Nul(CompactString),
}

/// Registry key of a property. Case-sensitive, at most [`NAME_CAPACITY`] bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PropName(CompactString);

impl PropName {
    pub fn new(name: &str) -> Result<Self, NameError> {
        if name.is_empty() {
            Err(NameError::Empty)
        } else if name.len() > NAME_CAPACITY {
            Err(NameError::TooLong(name.into()))
        } else if name.contains('\0') {
            Err(NameError::Nul(name.into()))
        } else {
            Ok(Self(CompactString::from(name)))
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Deref for PropName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_str()
    }
}

impl Borrow<str> for PropName {
    fn borrow(&self) -> &str {
        self.0.as_str()
    }
}

impl TryFrom<&str> for PropName {
    type Error = NameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<T: AsRef<str> + ?Sized> PartialEq<T> for PropName {
    fn eq(&self, other: &T) -> bool {
        self.0.as_str() == other.as_ref()
    }
}

impl Display for PropName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

/// Text property value. Construction truncates at the first NUL and then to
/// [`TEXT_CAPACITY`] bytes on a char boundary, so it always fits a value slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PropText(CompactString);

impl PropText {
    pub fn new(text: &str) -> Self {
        Self(CompactString::from(truncate(text, TEXT_CAPACITY)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl Deref for PropText {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_str()
    }
}

impl<T: AsRef<str>> From<T> for PropText {
    fn from(value: T) -> Self {
        Self::new(value.as_ref())
    }
}

impl<'de> Deserialize<'de> for PropText {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = CompactString::deserialize(deserializer)?;
        Ok(Self::new(&text))
    }
}

impl Display for PropText {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.0.fmt(f)
    }
}

fn truncate(text: &str, capacity: usize) -> &str {
    let text = match text.find('\0') {
        Some(nul) => &text[..nul],
        None => text,
    };

    if text.len() <= capacity {
        return text;
    }

    let mut end = capacity;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Identifier of a device on the broker, usually its MAC address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub CompactString);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T: AsRef<str>> From<T> for DeviceId {
    fn from(value: T) -> Self {
        DeviceId(CompactString::from(value.as_ref()))
    }
}

impl Deref for DeviceId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_bounded() {
        assert_eq!(PropName::new("sleep_time").unwrap(), "sleep_time");
        assert_eq!(PropName::new(""), Err(NameError::Empty));
        assert!(PropName::new(&"x".repeat(NAME_CAPACITY)).is_ok());
        assert!(matches!(
            PropName::new(&"x".repeat(NAME_CAPACITY + 1)),
            Err(NameError::TooLong(_))
        ));
        assert!(matches!(PropName::new("a\0b"), Err(NameError::Nul(_))));
    }

    #[test]
    fn names_are_case_sensitive() {
        assert_ne!(PropName::new("Voltage").unwrap(), PropName::new("voltage").unwrap());
    }

    #[test]
    fn text_truncates() {
        assert_eq!(PropText::new("hello").as_str(), "hello");
        assert_eq!(PropText::new("ab\0cd").as_str(), "ab");
        assert_eq!(PropText::new(&"y".repeat(40)).len(), TEXT_CAPACITY);

        // 'é' is two bytes; the cut must not split it
        let text = PropText::new(&"é".repeat(20));
        assert_eq!(text.len(), 30);
        assert!(text.chars().all(|c| c == 'é'));
    }

    #[test]
    fn text_deserialize_truncates() {
        let text: PropText = serde_json::from_str(&format!("\"{}\"", "z".repeat(50))).unwrap();
        assert_eq!(text.len(), TEXT_CAPACITY);
    }
}
