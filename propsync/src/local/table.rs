//! GATT-style attribute table derived from the registry.
//!
//! Layout, one slot per attribute:
//!
//! ```text
//! 0  service declaration        (0x2800, value = service uuid)
//! 1  console declaration        (0x2803)
//! 2  console value              (0xFF01, write)
//! 3  radio mode declaration     (0x2803)
//! 4  radio mode value           (0xFF02, write)
//!    per exposed property i:
//!    declaration                (0x2803, value = properties byte)
//!    value                      (0xFF10 + i)
//!    client configuration       (0x2902, readable properties only)
//!    user description           (0x2901, value = property name)
//! ```

use propsync_common::{NAME_CAPACITY, binary};

use crate::registry::Registry;

pub const SERVICE_UUID: u16 = 0x00FF;
pub const CONSOLE_UUID: u16 = 0xFF01;
pub const RADIO_MODE_UUID: u16 = 0xFF02;
pub const PROPERTY_UUID_BASE: u16 = 0xFF10;

pub const PRIMARY_SERVICE_UUID: u16 = 0x2800;
pub const CHARACTERISTIC_UUID: u16 = 0x2803;
pub const USER_DESCRIPTION_UUID: u16 = 0x2901;
pub const CLIENT_CONFIG_UUID: u16 = 0x2902;

pub const PROP_READ: u8 = 0x02;
pub const PROP_WRITE_NR: u8 = 0x04;
pub const PROP_WRITE: u8 = 0x08;
pub const PROP_NOTIFY: u8 = 0x10;

/// Service declaration plus the console characteristic
pub const HEADER_SLOTS: usize = 3;
/// Radio mode characteristic
pub const CONTROL_SLOTS: usize = 2;

pub const CONSOLE_VALUE: usize = 2;
pub const RADIO_MODE_VALUE: usize = 4;

const CONSOLE_LEN: usize = 1;
const RADIO_MODE_LEN: usize = 1;
const CLIENT_CONFIG_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Perms {
    pub read: bool,
    pub write: bool,
}

impl Perms {
    const READ: Perms = Perms { read: true, write: false };
    const WRITE: Perms = Perms { read: false, write: true };
    const READ_WRITE: Perms = Perms { read: true, write: true };
}

/// What a slot is for, so inbound writes can be routed by slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRole {
    Service,
    Declaration,
    Console,
    RadioMode,
    /// Value of the property at this registry index
    Value(usize),
    /// Client configuration of the property at this registry index
    Config(usize),
    Description(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub uuid: u16,
    pub perms: Perms,
    pub max_len: usize,
    pub value: Vec<u8>,
    pub role: SlotRole,
}

/// Slots of one exposed property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertySlots {
    pub value: usize,
    pub config: Option<usize>,
    pub description: usize,
}

#[derive(Debug, Clone)]
pub struct AttributeTable {
    attributes: Vec<Attribute>,
    /// Indexed by registry index; `None` for internal properties
    properties: Vec<Option<PropertySlots>>,
}

impl AttributeTable {
    pub fn build(registry: &Registry) -> Self {
        let exposed = registry.iter().filter(|p| p.access().exposed()).count();
        let readable = registry.iter().filter(|p| p.access().readable).count();

        let mut table = Self {
            attributes: Vec::with_capacity(HEADER_SLOTS + expected_slots(exposed, readable)),
            properties: vec![None; registry.len()],
        };

        let service = SERVICE_UUID.to_le_bytes().to_vec();
        table.push(PRIMARY_SERVICE_UUID, Perms::READ, 2, service, SlotRole::Service);
        table.declare(PROP_WRITE | PROP_WRITE_NR);
        table.push(CONSOLE_UUID, Perms::WRITE, CONSOLE_LEN, vec![0], SlotRole::Console);
        table.declare(PROP_WRITE | PROP_WRITE_NR);
        table.push(RADIO_MODE_UUID, Perms::WRITE, RADIO_MODE_LEN, vec![0], SlotRole::RadioMode);

        for prop in registry.iter() {
            let access = prop.access();
            if !access.exposed() {
                continue;
            }

            let index = prop.index();

            let mut props = 0;
            if access.readable {
                props |= PROP_READ | PROP_NOTIFY;
            }
            if access.writeable {
                props |= PROP_WRITE;
            }
            table.declare(props);

            let perms = Perms { read: access.readable, write: access.writeable };
            let value = table.push(
                PROPERTY_UUID_BASE.wrapping_add(index as u16),
                perms,
                prop.kind().slot_len(),
                binary::encode(&prop.value()),
                SlotRole::Value(index),
            );

            let config = access.readable.then(|| {
                table.push(
                    CLIENT_CONFIG_UUID,
                    Perms::READ_WRITE,
                    CLIENT_CONFIG_LEN,
                    vec![0; CLIENT_CONFIG_LEN],
                    SlotRole::Config(index),
                )
            });

            let description = table.push(
                USER_DESCRIPTION_UUID,
                Perms::READ,
                NAME_CAPACITY,
                prop.name().as_bytes().to_vec(),
                SlotRole::Description(index),
            );

            table.properties[index] = Some(PropertySlots { value, config, description });
        }

        table
    }

    fn push(
        &mut self,
        uuid: u16,
        perms: Perms,
        max_len: usize,
        value: Vec<u8>,
        role: SlotRole,
    ) -> usize {
        self.attributes.push(Attribute { uuid, perms, max_len, value, role });
        self.attributes.len() - 1
    }

    fn declare(&mut self, props: u8) -> usize {
        self.push(CHARACTERISTIC_UUID, Perms::READ, 1, vec![props], SlotRole::Declaration)
    }

    /// Total number of attributes, header included.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Slots after the fixed header: `2 + 2n + r + n` for `n` exposed and `r`
    /// readable properties.
    pub fn slot_count(&self) -> usize {
        self.len() - HEADER_SLOTS
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, slot: usize) -> Option<&Attribute> {
        self.attributes.get(slot)
    }

    pub fn role(&self, slot: usize) -> Option<SlotRole> {
        self.attributes.get(slot).map(|a| a.role)
    }

    /// Slots of the property at `index`, or `None` if it is not exposed.
    pub fn slots(&self, index: usize) -> Option<PropertySlots> {
        self.properties.get(index).copied().flatten()
    }

    /// Replaces the cached value of a slot, truncated to its capacity.
    pub fn store(&mut self, slot: usize, value: &[u8]) {
        if let Some(attr) = self.attributes.get_mut(slot) {
            attr.value.clear();
            attr.value.extend_from_slice(&value[..value.len().min(attr.max_len)]);
        }
    }
}

pub const fn expected_slots(exposed: usize, readable: usize) -> usize {
    CONTROL_SLOTS + 2 * exposed + readable + exposed
}
