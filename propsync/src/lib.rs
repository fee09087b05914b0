use mqtt_endpoint_tokio::mqtt_ep;
use propsync_common::{
    CoerceError, NameError, ValueKind, binary::CodecError, command::DecodeError,
};

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod hooks;
pub mod lifecycle;
pub mod local;
pub mod log;
pub mod registry;

pub use propsync_common as common;

pub use self::{
    config::EngineConfig,
    engine::{Engine, EngineHandle},
    hooks::Collaborator,
    registry::Registry,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no property named {0:?}")]
    NotFound(String),
    #[error("property {name:?} holds {expected} values, got {found}")]
    TypeMismatch {
        name: String,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("property {name:?} is not {access} over a transport")]
    AccessDenied { name: String, access: &'static str },
    #[error("json coercion error: {0}")]
    Coerce(#[from] CoerceError),
    #[error("binary codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("command decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("invalid property name: {0}")]
    Name(#[from] NameError),
    #[error("property {0:?} registered twice")]
    DuplicateName(String),
    #[error("identity property {0:?} must be a readable, non-writeable text property, and unique")]
    Identity(String),
    #[error("mqtt transport error: {0}")]
    MqttTransport(#[from] mqtt_ep::TransportError),
    #[error("mqtt connection error: {0}")]
    MqttConnection(#[from] mqtt_ep::ConnectionError),
    #[error("mqtt packet field error: {0}")]
    MqttPacketField(&'static str),
    #[error("mqtt packet error: {0}")]
    MqttPacket(mqtt_ep::result_code::MqttError),
    #[error("broker is not connected")]
    NotConnected,
    #[error("radio error: {0}")]
    Radio(String),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("radio returned {found} handles for a table of {expected} slots")]
    TableMismatch { expected: usize, found: usize },
    #[error("serde json error: {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<mqtt_ep::result_code::MqttError> for Error {
    fn from(e: mqtt_ep::result_code::MqttError) -> Self {
        Error::MqttPacket(e)
    }
}
