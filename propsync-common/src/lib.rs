#![cfg_attr(not(test), no_std)]

extern crate alloc;

use core::{fmt::Display, str::FromStr};

pub mod binary;
pub mod command;

mod property;
mod string;
pub use property::*;
pub use string::*;

/// MQTT topics used between a device and the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    /// Commands addressed to every device
    Broadcast,
    /// Commands addressed to one device
    Inbound(DeviceId),
    /// Responses and reports published by one device
    Outbound(DeviceId),
}

impl Topic {
    pub const BROADCAST: &str = "/all";
}

impl Display for Topic {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Topic::Broadcast => f.write_str(Self::BROADCAST),
            Topic::Inbound(device) => write!(f, "/drecv/{}", device),
            Topic::Outbound(device) => write!(f, "/dpub/{}", device),
        }
    }
}

impl FromStr for Topic {
    type Err = &'static str;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        let Some(rest) = s.strip_prefix('/') else {
            return Err("does not start with /");
        };

        let mut parts = rest.split('/');
        match parts.next() {
            Some("all") => match parts.next() {
                None => Ok(Topic::Broadcast),
                Some(_) => Err("/all/..."),
            },
            Some(dir @ ("drecv" | "dpub")) => match (parts.next(), parts.next()) {
                (Some(device), None) if !device.is_empty() => {
                    let device = DeviceId::from(device);
                    Ok(if dir == "drecv" {
                        Topic::Inbound(device)
                    } else {
                        Topic::Outbound(device)
                    })
                }
                (Some(_), Some(_)) => Err("/{dir}/{device}/..."),
                _ => Err("/{dir}"),
            },
            Some(_) => Err("/..."),
            None => Err("/"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_serde() {
        assert_eq!(
            serde_json::to_string(&DeviceId::from("a4:cf:12:00:11:22")).unwrap(),
            r#""a4:cf:12:00:11:22""#
        );

        assert_eq!(
            serde_json::from_str::<DeviceId>(r#""a4:cf:12:00:11:22""#).unwrap(),
            DeviceId::from("a4:cf:12:00:11:22")
        );
    }

    #[test]
    fn topic_display() {
        assert_eq!(Topic::Broadcast.to_string(), "/all");
        assert_eq!(
            Topic::Inbound(DeviceId::from("a4cf12001122")).to_string(),
            "/drecv/a4cf12001122"
        );
        assert_eq!(
            Topic::Outbound(DeviceId::from("a4cf12001122")).to_string(),
            "/dpub/a4cf12001122"
        );
    }

    #[test]
    fn topic_from_str() {
        assert_eq!("/all".parse::<Topic>().unwrap(), Topic::Broadcast);

        assert_eq!(
            "/drecv/a4cf12001122".parse::<Topic>().unwrap(),
            Topic::Inbound(DeviceId::from("a4cf12001122"))
        );

        assert_eq!(
            "/dpub/a4cf12001122".parse::<Topic>().unwrap(),
            Topic::Outbound(DeviceId::from("a4cf12001122"))
        );

        assert_eq!("/all/extra".parse::<Topic>(), Err("/all/..."));
        assert_eq!("/drecv".parse::<Topic>(), Err("/{dir}"));
        assert_eq!("/drecv/".parse::<Topic>(), Err("/{dir}"));
        assert_eq!("/drecv/abc/def".parse::<Topic>(), Err("/{dir}/{device}/..."));
        assert_eq!("/other/abc".parse::<Topic>(), Err("/..."));
        assert_eq!("drecv/abc".parse::<Topic>(), Err("does not start with /"));
    }
}
