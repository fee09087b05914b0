use core::{str::FromStr as _, sync::atomic::AtomicU16};

use bytes::Bytes;
use mqtt_endpoint_tokio::mqtt_ep::{
    self, Endpoint,
    packet::v5_0,
    role,
    transport::{TcpTransport, connect_helper},
};
use mqtt_protocol_core::mqtt::packet::{
    Qos, SubEntry, SubOpts,
    v5_0::{Connack, Publish},
};
use propsync_common::Topic;
use serde::Serialize;

use crate::{Error, Result};

/// One MQTT v5 session with a broker.
pub struct BrokerConnection {
    endpoint: Endpoint<role::Client>,
    next_packet_id: AtomicU16,
}

/// A PUBLISH received on one of the device's topics.
#[derive(Debug, Clone)]
pub struct InboundPublish {
    pub topic: Topic,
    pub payload: Bytes,
}

impl BrokerConnection {
    pub async fn connect(client_id: &str, addr: &str) -> Result<Self> {
        let endpoint = mqtt_ep::endpoint::Endpoint::<role::Client>::new(mqtt_ep::Version::V5_0);

        let tcp_stream = connect_helper::connect_tcp(addr, None).await?;
        let transport = TcpTransport::from_stream(tcp_stream);
        endpoint
            .attach(transport, mqtt_ep::endpoint::Mode::Client)
            .await?;

        let connect = v5_0::Connect::builder().client_id(client_id)?.build()?;
        endpoint.send(connect).await?;

        let packet = endpoint.recv().await?;
        let connack: Connack = packet.try_into().map_err(Error::MqttPacketField)?;
        tracing::debug!(%addr, "received CONNACK: {connack:?}");

        Ok(BrokerConnection { endpoint, next_packet_id: AtomicU16::new(1) })
    }

    fn next_packet_id(&self) -> u16 {
        loop {
            let id = self
                .next_packet_id
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

            if id != 0 {
                break id;
            }
        }
    }

    pub async fn subscribe(&self, topic: &Topic) -> Result<()> {
        let subscribe = v5_0::Subscribe::builder()
            .packet_id(self.next_packet_id())
            .entries(vec![SubEntry::new(
                topic.to_string(),
                SubOpts::new().set_qos(Qos::AtLeastOnce),
            )?])
            .build()?;

        tracing::info!("subscribing to topic '{topic}'");

        self.endpoint
            .register_packet_id(subscribe.packet_id())
            .await?;

        self.endpoint.send(subscribe).await?;

        Ok(())
    }

    pub async fn publish(&self, topic: &Topic, payload: &impl Serialize) -> Result<()> {
        let payload = serde_json::to_string(payload)?;

        tracing::debug!("publishing to topic {topic}: {payload}");

        let packet_id = self.next_packet_id();
        let publish = v5_0::Publish::builder()
            .topic_name(topic.to_string())?
            .payload(payload)
            .qos(Qos::AtLeastOnce)
            .retain(false)
            .packet_id(packet_id)
            .build()?;

        self.endpoint.register_packet_id(packet_id).await?;
        self.endpoint.send(publish).await?;

        Ok(())
    }

    /// Waits for the next PUBLISH. Acks and other control packets are skipped,
    /// as are publishes on topics the device does not understand.
    pub async fn recv(&self) -> Result<InboundPublish> {
        loop {
            let packet = self.endpoint.recv().await?;

            let publish: Result<Publish, _> = packet.try_into();
            let Ok(publish) = publish else {
                continue;
            };

            let topic = match Topic::from_str(publish.topic_name()) {
                Ok(topic) => topic,
                Err(e) => {
                    tracing::warn!(topic = publish.topic_name(), "ignoring publish: bad topic {e}");
                    continue;
                }
            };

            let payload = Bytes::copy_from_slice(publish.payload().as_slice());
            let text = String::from_utf8_lossy(&payload);
            tracing::debug!(%topic, payload = %text, "received publish");

            break Ok(InboundPublish { topic, payload });
        }
    }
}
