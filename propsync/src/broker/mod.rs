//! Cloud side: one MQTT session at a time, rotated across candidate brokers.

use std::{
    convert::Infallible,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use compact_str::CompactString;
use propsync_common::{DeviceId, Topic, command::Outbound};
use tokio::{task::AbortHandle, time::Instant};

use crate::{Error, Result, dispatch::Dispatcher};

mod connection;
mod failover;

pub use self::{
    connection::{BrokerConnection, InboundPublish},
    failover::{Attempt, BrokerState, Failover},
};

pub struct BrokerAdapter {
    device_id: DeviceId,
    client_id: CompactString,
    period: Duration,
    dispatcher: Dispatcher,
    failover: Mutex<Failover>,
    link: Mutex<Option<Link>>,
}

struct Link {
    generation: u64,
    session: AbortHandle,
    conn: Option<Arc<BrokerConnection>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BrokerAdapter {
    pub fn new(
        device_id: DeviceId,
        client_id: impl Into<CompactString>,
        static_broker: impl Into<CompactString>,
        period: Duration,
        dispatcher: Dispatcher,
    ) -> Arc<Self> {
        Arc::new(Self {
            device_id,
            client_id: client_id.into(),
            period,
            dispatcher,
            failover: Mutex::new(Failover::new(static_broker)),
            link: Mutex::new(None),
        })
    }

    pub fn state(&self) -> BrokerState {
        lock(&self.failover).state()
    }

    pub fn add_discovered_broker(&self, addr: impl Into<CompactString>) {
        let addr = addr.into();
        if lock(&self.failover).add_discovered(addr.clone()) {
            tracing::info!(%addr, "added discovered broker");
        }
    }

    /// Drives the failover controller. Never returns; abort the task to stop.
    pub async fn run(self: Arc<Self>) -> Infallible {
        let attempt = lock(&self.failover).start();
        self.launch(attempt);

        let mut ticker = tokio::time::interval_at(Instant::now() + self.period, self.period);
        loop {
            ticker.tick().await;

            let attempt = lock(&self.failover).tick();
            if let Some(attempt) = attempt {
                self.launch(attempt);
            }
        }
    }

    fn launch(self: &Arc<Self>, attempt: Attempt) {
        // hold the lock across spawn so the session cannot clear a link that
        // is not registered yet
        let mut link = lock(&self.link);

        if let Some(old) = link.take() {
            old.session.abort();
        }

        let generation = attempt.generation;
        let this = self.clone();
        let session = tokio::spawn(async move {
            let Err(e) = this.session(&attempt).await;
            tracing::error!(addr = %attempt.addr, "broker session ended: {e}");
            this.drop_link(attempt.generation);
        });

        *link = Some(Link { generation, session: session.abort_handle(), conn: None });
    }

    async fn session(&self, attempt: &Attempt) -> Result<Infallible> {
        tracing::info!(addr = %attempt.addr, candidate = attempt.index, "connecting to broker");

        let conn = Arc::new(BrokerConnection::connect(&self.client_id, &attempt.addr).await?);

        if !lock(&self.failover).on_connected(attempt.generation) {
            return Err(Error::NotConnected);
        }

        conn.subscribe(&Topic::Broadcast).await?;
        conn.subscribe(&Topic::Inbound(self.device_id.clone())).await?;

        {
            let mut link = lock(&self.link);
            if let Some(link) = link.as_mut().filter(|l| l.generation == attempt.generation) {
                link.conn = Some(conn.clone());
            }
        }

        tracing::info!(addr = %attempt.addr, "broker connected");

        let registry = self.dispatcher.registry();
        registry.collaborator().on_first_ready(registry);

        let outbound = Topic::Outbound(self.device_id.clone());
        loop {
            let publish = conn.recv().await?;
            tracing::debug!(topic = %publish.topic, "dispatching inbound command");

            for message in self.dispatcher.handle_payload(&publish.payload) {
                conn.publish(&outbound, &message).await?;
            }
        }
    }

    fn drop_link(&self, generation: u64) {
        let mut link = lock(&self.link);
        if link.as_ref().is_some_and(|l| l.generation == generation) {
            if let Some(old) = link.take() {
                old.session.abort();
            }
        }
        drop(link);

        lock(&self.failover).on_disconnected(generation);
    }

    /// Publishes on the device's outbound topic. Fails with `NotConnected`
    /// when no session is up; a send failure tears the session down.
    pub async fn publish(&self, message: &Outbound) -> Result<()> {
        let current = lock(&self.link)
            .as_ref()
            .and_then(|l| l.conn.clone().map(|conn| (l.generation, conn)));

        let Some((generation, conn)) = current else {
            return Err(Error::NotConnected);
        };

        let result = conn.publish(&Topic::Outbound(self.device_id.clone()), message).await;
        if let Err(e) = &result {
            tracing::error!("publish failed, dropping broker session: {e}");
            self.drop_link(generation);
        }
        result
    }

    pub async fn report(&self) -> Result<()> {
        self.publish(&self.dispatcher.report()).await
    }
}

#[cfg(test)]
mod tests {
    use propsync_common::PropertySpec;
    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        net::TcpListener,
        sync::mpsc::{self, UnboundedSender},
        time::timeout,
    };

    use super::*;
    use crate::{hooks::Collaborator, lifecycle::ActivityClock, registry::Registry};

    /// MQTT v5 CONNACK: no session present, success, no properties.
    const CONNACK: [u8; 5] = [0x20, 0x03, 0x00, 0x00, 0x00];

    struct ReadySignal(UnboundedSender<()>);

    impl Collaborator for ReadySignal {
        fn on_first_ready(&self, _: &Registry) {
            let _ = self.0.send(());
        }
    }

    fn adapter_with(
        static_broker: &str,
        period: Duration,
        hook: Arc<dyn Collaborator>,
    ) -> Arc<BrokerAdapter> {
        let registry = Registry::builder()
            .property(PropertySpec::identity("device_type", "TD01"))
            .hook(hook)
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(Arc::new(registry), ActivityClock::new());

        BrokerAdapter::new(
            DeviceId::from("a4cf12001122"),
            "propsync-test",
            static_broker,
            period,
            dispatcher,
        )
    }

    fn adapter() -> Arc<BrokerAdapter> {
        adapter_with("easysmart.local:1883", Duration::from_secs(3), Arc::new(()))
    }

    /// Local address with nothing listening on it.
    async fn refusing_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    }

    #[tokio::test]
    async fn failed_connects_rotate_through_candidates() {
        let first = refusing_addr().await;
        let second = refusing_addr().await;

        let adapter = adapter_with(&first, Duration::from_millis(50), Arc::new(()));
        adapter.add_discovered_broker(second.as_str());
        let task = tokio::spawn(adapter.clone().run());

        // candidate index each time the adapter is seen disconnected
        let mut failed = Vec::new();
        timeout(Duration::from_secs(5), async {
            while failed.len() < 3 {
                let (state, index) = {
                    let failover = lock(&adapter.failover);
                    (failover.state(), failover.index())
                };

                assert_ne!(state, BrokerState::Connected);
                if state == BrokerState::Disconnected && failed.last() != Some(&index) {
                    failed.push(index);
                }

                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        task.abort();
        assert_eq!(failed, [0, 1, 0]);
    }

    #[tokio::test]
    async fn first_ready_fires_on_every_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (ready_tx, mut ready) = mpsc::unbounded_channel();
        let adapter =
            adapter_with(&addr, Duration::from_millis(50), Arc::new(ReadySignal(ready_tx)));
        let task = tokio::spawn(adapter.clone().run());

        for _ in 0..2 {
            let (mut socket, _) = listener.accept().await.unwrap();

            let mut buf = [0; 256];
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0);
            assert_eq!(buf[0] >> 4, 1, "expected CONNECT");
            socket.write_all(&CONNACK).await.unwrap();

            timeout(Duration::from_secs(5), ready.recv()).await.unwrap().unwrap();
            assert_eq!(adapter.state(), BrokerState::Connected);

            // broker goes away; the next tick reconnects
            drop(socket);
        }

        task.abort();
        assert!(ready.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_session_fails() {
        let adapter = adapter();
        assert_eq!(adapter.state(), BrokerState::Disconnected);
        assert!(matches!(adapter.report().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn stale_session_end_keeps_current_link() {
        let adapter = adapter();
        let first = lock(&adapter.failover).start();
        let second = Attempt { generation: first.generation + 1, ..first.clone() };

        let task = tokio::spawn(std::future::pending::<()>());
        *lock(&adapter.link) =
            Some(Link { generation: second.generation, session: task.abort_handle(), conn: None });

        adapter.drop_link(first.generation);
        assert!(lock(&adapter.link).is_some());
        assert!(!task.is_finished());
        task.abort();
    }

    #[test]
    fn discovered_broker_extends_candidates() {
        let adapter = adapter();
        adapter.add_discovered_broker("192.168.4.1:1883");
        adapter.add_discovered_broker("10.0.0.1:1883");
        assert_eq!(lock(&adapter.failover).candidates(), [
            "easysmart.local:1883",
            "192.168.4.1:1883"
        ]);
    }
}
