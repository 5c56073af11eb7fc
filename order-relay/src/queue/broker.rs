//! Broker abstraction and its RabbitMQ implementation.
//!
//! The publisher talks to the broker through three small traits so the
//! connection/channel lifecycle can be exercised without a running broker:
//!
//! ```text
//! Broker::connect() → BrokerConnection::open_channel() → BrokerChannel::{declare_queue, publish}
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions},
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};

use super::types::QueueSpec;

/// AMQP delivery mode for messages that survive a broker restart.
const DELIVERY_PERSISTENT: u8 = 2;
const DELIVERY_TRANSIENT: u8 = 1;

/// Opens connections to a message broker.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Connection: BrokerConnection;

    async fn connect(&self) -> Result<Self::Connection>;
}

/// A live session with the broker.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    fn is_connected(&self) -> bool;

    async fn open_channel(&self) -> Result<Self::Channel>;

    async fn close(&self) -> Result<()>;
}

/// A multiplexed session on a connection used to declare and publish.
#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    fn is_open(&self) -> bool;

    /// Put the channel in publisher-confirm mode.
    async fn enable_confirms(&self) -> Result<()>;

    /// Declare the queue. Idempotent for identical properties.
    async fn declare_queue(&self, queue: &QueueSpec) -> Result<()>;

    /// Publish `body` to `queue` through the default exchange.
    ///
    /// With `await_confirm` the call resolves only once the broker acked the
    /// message; a nack is an error.
    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        persistent: bool,
        await_confirm: bool,
    ) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

// =============================================================================
// RabbitMQ (lapin)
// =============================================================================

/// RabbitMQ broker reached through an AMQP URI.
#[derive(Debug, Clone)]
pub struct LapinBroker {
    url: String,
}

impl LapinBroker {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Broker for LapinBroker {
    type Connection = LapinConnection;

    async fn connect(&self) -> Result<LapinConnection> {
        let properties =
            ConnectionProperties::default().with_connection_name("order-relay".into());

        let conn = Connection::connect(&self.url, properties)
            .await
            .context("Failed to connect to RabbitMQ")?;

        Ok(LapinConnection(conn))
    }
}

pub struct LapinConnection(Connection);

#[async_trait]
impl BrokerConnection for LapinConnection {
    type Channel = LapinChannel;

    fn is_connected(&self) -> bool {
        self.0.status().connected()
    }

    async fn open_channel(&self) -> Result<LapinChannel> {
        let ch = self
            .0
            .create_channel()
            .await
            .context("Failed to create channel")?;
        Ok(LapinChannel(ch))
    }

    async fn close(&self) -> Result<()> {
        self.0
            .close(200, "Normal shutdown")
            .await
            .context("Failed to close connection")
    }
}

pub struct LapinChannel(Channel);

#[async_trait]
impl BrokerChannel for LapinChannel {
    fn is_open(&self) -> bool {
        self.0.status().connected()
    }

    async fn enable_confirms(&self) -> Result<()> {
        self.0
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .context("Failed to enable publisher confirms")
    }

    async fn declare_queue(&self, queue: &QueueSpec) -> Result<()> {
        self.0
            .queue_declare(
                &queue.name,
                QueueDeclareOptions {
                    durable: queue.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .with_context(|| format!("Failed to declare queue {}", queue.name))?;
        Ok(())
    }

    async fn publish(
        &self,
        queue: &str,
        body: &[u8],
        persistent: bool,
        await_confirm: bool,
    ) -> Result<()> {
        let delivery_mode = if persistent {
            DELIVERY_PERSISTENT
        } else {
            DELIVERY_TRANSIENT
        };

        let confirm = self
            .0
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(delivery_mode)
                    .with_content_type("application/json".into()),
            )
            .await
            .with_context(|| format!("Failed to publish to {}", queue))?;

        if await_confirm {
            let confirmation = confirm.await.context("Failed to confirm publish")?;
            if let Confirmation::Nack(_) = confirmation {
                bail!("Broker rejected message on {}", queue);
            }
        }

        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.0
            .close(200, "Normal shutdown")
            .await
            .context("Failed to close channel")
    }
}

// =============================================================================
// In-memory broker for tests
// =============================================================================

/// In-memory broker that records every interaction.
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::anyhow;

    #[derive(Debug, Clone)]
    struct StoredMessage {
        body: Vec<u8>,
        persistent: bool,
    }

    #[derive(Debug, Default)]
    struct QueueRecord {
        durable: bool,
        messages: Vec<StoredMessage>,
    }

    #[derive(Default)]
    struct MockState {
        /// Track resources for leak checks
        connect_attempts: AtomicUsize,
        open_connections: AtomicUsize,
        channels_opened: AtomicUsize,
        open_channels: AtomicUsize,
        declare_count: AtomicUsize,
        /// Bumped to kill every existing connection
        generation: AtomicU64,
        queues: Mutex<HashMap<String, QueueRecord>>,
        /// Configured behavior
        fail_connect: AtomicBool,
        fail_channel: AtomicBool,
        fail_declare: AtomicBool,
        fail_publish: AtomicBool,
        nack_publish: AtomicBool,
        publish_delay_ms: AtomicU64,
    }

    #[derive(Clone, Default)]
    pub struct MockBroker {
        state: Arc<MockState>,
    }

    impl MockBroker {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_fail_connect(&self, fail: bool) {
            self.state.fail_connect.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_channel(&self, fail: bool) {
            self.state.fail_channel.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_declare(&self, fail: bool) {
            self.state.fail_declare.store(fail, Ordering::SeqCst);
        }

        pub fn set_fail_publish(&self, fail: bool) {
            self.state.fail_publish.store(fail, Ordering::SeqCst);
        }

        pub fn set_nack_publish(&self, nack: bool) {
            self.state.nack_publish.store(nack, Ordering::SeqCst);
        }

        pub fn set_publish_delay(&self, delay: Duration) {
            self.state
                .publish_delay_ms
                .store(delay.as_millis() as u64, Ordering::SeqCst);
        }

        /// Simulate the broker dropping every live connection.
        pub fn kill_connections(&self) {
            self.state.generation.fetch_add(1, Ordering::SeqCst);
        }

        /// Pre-create a queue, as another client would.
        pub fn create_queue(&self, name: &str, durable: bool) {
            self.state
                .queues
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_insert_with(|| QueueRecord {
                    durable,
                    messages: Vec::new(),
                });
        }

        pub fn connect_attempts(&self) -> usize {
            self.state.connect_attempts.load(Ordering::SeqCst)
        }

        pub fn open_connections(&self) -> usize {
            self.state.open_connections.load(Ordering::SeqCst)
        }

        pub fn channels_opened(&self) -> usize {
            self.state.channels_opened.load(Ordering::SeqCst)
        }

        pub fn open_channels(&self) -> usize {
            self.state.open_channels.load(Ordering::SeqCst)
        }

        pub fn declare_count(&self) -> usize {
            self.state.declare_count.load(Ordering::SeqCst)
        }

        pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
            self.stored(queue).into_iter().map(|m| m.body).collect()
        }

        /// Delivery mode of each message on `queue`, true for persistent.
        pub fn persistent_flags(&self, queue: &str) -> Vec<bool> {
            self.stored(queue).iter().map(|m| m.persistent).collect()
        }

        fn stored(&self, queue: &str) -> Vec<StoredMessage> {
            self.state
                .queues
                .lock()
                .unwrap()
                .get(queue)
                .map(|q| q.messages.clone())
                .unwrap_or_default()
        }

        pub fn queue_exists(&self, queue: &str) -> bool {
            self.state.queues.lock().unwrap().contains_key(queue)
        }
    }

    #[async_trait]
    impl Broker for MockBroker {
        type Connection = MockConnection;

        async fn connect(&self) -> Result<MockConnection> {
            self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_connect.load(Ordering::SeqCst) {
                return Err(anyhow!("connection refused")).context("Failed to connect to RabbitMQ");
            }
            self.state.open_connections.fetch_add(1, Ordering::SeqCst);
            Ok(MockConnection {
                state: Arc::clone(&self.state),
                generation: self.state.generation.load(Ordering::SeqCst),
                closed: Arc::new(AtomicBool::new(false)),
            })
        }
    }

    pub struct MockConnection {
        state: Arc<MockState>,
        generation: u64,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BrokerConnection for MockConnection {
        type Channel = MockChannel;

        fn is_connected(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
                && self.generation == self.state.generation.load(Ordering::SeqCst)
        }

        async fn open_channel(&self) -> Result<MockChannel> {
            if !self.is_connected() {
                return Err(anyhow!("connection is closed"));
            }
            if self.state.fail_channel.load(Ordering::SeqCst) {
                return Err(anyhow!("channel_max reached")).context("Failed to create channel");
            }
            self.state.channels_opened.fetch_add(1, Ordering::SeqCst);
            self.state.open_channels.fetch_add(1, Ordering::SeqCst);
            Ok(MockChannel {
                state: Arc::clone(&self.state),
                generation: self.generation,
                connection_closed: Arc::clone(&self.closed),
                closed: AtomicBool::new(false),
                confirms: AtomicBool::new(false),
            })
        }

        async fn close(&self) -> Result<()> {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.state.open_connections.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    pub struct MockChannel {
        state: Arc<MockState>,
        generation: u64,
        connection_closed: Arc<AtomicBool>,
        closed: AtomicBool,
        confirms: AtomicBool,
    }

    #[async_trait]
    impl BrokerChannel for MockChannel {
        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
                && !self.connection_closed.load(Ordering::SeqCst)
                && self.generation == self.state.generation.load(Ordering::SeqCst)
        }

        async fn enable_confirms(&self) -> Result<()> {
            self.confirms.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn declare_queue(&self, queue: &QueueSpec) -> Result<()> {
            self.state.declare_count.fetch_add(1, Ordering::SeqCst);
            if self.state.fail_declare.load(Ordering::SeqCst) {
                return Err(anyhow!("access refused"))
                    .with_context(|| format!("Failed to declare queue {}", queue.name));
            }

            let mut queues = self.state.queues.lock().unwrap();
            let record = queues
                .entry(queue.name.clone())
                .or_insert_with(|| QueueRecord {
                    durable: queue.durable,
                    messages: Vec::new(),
                });
            if record.durable != queue.durable {
                // RabbitMQ answers PRECONDITION_FAILED for mismatched properties
                return Err(anyhow!("inequivalent arg 'durable' for queue {}", queue.name));
            }
            Ok(())
        }

        async fn publish(
            &self,
            queue: &str,
            body: &[u8],
            persistent: bool,
            await_confirm: bool,
        ) -> Result<()> {
            let delay = self.state.publish_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            if !self.is_open() {
                return Err(anyhow!("channel is closed"));
            }
            if self.state.fail_publish.load(Ordering::SeqCst) {
                return Err(anyhow!("socket write failed"))
                    .with_context(|| format!("Failed to publish to {}", queue));
            }
            if await_confirm
                && self.confirms.load(Ordering::SeqCst)
                && self.state.nack_publish.load(Ordering::SeqCst)
            {
                return Err(anyhow!("Broker rejected message on {}", queue));
            }

            let mut queues = self.state.queues.lock().unwrap();
            match queues.get_mut(queue) {
                Some(record) => {
                    record.messages.push(StoredMessage {
                        body: body.to_vec(),
                        persistent,
                    });
                    Ok(())
                }
                None => Err(anyhow!("no queue '{}'", queue)),
            }
        }

        async fn close(&self) -> Result<()> {
            if !self.closed.swap(true, Ordering::SeqCst) {
                self.state.open_channels.fetch_sub(1, Ordering::SeqCst);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
pub use mock::MockBroker;
