//! Async RabbitMQ publisher for relaying orders.
//!
//! The publisher owns one process-scoped connection and a small bounded pool
//! of channels. Each order checks out a channel exclusively, declares the
//! target queue, publishes, and returns the channel to the pool. Broken
//! channels are closed instead of being returned, and a dead connection is
//! replaced on the next request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::{RwLock, Semaphore};
use tracing::{error, info, warn};

use super::broker::{Broker, BrokerChannel, BrokerConnection};
use super::types::{Ack, OrderPayload, QueueSpec};
use crate::error::RelayError;
use crate::resilience::{Backoff, CircuitBreaker};
use crate::Config;

type ChannelOf<B> = <<B as Broker>::Connection as BrokerConnection>::Channel;

/// Tunables for the publisher.
#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub queue: QueueSpec,
    /// Wait for broker acks before reporting success
    pub confirms: bool,
    pub channel_pool_size: usize,
    pub connect_attempts: u32,
    /// Backoff between connect attempts in milliseconds (base, max)
    pub connect_backoff_ms: (u64, u64),
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown: Duration,
}

impl PublisherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue: QueueSpec::new(config.order_queue.clone(), config.order_queue_durable),
            confirms: config.publisher_confirms,
            channel_pool_size: config.channel_pool_size,
            connect_attempts: config.connect_attempts,
            connect_backoff_ms: config.connect_backoff_ms,
            breaker_failure_threshold: config.breaker_failure_threshold,
            breaker_cooldown: Duration::from_millis(config.breaker_cooldown_ms),
        }
    }
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            queue: QueueSpec::default(),
            confirms: true,
            channel_pool_size: 8,
            connect_attempts: 3,
            connect_backoff_ms: (100, 2000),
            breaker_failure_threshold: 5,
            breaker_cooldown: Duration::from_secs(30),
        }
    }
}

/// Async publisher with a shared connection and pooled channels.
pub struct Publisher<B: Broker> {
    inner: Arc<PublisherInner<B>>,
}

impl<B: Broker> Clone for Publisher<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PublisherInner<B: Broker> {
    broker: B,
    settings: PublisherSettings,
    connection: RwLock<Option<Arc<B::Connection>>>,
    idle: Mutex<Vec<ChannelOf<B>>>,
    /// One permit per channel that may be checked out at once
    permits: Semaphore,
    breaker: CircuitBreaker,
    closed: AtomicBool,
}

impl<B: Broker> Publisher<B> {
    pub fn new(broker: B, settings: PublisherSettings) -> Self {
        let pool_size = settings.channel_pool_size.max(1);
        let breaker =
            CircuitBreaker::new(settings.breaker_failure_threshold, settings.breaker_cooldown);

        Self {
            inner: Arc::new(PublisherInner {
                broker,
                connection: RwLock::new(None),
                idle: Mutex::new(Vec::with_capacity(pool_size)),
                permits: Semaphore::new(pool_size),
                breaker,
                closed: AtomicBool::new(false),
                settings,
            }),
        }
    }

    /// Establish the shared connection ahead of the first request.
    pub async fn connect_eagerly(&self) -> Result<(), RelayError> {
        self.ensure_connected().await.map(|_| ())
    }

    /// Relay an order on a detached task.
    ///
    /// The broker interaction runs to completion even if the caller stops
    /// waiting, so a checked-out channel always goes back to the pool or gets
    /// closed.
    pub async fn relay(&self, order: OrderPayload) -> Result<Ack, RelayError> {
        let publisher = self.clone();
        let task = tokio::spawn(async move { publisher.submit_order(&order).await });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "order_relay_task_failed");
                Err(RelayError::PublishFailed(anyhow!("relay task failed: {}", e)))
            }
        }
    }

    /// Publish one order to the target queue.
    pub async fn submit_order(&self, order: &OrderPayload) -> Result<Ack, RelayError> {
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|_| RelayError::BrokerUnavailable(anyhow!("publisher is closed")))?;

        let connection = self.ensure_connected().await?;
        let channel = self.checkout(&connection).await?;

        let settings = &self.inner.settings;

        if let Err(e) = channel.declare_queue(&settings.queue).await {
            self.discard(channel).await;
            return Err(RelayError::ChannelSetupFailed(e));
        }

        if let Err(e) = channel
            .publish(
                &settings.queue.name,
                order.as_bytes(),
                settings.queue.durable,
                settings.confirms,
            )
            .await
        {
            self.discard(channel).await;
            return Err(RelayError::PublishFailed(e));
        }

        self.checkin(channel).await;

        info!(
            queue = %settings.queue.name,
            body_length = order.len(),
            field_count = order.field_count(),
            confirmed = settings.confirms,
            "order_published"
        );

        Ok(Ack {
            confirmed: settings.confirms,
        })
    }

    /// Ensure we have a live connection, reconnecting if needed.
    async fn ensure_connected(&self) -> Result<Arc<B::Connection>, RelayError> {
        {
            let connection = self.inner.connection.read().await;
            if let Some(conn) = connection.as_ref() {
                if conn.is_connected() {
                    return Ok(Arc::clone(conn));
                }
            }
        }

        let mut connection = self.inner.connection.write().await;

        // Double-check after acquiring write lock
        if let Some(conn) = connection.as_ref() {
            if conn.is_connected() {
                return Ok(Arc::clone(conn));
            }
        }

        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(RelayError::BrokerUnavailable(anyhow!("publisher is closed")));
        }

        if let Some(dead) = connection.take() {
            warn!("rabbitmq_connection_lost");
            self.drain_idle().await;
            if let Err(e) = dead.close().await {
                warn!(error = %format!("{e:#}"), "rabbitmq_connection_close_error");
            }
        }

        // Dropping this mid-connect hands a half-open trial back to the breaker
        let Some(attempt) = self.inner.breaker.try_attempt() else {
            warn!("rabbitmq_breaker_rejected");
            return Err(RelayError::BrokerUnavailable(anyhow!(
                "circuit breaker open after repeated connect failures"
            )));
        };

        match self.connect_with_retry().await {
            Ok(conn) => {
                attempt.succeeded();
                let conn = Arc::new(conn);
                *connection = Some(Arc::clone(&conn));
                Ok(conn)
            }
            Err(e) => {
                attempt.failed();
                Err(RelayError::BrokerUnavailable(e))
            }
        }
    }

    async fn connect_with_retry(&self) -> anyhow::Result<B::Connection> {
        let settings = &self.inner.settings;
        let attempts = settings.connect_attempts.max(1);
        let (base_ms, max_ms) = settings.connect_backoff_ms;
        let backoff = Backoff::new(base_ms, max_ms);
        let mut last_error = None;

        for attempt in 0..attempts {
            let delay = backoff.delay(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            info!(attempt = attempt + 1, max_attempts = attempts, "rabbitmq_publisher_connecting");

            match self.inner.broker.connect().await {
                Ok(conn) => {
                    info!("rabbitmq_publisher_connected");
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        error = %format!("{e:#}"),
                        "rabbitmq_connect_failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("no connect attempt made")))
    }

    /// Take an idle open channel or open a new one.
    async fn checkout(&self, connection: &B::Connection) -> Result<ChannelOf<B>, RelayError> {
        loop {
            let candidate = self.lock_idle().pop();
            match candidate {
                Some(ch) if ch.is_open() => return Ok(ch),
                Some(stale) => self.close_channel(stale).await,
                None => break,
            }
        }

        let channel = connection
            .open_channel()
            .await
            .map_err(RelayError::ChannelSetupFailed)?;

        if self.inner.settings.confirms {
            if let Err(e) = channel.enable_confirms().await {
                self.close_channel(channel).await;
                return Err(RelayError::ChannelSetupFailed(e));
            }
        }

        info!(confirms = self.inner.settings.confirms, "rabbitmq_channel_opened");
        Ok(channel)
    }

    async fn checkin(&self, channel: ChannelOf<B>) {
        if self.inner.closed.load(Ordering::SeqCst) || !channel.is_open() {
            self.close_channel(channel).await;
            return;
        }
        self.lock_idle().push(channel);
    }

    /// Close a channel whose state is unknown after a failure.
    async fn discard(&self, channel: ChannelOf<B>) {
        warn!("rabbitmq_channel_discarded");
        self.close_channel(channel).await;
    }

    async fn close_channel(&self, channel: ChannelOf<B>) {
        if let Err(e) = channel.close().await {
            warn!(error = %format!("{e:#}"), "rabbitmq_channel_close_error");
        }
    }

    async fn drain_idle(&self) {
        let idle: Vec<_> = std::mem::take(&mut *self.lock_idle());
        for channel in idle {
            self.close_channel(channel).await;
        }
    }

    fn lock_idle(&self) -> std::sync::MutexGuard<'_, Vec<ChannelOf<B>>> {
        self.inner.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Close pooled channels, then the connection.
    ///
    /// Orders still in flight finish and close their own channel on checkin.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.permits.close();

        let mut connection = self.inner.connection.write().await;

        self.drain_idle().await;

        if let Some(conn) = connection.take() {
            if let Err(e) = conn.close().await {
                warn!(error = %format!("{e:#}"), "rabbitmq_connection_close_error");
            }
        }

        info!("rabbitmq_publisher_closed");
    }
}
