//! Connection lifecycle and publish orchestration.
//!
//! A [`PublisherSession`] exclusively owns one sink connection. Each
//! `publish()` call packs its records into batches, sends them in order
//! through the [`RetryingSender`], and keeps going after a failed batch so
//! that everything already packed gets its chance at delivery.
//!
//! # Example
//!
//! ```rust,no_run
//! use translation_publisher::config::SinkConfig;
//! use translation_publisher::sink::KafkaConnector;
//! use translation_publisher::{PublisherSession, TranslationEvent};
//!
//! # async fn example() -> translation_publisher::Result<()> {
//! let config = SinkConfig::new("localhost:9092", "translations");
//! let mut session = PublisherSession::new(config, KafkaConnector::new())?;
//!
//! let events = vec![TranslationEvent::new("Hola mundo", "Hello world", "en", "es")];
//! let report = session
//!     .scoped(move |session| Box::pin(async move { session.send_translation_events(&events).await }))
//!     .await?;
//! println!("Delivered {} events", report.events_sent);
//! # Ok(())
//! # }
//! ```

use crate::batch::BatchPacker;
use crate::config::{Config, SinkConfig};
use crate::event::{EventRecord, TranslationEvent};
use crate::partition::PartitionKeyStrategy;
use crate::retry::{RetryPolicy, RetryingSender};
use crate::sink::{Connector, Sink};
use crate::stats::{SessionStats, StatsFile, StatsSnapshot};
use crate::{Error, Result};
use chrono::Utc;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// A batch or record that did not reach the sink.
#[derive(Debug)]
pub struct PublishFailure {
    /// Position of the batch in packing order, `None` for a record that was
    /// never batched.
    pub batch: Option<usize>,
    /// Input positions of the affected records.
    pub records: Vec<usize>,
    pub error: Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Partial,
    Cancelled,
}

/// Outcome of one publish() call.
#[derive(Debug, Default)]
pub struct PublishReport {
    pub partition_key: Option<String>,
    pub total_records: usize,
    pub batches_sent: u64,
    pub events_sent: u64,
    /// Failures in the order they occurred.
    pub failures: Vec<PublishFailure>,
    /// Input positions never attempted because the call was cancelled.
    pub unsent: Vec<usize>,
    pub cancelled: bool,
}

impl PublishReport {
    fn new(partition_key: String, total_records: usize) -> Self {
        Self {
            partition_key: Some(partition_key),
            total_records,
            ..Self::default()
        }
    }

    pub fn status(&self) -> DeliveryStatus {
        if !self.failures.is_empty() {
            DeliveryStatus::Partial
        } else if self.cancelled {
            DeliveryStatus::Cancelled
        } else {
            DeliveryStatus::Delivered
        }
    }

    pub fn first_failure(&self) -> Option<&PublishFailure> {
        self.failures.first()
    }

    /// Input positions of every record that was not delivered.
    pub fn undelivered(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .failures
            .iter()
            .flat_map(|failure| failure.records.iter().copied())
            .chain(self.unsent.iter().copied())
            .collect();
        indices.sort_unstable();
        indices
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} batches delivered ({}/{} records), {} failures",
            self.batches_sent,
            self.events_sent,
            self.total_records,
            self.failures.len()
        );
        if !self.unsent.is_empty() {
            summary.push_str(&format!(", {} records not attempted", self.unsent.len()));
        }
        if let Some(failure) = self.first_failure() {
            summary.push_str(&format!("; first failure: {}", failure.error));
        }
        summary
    }
}

pub struct PublisherSession<C: Connector> {
    config: SinkConfig,
    connector: C,
    sink: Option<C::Sink>,
    sender: RetryingSender,
    key_strategy: PartitionKeyStrategy,
    stats: SessionStats,
    stats_file: Option<StatsFile>,
    closed: bool,
}

impl<C: Connector> PublisherSession<C> {
    /// Creates an unconnected session, failing with [`Error::Config`] if the
    /// connection target or sink name is missing.
    pub fn new(config: SinkConfig, connector: C) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            connector,
            sink: None,
            sender: RetryingSender::default(),
            key_strategy: PartitionKeyStrategy::default(),
            stats: SessionStats::default(),
            stats_file: None,
            closed: false,
        })
    }

    /// Creates a session with the retry policy, partition key and stats file
    /// from `config`.
    pub fn from_config(config: &Config, connector: C) -> Result<Self> {
        let mut session = Self::new(config.sink.clone(), connector)?
            .with_retry_policy(RetryPolicy::from(&config.retry))
            .with_key_strategy(PartitionKeyStrategy::from(config.partition_key.as_deref()));
        if let Some(path) = &config.stats_file {
            session = session.with_stats_file(StatsFile::new(path));
        }
        Ok(session)
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.sender = RetryingSender::new(policy);
        self
    }

    pub fn with_key_strategy(mut self, strategy: PartitionKeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    pub fn with_stats_file(mut self, stats_file: StatsFile) -> Self {
        self.stats_file = Some(stats_file);
        self
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    pub fn key_strategy(&self) -> &PartitionKeyStrategy {
        &self.key_strategy
    }

    pub fn is_connected(&self) -> bool {
        self.sink.is_some()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    #[instrument(skip(self), fields(sink = %self.config.name))]
    pub async fn connect(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::Connection("session already closed".to_string()));
        }
        if self.sink.is_some() {
            debug!("Already connected");
            return Ok(());
        }

        match self.connector.connect(&self.config).await {
            Ok(sink) => {
                self.sink = Some(sink);
                self.stats.start_time = Some(Utc::now());
                info!("Connected to sink: {}", self.config.name);
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to sink: {}", e);
                Err(match e {
                    Error::Connection(_) => e,
                    other => Error::Connection(other.to_string()),
                })
            }
        }
    }

    /// Publishes `records` as one stream under the first record's partition
    /// key.
    ///
    /// Returns the report when everything was delivered. If any batch or
    /// record fails, every remaining batch is still attempted and the call
    /// fails with [`Error::Publish`] carrying the report. Empty input succeeds
    /// without touching the sink.
    pub async fn publish<R>(&mut self, records: &[R]) -> Result<PublishReport>
    where
        R: EventRecord + Sync,
    {
        self.publish_inner(records, None).await
    }

    /// Like [`publish`](Self::publish), but stops between batches once
    /// `token` is cancelled. An in-flight batch always completes.
    pub async fn publish_until_cancelled<R>(
        &mut self,
        records: &[R],
        token: &CancellationToken,
    ) -> Result<PublishReport>
    where
        R: EventRecord + Sync,
    {
        self.publish_inner(records, Some(token)).await
    }

    pub async fn send_translation_event(&mut self, event: TranslationEvent) -> Result<PublishReport> {
        self.publish(std::slice::from_ref(&event)).await
    }

    pub async fn send_translation_events(
        &mut self,
        events: &[TranslationEvent],
    ) -> Result<PublishReport> {
        self.publish(events).await
    }

    async fn publish_inner<R>(
        &mut self,
        records: &[R],
        cancel: Option<&CancellationToken>,
    ) -> Result<PublishReport>
    where
        R: EventRecord + Sync,
    {
        let sink = self.sink.as_ref().ok_or(Error::NotConnected)?;

        let Some(first) = records.first() else {
            warn!("No records to send");
            return Ok(PublishReport::default());
        };

        let partition_key = self.key_strategy.extract_key(first);
        let mut report = PublishReport::new(partition_key.clone(), records.len());
        let mut packer = BatchPacker::new(records, partition_key, self.config.max_batch_bytes);
        let mut batch_seq = 0usize;

        for item in packer.by_ref() {
            match item {
                Ok(batch) => {
                    let seq = batch_seq;
                    batch_seq += 1;

                    match self.sender.send(sink, &batch).await {
                        Ok(()) => {
                            self.stats.batches_sent += 1;
                            self.stats.events_sent += batch.len() as u64;
                            report.batches_sent += 1;
                            report.events_sent += batch.len() as u64;
                            info!(
                                batch = seq,
                                bytes = batch.size_bytes(),
                                "Sent batch with {} events",
                                batch.len()
                            );
                        }
                        Err(e) => {
                            self.stats.errors += 1;
                            error!(batch = seq, "Failed to send batch of {} events: {}", batch.len(), e);
                            report.failures.push(PublishFailure {
                                batch: Some(seq),
                                records: batch.record_indices().to_vec(),
                                error: e,
                            });
                        }
                    }

                    if cancel.is_some_and(CancellationToken::is_cancelled) {
                        debug!(batch = seq, "Publish cancelled after batch");
                        report.cancelled = true;
                        break;
                    }
                }
                Err(e) => {
                    self.stats.errors += 1;
                    let records = match &e {
                        Error::RecordTooLarge { index, .. } | Error::InvalidRecord { index, .. } => {
                            vec![*index]
                        }
                        _ => Vec::new(),
                    };
                    report.failures.push(PublishFailure {
                        batch: None,
                        records,
                        error: e,
                    });
                }
            }
        }

        if report.cancelled {
            report.unsent = packer.into_unsent();
            report.cancelled = !report.unsent.is_empty();
        }

        if !report.failures.is_empty() {
            error!("Publish incomplete: {}", report.summary());
            return Err(Error::Publish(Box::new(report)));
        }
        if report.cancelled {
            warn!("Publish cancelled: {}", report.summary());
            return Err(Error::Cancelled(Box::new(report)));
        }

        info!("Successfully sent {} events", report.events_sent);
        Ok(report)
    }

    /// Tears down the connection and returns the final stats snapshot.
    ///
    /// A no-op returning `None` if the session is not connected, so calling it
    /// twice logs the statistics only once. Teardown errors are logged.
    pub async fn close(&mut self) -> Option<StatsSnapshot> {
        let sink = self.sink.take()?;
        self.closed = true;

        if let Err(e) = sink.close().await {
            warn!("Error while closing sink connection: {}", e);
        }
        info!("Sink connection closed");

        let snapshot = self.stats.snapshot();
        snapshot.log();

        if let Some(stats_file) = &self.stats_file {
            if let Err(e) = stats_file.save(&snapshot).await {
                warn!("Failed to write stats file {:?}: {}", stats_file.path(), e);
            }
        }

        Some(snapshot)
    }

    /// Closes from a synchronous context, handing the sink teardown and the
    /// stats file write to the current runtime.
    fn close_in_background(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        self.closed = true;

        let snapshot = self.stats.snapshot();
        snapshot.log();

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(sink = %self.config.name, "No runtime available, sink dropped without close");
            return;
        };

        let stats_file = self.stats_file.clone();
        handle.spawn(async move {
            if let Err(e) = sink.close().await {
                warn!("Error while closing sink connection: {}", e);
            }
            info!("Sink connection closed");

            if let Some(stats_file) = stats_file {
                if let Err(e) = stats_file.save(&snapshot).await {
                    warn!("Failed to write stats file {:?}: {}", stats_file.path(), e);
                }
            }
        });
    }

    /// Connects, runs `f`, and closes on every exit path of `f`.
    ///
    /// If the returned future is dropped before completion, or `f` panics,
    /// the session is closed in the background on the current runtime.
    pub async fn scoped<T, F>(&mut self, f: F) -> Result<T>
    where
        F: for<'s> FnOnce(&'s mut Self) -> BoxFuture<'s, Result<T>>,
    {
        self.connect().await?;

        let mut guard = CloseGuard {
            session: self,
            armed: true,
        };
        let result = f(&mut *guard.session).await;
        guard.armed = false;
        guard.session.close().await;
        result
    }
}

/// Closes the session if a scoped body never reaches its normal close.
struct CloseGuard<'a, C: Connector> {
    session: &'a mut PublisherSession<C>,
    armed: bool,
}

impl<C: Connector> Drop for CloseGuard<'_, C> {
    fn drop(&mut self) {
        if self.armed && self.session.is_connected() {
            warn!(sink = %self.session.config.name, "Scoped publish interrupted, closing session");
            self.session.close_in_background();
        }
    }
}

impl<C: Connector> Drop for PublisherSession<C> {
    fn drop(&mut self) {
        if self.sink.is_some() {
            warn!(sink = %self.config.name, "Publisher session dropped without close()");
            self.close_in_background();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{MemoryConnector, SendError};

    fn session(connector: &MemoryConnector) -> PublisherSession<MemoryConnector> {
        PublisherSession::new(SinkConfig::new("memory", "translations"), connector.clone())
            .unwrap()
            .with_retry_policy(RetryPolicy::none())
    }

    fn events(n: usize) -> Vec<TranslationEvent> {
        (0..n)
            .map(|i| TranslationEvent::new(format!("hola {}", i), format!("hello {}", i), "en", "es"))
            .collect()
    }

    #[test]
    fn test_missing_configuration_is_rejected() {
        let result = PublisherSession::new(SinkConfig::new("", "translations"), MemoryConnector::new());
        assert!(matches!(result, Err(Error::Config(_))));

        let result = PublisherSession::new(SinkConfig::new("memory", ""), MemoryConnector::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let connector = MemoryConnector::new();
        let mut session = session(&connector);

        let result = session.publish(&events(1)).await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(connector.attempts(), 0);
        assert_eq!(session.stats().errors, 0);
    }

    #[tokio::test]
    async fn test_empty_publish_is_noop() {
        let connector = MemoryConnector::new();
        let mut session = session(&connector);
        session.connect().await.unwrap();

        let report = session.publish::<TranslationEvent>(&[]).await.unwrap();
        assert_eq!(report.status(), DeliveryStatus::Delivered);
        assert_eq!(report.batches_sent, 0);
        assert_eq!(connector.attempts(), 0);

        session.close().await;
    }

    #[tokio::test]
    async fn test_connect_failure_is_connection_error() {
        let connector = MemoryConnector::new();
        connector.reject_handshake("endpoint unreachable");
        let mut session = session(&connector);

        assert!(matches!(session.connect().await, Err(Error::Connection(_))));
        assert!(!session.is_connected());
        assert!(session.stats().start_time.is_none());
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_later_batches() {
        let connector = MemoryConnector::new();
        connector.fail_next(SendError::Permanent("payload rejected".to_string()));

        let mut config = SinkConfig::new("memory", "translations");
        let records = events(3);
        let one_record = records[0].to_wire().unwrap().len();
        // Room for exactly one record per batch.
        config.max_batch_bytes = one_record + one_record / 2;

        let mut session = PublisherSession::new(config, connector.clone())
            .unwrap()
            .with_retry_policy(RetryPolicy::none());
        session.connect().await.unwrap();

        let err = session.publish(&records).await.unwrap_err();
        let report = err.report().unwrap();
        assert_eq!(report.status(), DeliveryStatus::Partial);
        assert_eq!(report.batches_sent, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.first_failure().unwrap().batch, Some(0));
        assert_eq!(report.undelivered(), vec![0]);

        let stats = session.stats();
        assert_eq!(stats.batches_sent, 2);
        assert_eq!(stats.events_sent, 2);
        assert_eq!(stats.errors, 1);

        session.close().await;
    }

    #[tokio::test]
    async fn test_close_without_connect_is_noop() {
        let connector = MemoryConnector::new();
        let mut session = session(&connector);

        assert!(session.close().await.is_none());
        assert_eq!(connector.closes(), 0);
    }

    #[tokio::test]
    async fn test_reconnect_after_close_is_rejected() {
        let connector = MemoryConnector::new();
        let mut session = session(&connector);
        session.connect().await.unwrap();
        session.close().await;

        assert!(matches!(session.connect().await, Err(Error::Connection(_))));
    }
}
