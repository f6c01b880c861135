//! Background task feeding a producer channel into one publisher session.
//!
//! Upstream code (speech callbacks, HTTP handlers, anything) sends records
//! into an `mpsc` channel; the forwarder buffers them and publishes one call
//! per partition key whenever the buffer fills, the flush interval elapses,
//! the channel closes, or shutdown is requested.

use crate::config::ForwarderConfig;
use crate::event::EventRecord;
use crate::partition::group_by_partition_key;
use crate::session::PublisherSession;
use crate::sink::Connector;
use crate::stats::StatsSnapshot;
use crate::{Error, Result};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct Forwarder;

impl Forwarder {
    /// Spawns the forwarding task.
    ///
    /// The task connects the session, runs until the channel closes or
    /// `token` is cancelled, flushes what is left, closes the session and
    /// returns its final statistics. Publish failures are logged and counted
    /// in the session stats; they do not stop the task.
    pub fn spawn<C, R>(
        mut session: PublisherSession<C>,
        mut receiver: mpsc::Receiver<R>,
        config: ForwarderConfig,
        token: CancellationToken,
    ) -> JoinHandle<Result<StatsSnapshot>>
    where
        C: Connector + 'static,
        R: EventRecord + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            session.connect().await?;

            let max_pending = config.max_pending_events.max(1);
            let mut pending: Vec<R> = Vec::with_capacity(max_pending);
            let period = config.flush_interval().max(Duration::from_millis(1));
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!(
                max_pending,
                flush_interval_ms = config.flush_interval_ms,
                "Forwarder started"
            );

            loop {
                tokio::select! {
                    received = receiver.recv() => match received {
                        Some(record) => {
                            pending.push(record);
                            if pending.len() >= max_pending {
                                flush(&mut session, &mut pending).await;
                            }
                        }
                        None => {
                            debug!("Producer channel closed");
                            break;
                        }
                    },
                    _ = ticker.tick() => {
                        if !pending.is_empty() {
                            flush(&mut session, &mut pending).await;
                        }
                    }
                    _ = token.cancelled() => {
                        info!("Forwarder shutdown requested");
                        break;
                    }
                }
            }

            receiver.close();
            while let Ok(record) = receiver.try_recv() {
                pending.push(record);
            }
            if !pending.is_empty() {
                flush(&mut session, &mut pending).await;
            }

            let snapshot = match session.close().await {
                Some(snapshot) => snapshot,
                None => session.stats(),
            };
            info!("Forwarder stopped");
            Ok::<_, Error>(snapshot)
        })
    }
}

async fn flush<C, R>(session: &mut PublisherSession<C>, pending: &mut Vec<R>)
where
    C: Connector,
    R: EventRecord + Sync,
{
    let records = std::mem::take(pending);
    let total = records.len();
    let groups = group_by_partition_key(records, session.key_strategy());
    debug!(records = total, groups = groups.len(), "Flushing pending records");

    for (key, group) in groups {
        match session.publish(&group).await {
            Ok(report) => debug!(partition_key = %key, events = report.events_sent, "Group published"),
            Err(Error::Publish(report)) => {
                warn!(
                    partition_key = %key,
                    undelivered = report.undelivered().len(),
                    "Group partially published: {}",
                    report.summary()
                );
            }
            Err(e) => error!(partition_key = %key, "Failed to publish group: {}", e),
        }
    }
}
