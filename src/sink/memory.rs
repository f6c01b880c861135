//! In-process sink that records every delivered batch.
//!
//! Used by `--dry-run` and by tests. Failures can be scripted per attempt, and
//! the connector can be told to reject the handshake.

use super::{Connector, SendError, Sink};
use crate::config::SinkConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentBatch {
    pub partition_key: String,
    pub records: Vec<Bytes>,
}

#[derive(Debug, Default)]
struct MemoryState {
    batches: Vec<SentBatch>,
    attempts: Vec<Instant>,
    scripted: VecDeque<SendError>,
    reject_handshake: Option<String>,
    connects: usize,
    closes: usize,
}

/// Shared handle onto the recorded state; clones observe the same sink.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Clone)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later connect() fail with `reason`.
    pub fn reject_handshake(&self, reason: impl Into<String>) {
        lock(&self.state).reject_handshake = Some(reason.into());
    }

    /// Queues a failure for the next send attempt. Attempts beyond the
    /// queued failures succeed.
    pub fn fail_next(&self, error: SendError) {
        lock(&self.state).scripted.push_back(error);
    }

    pub fn sent_batches(&self) -> Vec<SentBatch> {
        lock(&self.state).batches.clone()
    }

    /// Instants at which send attempts were observed, successful or not.
    pub fn attempt_times(&self) -> Vec<Instant> {
        lock(&self.state).attempts.clone()
    }

    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts.len()
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    pub fn closes(&self) -> usize {
        lock(&self.state).closes
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Sink = MemorySink;

    async fn connect(&self, config: &SinkConfig) -> Result<MemorySink> {
        let mut state = lock(&self.state);
        if let Some(reason) = &state.reject_handshake {
            return Err(Error::Connection(reason.clone()));
        }
        state.connects += 1;
        info!(sink = %config.name, "Connected to in-memory sink");
        Ok(MemorySink {
            state: Arc::clone(&self.state),
        })
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn send_batch(
        &self,
        partition_key: &str,
        records: &[Bytes],
    ) -> std::result::Result<(), SendError> {
        let mut state = lock(&self.state);
        state.attempts.push(Instant::now());

        if let Some(error) = state.scripted.pop_front() {
            debug!(partition_key, "Scripted failure: {}", error);
            return Err(error);
        }

        state.batches.push(SentBatch {
            partition_key: partition_key.to_string(),
            records: records.to_vec(),
        });
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        lock(&self.state).closes += 1;
        Ok(())
    }
}
