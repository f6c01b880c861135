//! The batch-ingestion boundary.
//!
//! A [`Connector`] establishes a [`Sink`] handle; the sink accepts one batch
//! of serialized records per call and classifies its failures as transient or
//! permanent so the retry layer knows what to do with them.

pub mod kafka;
pub mod memory;

pub use kafka::{KafkaConnector, KafkaSink};
pub use memory::{MemoryConnector, MemorySink, SentBatch};

use crate::config::SinkConfig;
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Failure reported by a sink for a single send attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SendError {
    /// Network blip, timeout or throttling; a retry may succeed.
    #[error("transient: {0}")]
    Transient(String),
    /// Bad credentials or rejected payload; retrying cannot succeed.
    #[error("permanent: {0}")]
    Permanent(String),
}

impl SendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SendError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            SendError::Transient(message) | SendError::Permanent(message) => message,
        }
    }
}

#[async_trait]
pub trait Sink: Send + Sync {
    /// Appends `records` in order under `partition_key`.
    async fn send_batch(
        &self,
        partition_key: &str,
        records: &[Bytes],
    ) -> std::result::Result<(), SendError>;

    /// Releases the connection. Called at most once.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Sink: Sink + 'static;

    /// Establishes a sink handle, failing with [`crate::Error::Connection`]
    /// if the sink cannot be reached or rejects the handshake.
    async fn connect(&self, config: &SinkConfig) -> Result<Self::Sink>;
}
