//! Error types and result handling for translation-publisher.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use translation_publisher::{Error, Result};
//!
//! fn publish_nothing() -> Result<()> {
//!     Err(Error::NotConnected)
//! }
//!
//! match publish_nothing() {
//!     Ok(()) => println!("Published"),
//!     Err(Error::NotConnected) => eprintln!("Call connect() first"),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use crate::session::PublishReport;
use thiserror::Error;

/// The main error type for publisher operations.
///
/// Configuration and connection errors are fatal for a session. Record and
/// send errors are reported per record or per batch and aggregated into the
/// [`PublishReport`] of the call that produced them.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration, raised at session construction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The sink was unreachable or rejected the handshake.
    #[error("Connection error: {0}")]
    Connection(String),

    /// publish() or send attempted before a successful connect().
    #[error("Publisher not connected; call connect() first")]
    NotConnected,

    /// A single record is larger than the sink's maximum batch size.
    #[error("Record {index} is {size} bytes, exceeding the maximum batch size of {max} bytes")]
    RecordTooLarge {
        /// Position of the record in the publish() input
        index: usize,
        /// Serialized size of the record
        size: usize,
        /// Maximum batch size of the sink
        max: usize,
    },

    /// A single record could not be serialized to its wire form.
    #[error("Record {index} could not be serialized: {message}")]
    InvalidRecord {
        /// Position of the record in the publish() input
        index: usize,
        /// Serializer error message
        message: String,
    },

    /// Transient send failure that persisted through every attempt.
    #[error("Transient send error after {attempts} attempts: {message}")]
    TransientSend {
        /// Number of attempts made, including the first
        attempts: u32,
        /// Last error reported by the sink
        message: String,
    },

    /// The sink rejected the batch; retrying cannot succeed.
    #[error("Permanent send error: {message}")]
    PermanentSend {
        /// Error reported by the sink
        message: String,
    },

    /// At least one batch or record of a publish() call failed.
    #[error("Publish failed: {}", .0.summary())]
    Publish(Box<PublishReport>),

    /// The publish() call was cancelled before every batch was sent.
    #[error("Publish cancelled: {}", .0.summary())]
    Cancelled(Box<PublishReport>),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Kafka client error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// I/O error, typically from stats file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the report of a failed or cancelled publish() call.
    pub fn report(&self) -> Option<&PublishReport> {
        match self {
            Error::Publish(report) | Error::Cancelled(report) => Some(report),
            _ => None,
        }
    }
}

/// A convenient Result type alias for publisher operations.
///
/// This is equivalent to `std::result::Result<T, translation_publisher::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
