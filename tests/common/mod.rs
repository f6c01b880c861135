#![allow(dead_code)]

use bytes::Bytes;
use serde::Serialize;
use std::env;
use translation_publisher::config::SinkConfig;
use translation_publisher::retry::RetryPolicy;
use translation_publisher::sink::MemoryConnector;
use translation_publisher::{EventRecord, PublisherSession, Result, TranslationEvent};

/// Record whose wire form is exactly `size` bytes, for deterministic packing.
#[derive(Debug, Clone, Serialize)]
pub struct SizedEvent {
    pub id: usize,
    pub size: usize,
    pub key: String,
}

impl SizedEvent {
    pub fn new(id: usize, size: usize) -> Self {
        Self {
            id,
            size,
            key: "en-to-es".to_string(),
        }
    }
}

impl EventRecord for SizedEvent {
    fn partition_key(&self) -> String {
        self.key.clone()
    }

    fn to_wire(&self) -> Result<Bytes> {
        let mut wire = format!("{:08}", self.id).into_bytes();
        wire.resize(self.size.max(8), b' ');
        wire.truncate(self.size);
        Ok(Bytes::from(wire))
    }
}

pub fn sized_events(sizes: &[usize]) -> Vec<SizedEvent> {
    sizes
        .iter()
        .enumerate()
        .map(|(id, &size)| SizedEvent::new(id, size))
        .collect()
}

pub fn translation(source: &str, target: &str, text: &str) -> TranslationEvent {
    TranslationEvent::new(text, text, source, target)
        .with_confidence(0.95)
        .with_service("azure_speech_sdk")
}

pub fn memory_session(
    connector: &MemoryConnector,
    max_batch_bytes: usize,
) -> PublisherSession<MemoryConnector> {
    let mut config = SinkConfig::new("memory://local", "translations");
    config.max_batch_bytes = max_batch_bytes;
    PublisherSession::new(config, connector.clone())
        .unwrap()
        .with_retry_policy(RetryPolicy::default())
}

/// Kafka sink configuration from environment variables.
pub fn get_test_kafka_config() -> SinkConfig {
    let brokers = env::var("TEST_KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string());
    let topic = env::var("TEST_KAFKA_TOPIC")
        .unwrap_or_else(|_| format!("test_translations_{}", std::process::id()));

    let mut config = SinkConfig::new(brokers, topic);
    config.connect_timeout_secs = 10;
    config.kafka.linger_ms = 0;
    config
}
