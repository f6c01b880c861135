use super::{Connector, SendError, Sink};
use crate::config::SinkConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Error codes for which a retry cannot succeed.
const PERMANENT_CODES: &[RDKafkaErrorCode] = &[
    RDKafkaErrorCode::MessageSizeTooLarge,
    RDKafkaErrorCode::InvalidMessage,
    RDKafkaErrorCode::InvalidMessageSize,
    RDKafkaErrorCode::InvalidRecord,
    RDKafkaErrorCode::TopicAuthorizationFailed,
    RDKafkaErrorCode::ClusterAuthorizationFailed,
    RDKafkaErrorCode::SaslAuthenticationFailed,
    RDKafkaErrorCode::Authentication,
];

/// Connects to any Kafka-protocol endpoint: the connection target is the
/// bootstrap server list and the sink name is the topic.
#[derive(Debug, Clone, Default)]
pub struct KafkaConnector;

pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
    queue_timeout: Duration,
}

impl KafkaConnector {
    pub fn new() -> Self {
        Self
    }

    fn client_config(config: &SinkConfig) -> ClientConfig {
        let kafka = &config.kafka;
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", &config.connection)
            .set("compression.type", &kafka.compression)
            .set("acks", &kafka.acks)
            .set("linger.ms", kafka.linger_ms.to_string())
            .set("message.timeout.ms", kafka.message_timeout_ms.to_string())
            .set("message.max.bytes", config.max_batch_bytes.max(1000).to_string());

        if let Some(protocol) = &kafka.security_protocol {
            client.set("security.protocol", protocol);
        }
        if let Some(mechanism) = &kafka.sasl_mechanism {
            client.set("sasl.mechanism", mechanism);
        }
        if let Some(username) = &kafka.sasl_username {
            client.set("sasl.username", username);
        }
        if let Some(password) = &kafka.sasl_password {
            client.set("sasl.password", password);
        }
        client
    }
}

#[async_trait]
impl Connector for KafkaConnector {
    type Sink = KafkaSink;

    #[instrument(skip(self, config), fields(topic = %config.name))]
    async fn connect(&self, config: &SinkConfig) -> Result<KafkaSink> {
        info!("Connecting to Kafka at {}", config.connection);

        let producer: FutureProducer = Self::client_config(config)
            .create()
            .map_err(|e| Error::Connection(format!("failed to create producer: {}", e)))?;

        // Producer creation is lazy; a metadata round trip is the handshake.
        let probe = producer.clone();
        let topic = config.name.clone();
        let timeout = config.connect_timeout();
        let metadata = tokio::task::spawn_blocking(move || {
            probe.client().fetch_metadata(Some(&topic), timeout)
        })
        .await
        .map_err(|e| Error::Connection(format!("metadata task failed: {}", e)))?
        .map_err(|e| Error::Connection(format!("handshake failed: {}", e)))?;

        let topic = metadata
            .topics()
            .iter()
            .find(|topic| topic.name() == config.name)
            .ok_or_else(|| Error::Connection(format!("topic '{}' not found", config.name)))?;

        if let Some(err) = topic.error() {
            return Err(Error::Connection(format!(
                "topic '{}' unavailable: {:?}",
                config.name,
                RDKafkaErrorCode::from(err)
            )));
        }

        info!(partitions = topic.partitions().len(), "Connected to Kafka topic");

        Ok(KafkaSink {
            producer,
            topic: config.name.clone(),
            queue_timeout: Duration::from_millis(config.kafka.message_timeout_ms),
        })
    }
}

impl KafkaSink {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Sink for KafkaSink {
    async fn send_batch(
        &self,
        partition_key: &str,
        records: &[Bytes],
    ) -> std::result::Result<(), SendError> {
        let mut deliveries = Vec::with_capacity(records.len());

        // Enqueue in order; the shared key keeps the batch on one partition.
        for payload in records {
            let record = FutureRecord::to(&self.topic)
                .payload(payload.as_ref())
                .key(partition_key);

            match self.producer.send_result(record) {
                Ok(delivery) => deliveries.push(delivery),
                Err((e, _)) => return Err(classify(e)),
            }
        }

        let mut failures: Vec<SendError> = Vec::new();
        for outcome in join_all(deliveries).await {
            let failure = match outcome {
                Ok(Ok(_)) => continue,
                Ok(Err((e, _))) => classify(e),
                Err(_) => SendError::Transient("delivery cancelled".to_string()),
            };
            debug!(topic = %self.topic, "Delivery failed: {}", failure);
            failures.push(failure);
        }

        match batch_failure(failures) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<()> {
        info!(topic = %self.topic, "Flushing Kafka producer");
        let producer = self.producer.clone();
        let timeout = self.queue_timeout.min(CLOSE_FLUSH_TIMEOUT);

        match tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout))).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!("Failed to flush Kafka producer: {}", e);
                Err(Error::Kafka(e))
            }
            Err(e) => {
                error!("Flush task failed: {}", e);
                Err(Error::Connection(format!("flush task failed: {}", e)))
            }
        }
    }
}

/// Reduces per-record delivery failures to the batch outcome.
///
/// A permanent failure anywhere in the batch makes the batch permanent;
/// otherwise the first transient failure is reported.
fn batch_failure(failures: impl IntoIterator<Item = SendError>) -> Option<SendError> {
    let mut first_error: Option<SendError> = None;
    for failure in failures {
        let replace = match &first_error {
            None => true,
            Some(existing) => existing.is_transient() && !failure.is_transient(),
        };
        if replace {
            first_error = Some(failure);
        }
    }
    first_error
}

/// Sorts a Kafka error into transient or permanent.
pub fn classify(error: KafkaError) -> SendError {
    match error.rdkafka_error_code() {
        Some(code) if PERMANENT_CODES.contains(&code) => SendError::Permanent(error.to_string()),
        _ => SendError::Transient(error.to_string()),
    }
}
