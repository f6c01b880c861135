//! Event records accepted by the publisher.
//!
//! An [`EventRecord`] knows its own partition key and how to turn itself into
//! wire bytes. The wire timestamp is taken when the record is serialized, not
//! when it is created, so records that wait in memory are stamped with their
//! send time.

use crate::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of work the publisher can deliver.
pub trait EventRecord: Serialize {
    /// Key the sink uses to route records of this kind.
    fn partition_key(&self) -> String;

    /// Serializes the record to its compact wire form.
    fn to_wire(&self) -> Result<Bytes>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationEvent {
    pub translated_text: String,
    pub source_text: String,
    pub source_language: String,
    pub target_language: String,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub translation_service: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Wire representation of a [`TranslationEvent`].
#[derive(Debug, Serialize)]
struct WireTranslationEvent<'a> {
    #[serde(flatten)]
    event: &'a TranslationEvent,
    timestamp: DateTime<Utc>,
    event_type: &'static str,
}

impl TranslationEvent {
    pub fn new(
        translated_text: impl Into<String>,
        source_text: impl Into<String>,
        source_language: impl Into<String>,
        target_language: impl Into<String>,
    ) -> Self {
        Self {
            translated_text: translated_text.into(),
            source_text: source_text.into(),
            source_language: source_language.into(),
            target_language: target_language.into(),
            confidence_score: None,
            translation_service: None,
            user_id: None,
            session_id: None,
        }
    }

    pub fn with_confidence(mut self, score: f64) -> Self {
        self.confidence_score = Some(score);
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.translation_service = Some(service.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

impl EventRecord for TranslationEvent {
    fn partition_key(&self) -> String {
        format!("{}-to-{}", self.source_language, self.target_language)
    }

    fn to_wire(&self) -> Result<Bytes> {
        let wire = WireTranslationEvent {
            event: self,
            timestamp: Utc::now(),
            event_type: "translation",
        };
        Ok(Bytes::from(serde_json::to_vec(&wire)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_partition_key_from_language_pair() {
        let event = TranslationEvent::new("Hola mundo", "Hello world", "en", "es");
        assert_eq!(event.partition_key(), "en-to-es");
    }

    #[test]
    fn test_wire_form_is_compact_and_tagged() {
        let event = TranslationEvent::new("Hola mundo", "Hello world", "en", "es")
            .with_confidence(0.95)
            .with_service("azure_speech_sdk");

        let wire = event.to_wire().unwrap();
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(!text.contains('\n'));

        let parsed: Value = serde_json::from_slice(&wire).unwrap();
        assert_eq!(parsed["translated_text"], "Hola mundo");
        assert_eq!(parsed["source_language"], "en");
        assert_eq!(parsed["confidence_score"], 0.95);
        assert_eq!(parsed["user_id"], Value::Null);
        assert_eq!(parsed["event_type"], "translation");
        assert!(parsed["timestamp"].is_string());
    }

    #[test]
    fn test_timestamp_assigned_at_serialization() {
        let event = TranslationEvent::new("헬로, 월드", "Hello world", "en", "ko");

        let before = Utc::now();
        let wire = event.to_wire().unwrap();
        let parsed: Value = serde_json::from_slice(&wire).unwrap();
        let stamped: DateTime<Utc> = parsed["timestamp"].as_str().unwrap().parse().unwrap();

        assert!(stamped >= before);
    }
}
