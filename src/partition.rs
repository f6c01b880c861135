use crate::event::EventRecord;

/// How the partition key of a publish() call is derived.
///
/// The key is always computed from the first record of the call and applied
/// to every batch of that call, even if later records would produce a
/// different key. Callers that need per-key routing group records first, see
/// [`group_by_partition_key`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PartitionKeyStrategy {
    /// The record's own key, `"{source}-to-{target}"` for translations.
    #[default]
    LanguagePair,
    /// One key for every record, routing the whole stream together.
    Fixed(String),
}

impl PartitionKeyStrategy {
    pub fn extract_key<R: EventRecord>(&self, record: &R) -> String {
        match self {
            PartitionKeyStrategy::LanguagePair => record.partition_key(),
            PartitionKeyStrategy::Fixed(key) => key.clone(),
        }
    }
}

impl From<Option<&str>> for PartitionKeyStrategy {
    fn from(fixed_key: Option<&str>) -> Self {
        match fixed_key.map(str::trim) {
            Some(key) if !key.is_empty() => PartitionKeyStrategy::Fixed(key.to_string()),
            _ => PartitionKeyStrategy::LanguagePair,
        }
    }
}

/// Splits records into runs sharing a partition key, in first-seen order.
///
/// Relative order is preserved inside each group.
pub fn group_by_partition_key<R: EventRecord>(
    records: Vec<R>,
    strategy: &PartitionKeyStrategy,
) -> Vec<(String, Vec<R>)> {
    let mut groups: Vec<(String, Vec<R>)> = Vec::new();

    for record in records {
        let key = strategy.extract_key(&record);
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, group)) => group.push(record),
            None => groups.push((key, vec![record])),
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TranslationEvent;

    fn create_test_event(source: &str, target: &str) -> TranslationEvent {
        TranslationEvent::new("translated", "source", source, target)
            .with_user("user-42")
            .with_session("session-7")
            .with_confidence(0.9)
    }

    #[test]
    fn test_language_pair_strategy() {
        let event = create_test_event("en", "ko");
        assert_eq!(PartitionKeyStrategy::LanguagePair.extract_key(&event), "en-to-ko");
    }

    #[test]
    fn test_fixed_strategy_ignores_languages() {
        let strategy = PartitionKeyStrategy::Fixed("translations".to_string());
        assert_eq!(strategy.extract_key(&create_test_event("en", "ko")), "translations");
        assert_eq!(strategy.extract_key(&create_test_event("fr", "en")), "translations");
    }

    #[test]
    fn test_strategy_from_configured_key() {
        assert_eq!(PartitionKeyStrategy::from(None), PartitionKeyStrategy::LanguagePair);
        assert_eq!(PartitionKeyStrategy::from(Some("  ")), PartitionKeyStrategy::LanguagePair);
        assert_eq!(
            PartitionKeyStrategy::from(Some("all")),
            PartitionKeyStrategy::Fixed("all".to_string())
        );
    }

    #[test]
    fn test_group_by_partition_key_preserves_order() {
        let records = vec![
            create_test_event("en", "ko"),
            create_test_event("en", "es"),
            create_test_event("en", "ko"),
            create_test_event("fr", "en"),
        ];

        let groups = group_by_partition_key(records, &PartitionKeyStrategy::LanguagePair);
        let keys: Vec<&str> = groups.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["en-to-ko", "en-to-es", "fr-to-en"]);
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].1.len(), 1);
    }
}
