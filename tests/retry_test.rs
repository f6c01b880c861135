mod common;

use bytes::Bytes;
use std::time::Duration;
use translation_publisher::batch::Batch;
use translation_publisher::config::SinkConfig;
use translation_publisher::retry::{RetryPolicy, RetryingSender};
use translation_publisher::sink::{Connector, MemoryConnector, SendError};
use translation_publisher::Error;

fn single_record_batch() -> Batch {
    let mut batch = Batch::new("en-to-es", 1024);
    batch
        .try_add(0, Bytes::from_static(br#"{"translated_text":"Hola mundo"}"#))
        .unwrap();
    batch
}

async fn send_with_transient_failures(failures: usize) -> (translation_publisher::Result<()>, MemoryConnector) {
    let connector = MemoryConnector::new();
    for i in 0..failures {
        connector.fail_next(SendError::Transient(format!("server busy #{}", i)));
    }
    let sink = connector
        .connect(&SinkConfig::new("memory://local", "translations"))
        .await
        .unwrap();

    let sender = RetryingSender::new(RetryPolicy::default());
    let result = sender.send(&sink, &single_record_batch()).await;
    (result, connector)
}

fn assert_within(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(50),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

#[tokio::test(start_paused = true)]
async fn test_succeeds_when_failures_below_ceiling() {
    for failures in 0..3 {
        let (result, connector) = send_with_transient_failures(failures).await;
        assert!(result.is_ok(), "{} failures should be absorbed", failures);
        assert_eq!(connector.attempts(), failures + 1);
        assert_eq!(connector.sent_batches().len(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_fails_after_attempt_ceiling() {
    let (result, connector) = send_with_transient_failures(3).await;

    match result {
        Err(Error::TransientSend { attempts, message }) => {
            assert_eq!(attempts, 3);
            assert_eq!(message, "server busy #2");
        }
        other => panic!("expected TransientSend, got {:?}", other),
    }
    assert_eq!(connector.attempts(), 3);
    assert!(connector.sent_batches().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_between_attempts() {
    let (result, connector) = send_with_transient_failures(2).await;
    assert!(result.is_ok());

    let times = connector.attempt_times();
    assert_eq!(times.len(), 3);
    // multiplier 1s doubled per attempt, clamped to the 2s minimum
    assert_within(times[1] - times[0], Duration::from_secs(2));
    assert_within(times[2] - times[1], Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_until_max() {
    let connector = MemoryConnector::new();
    for _ in 0..5 {
        connector.fail_next(SendError::Transient("timeout".to_string()));
    }
    let sink = connector
        .connect(&SinkConfig::new("memory://local", "translations"))
        .await
        .unwrap();

    let policy = RetryPolicy::new(
        6,
        Duration::from_secs(1),
        Duration::from_secs(2),
        Duration::from_secs(10),
    );
    let result = RetryingSender::new(policy).send(&sink, &single_record_batch()).await;
    assert!(result.is_ok());

    let times = connector.attempt_times();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    let expected = [2, 2, 4, 8, 10];
    assert_eq!(gaps.len(), expected.len());
    for (gap, secs) in gaps.iter().zip(expected) {
        assert_within(*gap, Duration::from_secs(secs));
    }
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_short_circuits() {
    let connector = MemoryConnector::new();
    connector.fail_next(SendError::Permanent("authentication failed".to_string()));
    let sink = connector
        .connect(&SinkConfig::new("memory://local", "translations"))
        .await
        .unwrap();

    let start = tokio::time::Instant::now();
    let result = RetryingSender::default()
        .send(&sink, &single_record_batch())
        .await;

    assert!(matches!(result, Err(Error::PermanentSend { .. })));
    assert_eq!(connector.attempts(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_after_transient_stops_retrying() {
    let connector = MemoryConnector::new();
    connector.fail_next(SendError::Transient("throttled".to_string()));
    connector.fail_next(SendError::Permanent("payload rejected".to_string()));
    let sink = connector
        .connect(&SinkConfig::new("memory://local", "translations"))
        .await
        .unwrap();

    let result = RetryingSender::default()
        .send(&sink, &single_record_batch())
        .await;

    assert!(matches!(result, Err(Error::PermanentSend { .. })));
    assert_eq!(connector.attempts(), 2);
}
