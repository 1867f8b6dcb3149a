//! Retry Integration Tests
//!
//! Runs on a paused clock so backoff delays can be measured.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use tilawa::core::{retry, retry_if, RetryPolicy, Retryable};

#[derive(Debug, Error)]
enum TestError {
    #[error("connection reset")]
    Transient,
    #[error("HTTP 401 Unauthorized")]
    Fatal,
}

impl Retryable for TestError {
    fn is_retryable(&self) -> bool {
        matches!(self, TestError::Transient)
    }
}

/// Paused-clock sleeps may round up to the next millisecond tick
fn assert_elapsed(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(5),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1000,
        max_delay_ms: 30_000,
        backoff_multiplier: 2.0,
    }
}

#[tokio::test(start_paused = true)]
async fn test_fails_twice_then_succeeds() {
    let calls = Arc::new(AtomicU32::new(0));
    let started = Arc::new(Mutex::new(Vec::new()));
    let mut retried = Vec::new();

    let result: Result<&str, TestError> = retry(
        &policy(),
        || {
            let calls = Arc::clone(&calls);
            let started = Arc::clone(&started);
            async move {
                started.lock().unwrap().push(Instant::now());
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok("downloaded")
                }
            }
        },
        |attempt, _| retried.push(attempt),
    )
    .await;

    assert_eq!(result.unwrap(), "downloaded");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(retried, vec![1, 2]);

    let started = started.lock().unwrap();
    assert_elapsed(started[1] - started[0], Duration::from_millis(1000));
    assert_elapsed(started[2] - started[1], Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_fails_fast() {
    let calls = Arc::new(AtomicU32::new(0));
    let begin = Instant::now();

    let result: Result<(), TestError> = retry(
        &policy(),
        || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fatal)
            }
        },
        |_, _| panic!("should not retry"),
    )
    .await;

    assert!(matches!(result, Err(TestError::Fatal)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(begin.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_attempts_return_last_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let begin = Instant::now();

    let result: Result<(), TestError> = retry(
        &policy(),
        || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Transient)
            }
        },
        |_, _| {},
    )
    .await;

    assert!(matches!(result, Err(TestError::Transient)));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    // Sleeps after attempts 1 and 2 only
    assert_elapsed(begin.elapsed(), Duration::from_millis(3000));
}

#[tokio::test(start_paused = true)]
async fn test_delay_is_capped() {
    let policy = RetryPolicy {
        max_attempts: 4,
        initial_delay_ms: 1000,
        max_delay_ms: 1500,
        backoff_multiplier: 2.0,
    };
    let begin = Instant::now();

    let result: Result<(), TestError> =
        retry(&policy, || async { Err(TestError::Transient) }, |_, _| {}).await;

    assert!(result.is_err());
    assert_elapsed(begin.elapsed(), Duration::from_millis(1000 + 1500 + 1500));
}

#[tokio::test(start_paused = true)]
async fn test_anyhow_errors_classified_by_message() {
    let calls = Arc::new(AtomicU32::new(0));

    let result: anyhow::Result<u32> = retry(
        &policy(),
        || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    anyhow::bail!("connect ETIMEDOUT 10.0.0.1:443");
                }
                Ok(n)
            }
        },
        |_, _| {},
    )
    .await;

    assert_eq!(result.unwrap(), 1);

    let fatal: anyhow::Result<()> = retry(
        &policy(),
        || async { Err(anyhow::anyhow!("HTTP 403 Forbidden")) },
        |_, _| panic!("should not retry"),
    )
    .await;
    assert!(fatal.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_retry_if_uses_classifier() {
    let calls = Arc::new(AtomicU32::new(0));

    let result: Result<(), TestError> = retry_if(
        &policy(),
        || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fatal)
            }
        },
        |_| true,
        |_, _| {},
    )
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
