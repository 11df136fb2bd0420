use crate::config::ReconnectConfig;
use log::warn;
use std::future::Future;
use tokio::time::{self, Duration};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl From<&ReconnectConfig> for RetryPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            delay: Duration::from_millis(config.delay_ms),
        }
    }
}

/// Runs `op` until it succeeds, fails with an error `retryable` rejects, or
/// `policy.attempts` are used up. The delay between attempts is fixed.
pub async fn with_backoff<F, Fut, T, E>(
    policy: RetryPolicy,
    retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.attempts && retryable(&e) => {
                warn!("Attempt {attempt}/{} failed: {e}", policy.attempts);

                attempt += 1;
                time::sleep(policy.delay).await;
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let mut calls = 0;

        let result = with_backoff(policy(5), |_: &String| true, || {
            calls += 1;
            let calls = calls;
            async move {
                if calls < 3 {
                    Err(format!("failure {calls}"))
                } else {
                    Ok(calls)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_last_attempt() {
        let mut calls = 0;

        let result: Result<(), String> = with_backoff(policy(3), |_: &String| true, || {
            calls += 1;
            async { Err("down".to_owned()) }
        })
        .await;

        assert_eq!(result, Err("down".to_owned()));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let mut calls = 0;

        let result: Result<(), String> = with_backoff(policy(3), |e: &String| e != "fatal", || {
            calls += 1;
            async { Err("fatal".to_owned()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
