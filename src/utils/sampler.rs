//! Blocking polling sampler
//!
//! Calls a function at a fixed interval until it yields a value, the total
//! wait budget runs out, or it fails with an error that is not retryable.

use std::fmt;
use std::thread::sleep;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Sampling failures
#[derive(Error, Debug)]
pub enum SamplerError<E: fmt::Debug + fmt::Display> {
    #[error("Timed out after {waited:?} ({attempts} attempts){}", last_error_suffix(.last_error))]
    Timeout {
        waited: Duration,
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("{0}")]
    Aborted(E),
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    last_error
        .as_deref()
        .map(|e| format!(", last error: {e}"))
        .unwrap_or_default()
}

/// Fixed-interval sampler with an overall wait budget
#[derive(Clone, Copy, Debug)]
pub struct TimeoutSampler {
    wait_timeout: Duration,
    sleep: Duration,
}

impl TimeoutSampler {
    pub fn new(wait_timeout: Duration, sleep: Duration) -> Self {
        Self {
            wait_timeout,
            sleep,
        }
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// Sample `func` until it returns `Ok(Some(_))`.
    ///
    /// Errors for which `retry_on` returns true are swallowed and sampling
    /// continues; any other error aborts immediately.
    pub fn sample<T, E, F, R>(&self, mut func: F, retry_on: R) -> Result<T, SamplerError<E>>
    where
        E: fmt::Debug + fmt::Display,
        F: FnMut() -> Result<Option<T>, E>,
        R: Fn(&E) -> bool,
    {
        let start = Instant::now();
        let mut attempts = 0;
        let mut last_error = None;

        loop {
            attempts += 1;
            match func() {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => debug!("Sample {} returned nothing", attempts),
                Err(e) if retry_on(&e) => {
                    debug!("Sample {} failed with retryable error: {}", attempts, e);
                    last_error = Some(e.to_string());
                }
                Err(e) => return Err(SamplerError::Aborted(e)),
            }

            let waited = start.elapsed();
            if waited >= self.wait_timeout {
                return Err(SamplerError::Timeout {
                    waited,
                    attempts,
                    last_error,
                });
            }
            sleep(self.sleep.min(self.wait_timeout - waited));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Probe {
        Flaky,
        Fatal,
    }

    impl fmt::Display for Probe {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn fast() -> TimeoutSampler {
        TimeoutSampler::new(Duration::from_millis(200), Duration::from_millis(1))
    }

    #[test]
    fn test_returns_first_value() {
        let mut calls = 0;
        let value = fast()
            .sample(
                || {
                    calls += 1;
                    Ok::<_, Probe>(if calls == 3 { Some(calls) } else { None })
                },
                |_| false,
            )
            .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn test_retries_retryable_errors() {
        let mut calls = 0;
        let value = fast()
            .sample(
                || {
                    calls += 1;
                    if calls < 4 {
                        Err(Probe::Flaky)
                    } else {
                        Ok(Some("spawned"))
                    }
                },
                |e| *e == Probe::Flaky,
            )
            .unwrap();
        assert_eq!(value, "spawned");
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_aborts_on_other_errors() {
        let mut calls = 0;
        let err = fast()
            .sample(
                || {
                    calls += 1;
                    Err::<Option<()>, _>(Probe::Fatal)
                },
                |e| *e == Probe::Flaky,
            )
            .unwrap_err();
        assert!(matches!(err, SamplerError::Aborted(Probe::Fatal)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_times_out() {
        let sampler = TimeoutSampler::new(Duration::from_millis(20), Duration::from_millis(5));
        let err = sampler
            .sample(|| Err::<Option<()>, _>(Probe::Flaky), |_| true)
            .unwrap_err();
        match err {
            SamplerError::Timeout {
                attempts,
                last_error,
                ..
            } => {
                assert!(attempts >= 2);
                assert_eq!(last_error.as_deref(), Some("Flaky"));
            }
            other => panic!("Expected timeout, got {other:?}"),
        }
    }
}
