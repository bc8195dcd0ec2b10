//! Scoped fixture lifecycle
//!
//! Every cluster object a scenario creates registers an async cleanup in a
//! [`FixtureScope`]. Closing the scope runs the cleanups newest first and
//! attempts all of them; [`run_scoped`] closes the scope however the body
//! ends, including by panic.

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Scenario body panicked: {0}")]
    Panicked(String),

    #[error("Cleanup of {name} failed: {message}")]
    Cleanup { name: String, message: String },
}

type Cleanup = BoxFuture<'static, Result<()>>;

/// Registry of pending cleanups
#[derive(Clone, Default)]
pub struct FixtureScope {
    cleanups: Arc<Mutex<Vec<(String, Cleanup)>>>,
}

impl FixtureScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `cleanup` to run when the scope closes
    pub fn defer<F>(&self, name: impl Into<String>, cleanup: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        debug!("Registered cleanup for {}", name);
        self.lock().push((name, cleanup.boxed()));
    }

    /// Run `create`, register `teardown`, then run `wait`.
    ///
    /// The teardown is registered as soon as `create` succeeds, so an object
    /// whose wait fails is still removed when the scope closes.
    pub async fn provision<C, R, D, W, T>(
        &self,
        name: impl Into<String>,
        create: C,
        teardown: D,
        wait: W,
    ) -> Result<T>
    where
        C: Future<Output = Result<R>>,
        D: Future<Output = Result<()>> + Send + 'static,
        W: Future<Output = Result<T>>,
    {
        create.await?;
        self.defer(name, teardown);
        wait.await
    }

    /// Number of pending cleanups
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, Cleanup)>> {
        self.cleanups.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run every pending cleanup, newest first.
    ///
    /// Failures are logged; the first one is returned after all cleanups ran.
    pub async fn close(&self) -> Result<(), FixtureError> {
        let cleanups = std::mem::take(&mut *self.lock());
        let mut first_error = None;

        for (name, cleanup) in cleanups.into_iter().rev() {
            let message = match AssertUnwindSafe(cleanup).catch_unwind().await {
                Ok(Ok(())) => {
                    debug!("Cleaned up {}", name);
                    continue;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => panic_message(panic.as_ref()),
            };

            warn!("Cleanup of {} failed: {}", name, message);
            first_error.get_or_insert(FixtureError::Cleanup { name, message });
        }

        first_error.map_or(Ok(()), Err)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Run `body` with a fresh scope and always close it.
///
/// A body error or panic wins over cleanup failures, which are only logged.
pub async fn run_scoped<T, F, Fut>(body: F) -> Result<T>
where
    F: FnOnce(FixtureScope) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let scope = FixtureScope::new();
    let outcome = AssertUnwindSafe(body(scope.clone())).catch_unwind().await;
    debug!("Closing fixture scope with {} cleanup(s)", scope.pending());
    let closed = scope.close().await;

    match outcome {
        Ok(Ok(value)) => {
            closed?;
            Ok(value)
        }
        Ok(Err(e)) => {
            if let Err(cleanup) = closed {
                warn!("{}", cleanup);
            }
            Err(e)
        }
        Err(panic) => {
            if let Err(cleanup) = closed {
                warn!("{}", cleanup);
            }
            Err(FixtureError::Panicked(panic_message(panic.as_ref())).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn explode(message: &str) -> Result<()> {
        panic!("{message}")
    }

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> impl Future<Output = Result<()>> {
        let log = Arc::clone(log);
        async move {
            log.lock().unwrap().push(name);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cleanups_run_newest_first() {
        let log = recorder();
        let scope = FixtureScope::new();
        scope.defer("nncp", record(&log, "nncp"));
        scope.defer("namespace", record(&log, "namespace"));
        scope.defer("vm", record(&log, "vm"));
        assert_eq!(scope.pending(), 3);

        scope.close().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["vm", "namespace", "nncp"]);
        assert_eq!(scope.pending(), 0);
    }

    #[tokio::test]
    async fn test_failing_cleanup_does_not_stop_others() {
        let log = recorder();
        let scope = FixtureScope::new();
        scope.defer("namespace", record(&log, "namespace"));
        scope.defer("nad", async { Err::<(), _>(anyhow::anyhow!("api server unavailable")) });
        scope.defer("vm", async { explode("vm cleanup exploded") });

        let err = scope.close().await.unwrap_err();
        match err {
            FixtureError::Cleanup { name, message } => {
                assert_eq!(name, "vm");
                assert!(message.contains("exploded"));
            }
            other => panic!("Expected cleanup error, got {other:?}"),
        }
        assert_eq!(*log.lock().unwrap(), vec!["namespace"]);
    }

    #[tokio::test]
    async fn test_namespace_deleted_when_body_fails() {
        let deleted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&deleted);

        let result: Result<()> = run_scoped(|scope| async move {
            scope.defer("namespace test-localnet-ns1", async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });
            Err(anyhow::anyhow!("VM never became ready"))
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "VM never became ready");
        assert!(deleted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cleanup_runs_after_panic() {
        let deleted = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&deleted);

        let result: Result<()> = run_scoped(|scope| async move {
            scope.defer("namespace", async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });
            explode("assertion in scenario body")
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FixtureError>(),
            Some(FixtureError::Panicked(msg)) if msg.contains("assertion")
        ));
        assert!(deleted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_provision_removes_object_when_wait_fails() {
        let log = recorder();
        let teardown = record(&log, "delete test-localnet-ns1");

        let result: Result<()> = run_scoped(|scope| async move {
            scope
                .provision(
                    "namespace test-localnet-ns1",
                    async { Ok::<(), anyhow::Error>(()) },
                    teardown,
                    async { Err::<(), _>(anyhow::anyhow!("Namespace test-localnet-ns1 not Active after 120s")) },
                )
                .await
        })
        .await;

        assert!(result.unwrap_err().to_string().contains("not Active"));
        assert_eq!(*log.lock().unwrap(), vec!["delete test-localnet-ns1"]);
    }

    #[tokio::test]
    async fn test_provision_skips_teardown_when_create_fails() {
        let log = recorder();
        let scope = FixtureScope::new();

        let result = scope
            .provision(
                "namespace test-localnet-ns1",
                async { Err::<(), _>(anyhow::anyhow!("already exists")) },
                record(&log, "delete test-localnet-ns1"),
                async { Ok::<(), anyhow::Error>(()) },
            )
            .await;

        assert!(result.is_err());
        assert_eq!(scope.pending(), 0);
        scope.close().await.unwrap();
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_error_reported_on_success() {
        let result = run_scoped(|scope| async move {
            scope.defer("nncp", async { Err::<(), _>(anyhow::anyhow!("still degraded")) });
            Ok(42)
        })
        .await;

        assert!(result.unwrap_err().to_string().contains("nncp"));
    }
}
