//! A ready-made [`Service`] driven by three lifecycle hooks.
//!
//! [`BasicService`] owns the state machine; the [`Lifecycle`] implementation
//! only supplies the work:
//!
//! ```text
//! start() ──► Starting ── starting(token) ──► Running ── running(token) ──► Stopping
//!                 │                                                           │
//!                 └─ Err ─► Failed (stopping is not invoked)     stopping(failure)
//!                                                                             │
//!                                                     Terminated ◄── Ok ──────┴── Err ──► Failed
//! ```
//!
//! The token handed to the hooks is a child of the token passed to
//! [`Service::start`]; [`Service::stop`] cancels it. A hook that panics is
//! treated as a fault.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{FailureCause, ServiceError, ServiceResult};
use crate::service::{Service, ServiceState};

/// The work performed by a [`BasicService`].
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    /// Prepares the service. `Running` is entered once this returns `Ok`.
    async fn starting(&self, _token: CancellationToken) -> Result<(), FailureCause> {
        Ok(())
    }

    /// The main loop. Should return once `token` is cancelled.
    async fn running(&self, token: CancellationToken) -> Result<(), FailureCause>;

    /// Cleans up after `running` returned; `failure` is its error, if any.
    async fn stopping(&self, _failure: Option<&FailureCause>) -> Result<(), FailureCause> {
        Ok(())
    }
}

/// Adapts a closure into a [`Lifecycle`] with only a running hook.
struct RunFn<F>(F);

#[async_trait]
impl<F, Fut> Lifecycle for RunFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), FailureCause>> + Send + 'static,
{
    async fn running(&self, token: CancellationToken) -> Result<(), FailureCause> {
        (self.0)(token).await
    }
}

/// Runs until stopped.
struct Idle;

#[async_trait]
impl Lifecycle for Idle {
    async fn running(&self, token: CancellationToken) -> Result<(), FailureCause> {
        token.cancelled().await;
        Ok(())
    }
}

struct Inner {
    lifecycle: Box<dyn Lifecycle>,
    state: watch::Sender<ServiceState>,
    failure: Mutex<Option<FailureCause>>,
    /// Set by `start`; also serializes `start` against `stop`.
    token: Mutex<Option<CancellationToken>>,
}

impl Inner {
    fn current(&self) -> ServiceState {
        *self.state.borrow()
    }

    fn transition(&self, next: ServiceState) {
        let prev = self.state.send_replace(next);
        trace!(from = %prev, to = %next, "Service state transition");
    }

    fn fail(&self, cause: FailureCause) {
        debug!(kind = %cause.kind(), error = %cause, "Service failed");
        *self.failure.lock() = Some(cause);
        self.transition(ServiceState::Failed);
    }

    async fn drive(self: Arc<Self>, token: CancellationToken) {
        if let Err(cause) = guarded(self.lifecycle.starting(token.clone())).await {
            if token.is_cancelled() {
                debug!(error = %cause, "Service stopped while starting");
                self.transition(ServiceState::Terminated);
            } else {
                self.fail(cause);
            }
            return;
        }

        self.transition(ServiceState::Running);
        let run = guarded(self.lifecycle.running(token.clone())).await;

        self.transition(ServiceState::Stopping);
        let stop = guarded(self.lifecycle.stopping(run.as_ref().err())).await;

        match run.err().or(stop.err()) {
            Some(cause) => self.fail(cause),
            None => self.transition(ServiceState::Terminated),
        }
    }
}

/// Awaits a hook, converting a panic into a fault.
async fn guarded<F>(hook: F) -> Result<(), FailureCause>
where
    F: Future<Output = Result<(), FailureCause>>,
{
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(FailureCause::fault(format!(
            "service panicked: {}",
            panic_message(&*panic)
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A [`Service`] whose work is supplied by a [`Lifecycle`].
///
/// # Example
///
/// ```rust,ignore
/// let svc = BasicService::from_fn(|token| async move {
///     token.cancelled().await;
///     Ok(())
/// });
/// svc.start(&CancellationToken::new())?;
/// svc.await_running(&CancellationToken::new()).await?;
/// svc.stop();
/// ```
#[derive(Clone)]
pub struct BasicService {
    inner: Arc<Inner>,
}

impl BasicService {
    /// Creates a service from a full [`Lifecycle`].
    pub fn new(lifecycle: impl Lifecycle) -> Self {
        let (state, _) = watch::channel(ServiceState::New);
        Self {
            inner: Arc::new(Inner {
                lifecycle: Box::new(lifecycle),
                state,
                failure: Mutex::new(None),
                token: Mutex::new(None),
            }),
        }
    }

    /// Creates a service whose running hook is `running`.
    pub fn from_fn<F, Fut>(running: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FailureCause>> + Send + 'static,
    {
        Self::new(RunFn(running))
    }

    /// Creates a service that does nothing until it is stopped.
    pub fn idle() -> Self {
        Self::new(Idle)
    }
}

impl Service for BasicService {
    fn start(&self, parent: &CancellationToken) -> ServiceResult<()> {
        let mut slot = self.inner.token.lock();
        let actual = self.inner.current();
        if actual != ServiceState::New {
            return Err(ServiceError::InvalidState {
                expected: ServiceState::New,
                actual,
            });
        }

        let token = parent.child_token();
        *slot = Some(token.clone());
        self.inner.transition(ServiceState::Starting);
        drop(slot);

        tokio::spawn(Arc::clone(&self.inner).drive(token));
        Ok(())
    }

    fn stop(&self) {
        let slot = self.inner.token.lock();
        match self.inner.current() {
            ServiceState::New => self.inner.transition(ServiceState::Terminated),
            ServiceState::Starting | ServiceState::Running => {
                if let Some(token) = slot.as_ref() {
                    token.cancel();
                }
            }
            _ => {}
        }
    }

    fn watch_state(&self) -> watch::Receiver<ServiceState> {
        self.inner.state.subscribe()
    }

    fn failure_cause(&self) -> Option<FailureCause> {
        self.inner.failure.lock().clone()
    }

    fn state(&self) -> ServiceState {
        self.inner.current()
    }
}

impl fmt::Debug for BasicService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicService")
            .field("state", &self.inner.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counting {
        stopping_calls: Arc<AtomicUsize>,
        fail_start: bool,
    }

    #[async_trait]
    impl Lifecycle for Counting {
        async fn starting(&self, _token: CancellationToken) -> Result<(), FailureCause> {
            if self.fail_start {
                return Err(FailureCause::fault("cannot start"));
            }
            Ok(())
        }

        async fn running(&self, token: CancellationToken) -> Result<(), FailureCause> {
            token.cancelled().await;
            Ok(())
        }

        async fn stopping(&self, _failure: Option<&FailureCause>) -> Result<(), FailureCause> {
            self.stopping_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_idle_service_runs_until_stopped() {
        let token = CancellationToken::new();
        let svc = BasicService::idle();
        assert_eq!(svc.state(), ServiceState::New);

        svc.start(&token).unwrap();
        svc.await_running(&token).await.unwrap();
        assert_eq!(svc.state(), ServiceState::Running);

        svc.stop();
        svc.await_terminated(&token).await.unwrap();
        assert_eq!(svc.state(), ServiceState::Terminated);
        assert!(svc.failure_cause().is_none());
    }

    #[tokio::test]
    async fn test_stop_before_start_terminates() {
        let svc = BasicService::idle();
        svc.stop();
        assert_eq!(svc.state(), ServiceState::Terminated);

        let err = svc.start(&CancellationToken::new()).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidState {
                expected: ServiceState::New,
                actual: ServiceState::Terminated
            }
        ));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let token = CancellationToken::new();
        let svc = BasicService::idle();
        svc.start(&token).unwrap();
        assert!(svc.start(&token).is_err());
        svc.stop();
    }

    #[tokio::test]
    async fn test_running_error_fails_with_cause() {
        let token = CancellationToken::new();
        let svc = BasicService::from_fn(|_| async { Err(FailureCause::fault("boom")) });
        svc.start(&token).unwrap();

        let err = svc.await_terminated(&token).await.unwrap_err();
        let cause = err.failure_cause().unwrap();
        assert!(cause.is_fault());
        assert_eq!(cause.to_string(), "boom");
        assert_eq!(svc.state(), ServiceState::Failed);
    }

    #[tokio::test]
    async fn test_stop_process_sentinel_is_kept() {
        let token = CancellationToken::new();
        let svc = BasicService::from_fn(|_| async { Err(FailureCause::stop_process()) });
        svc.start(&token).unwrap();

        assert_eq!(svc.await_terminal(&token).await.unwrap(), ServiceState::Failed);
        assert!(svc.failure_cause().unwrap().is_operator_stop());
    }

    #[tokio::test]
    async fn test_starting_error_skips_stopping() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = BasicService::new(Counting {
            stopping_calls: Arc::clone(&calls),
            fail_start: true,
        });
        svc.start(&token).unwrap();

        let err = svc.await_running(&token).await.unwrap_err();
        assert!(matches!(err, ServiceError::Failed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stopping_runs_after_running() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let svc = BasicService::new(Counting {
            stopping_calls: Arc::clone(&calls),
            fail_start: false,
        });
        svc.start(&token).unwrap();
        svc.await_running(&token).await.unwrap();
        svc.stop();
        svc.await_terminated(&token).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct SlowStart;

    #[async_trait]
    impl Lifecycle for SlowStart {
        async fn starting(&self, token: CancellationToken) -> Result<(), FailureCause> {
            token.cancelled().await;
            Err(FailureCause::fault("interrupted"))
        }

        async fn running(&self, _token: CancellationToken) -> Result<(), FailureCause> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_while_starting_is_not_a_failure() {
        let token = CancellationToken::new();
        let svc = BasicService::new(SlowStart);
        svc.start(&token).unwrap();
        assert_eq!(svc.state(), ServiceState::Starting);

        svc.stop();
        svc.await_terminated(&token).await.unwrap();
        assert!(svc.failure_cause().is_none());
    }

    #[tokio::test]
    async fn test_await_running_is_cancellable() {
        let svc = BasicService::new(SlowStart);
        svc.start(&CancellationToken::new()).unwrap();

        let wait = CancellationToken::new();
        wait.cancel();
        let err = svc.await_running(&wait).await.unwrap_err();
        assert!(matches!(err, ServiceError::Cancelled));
        svc.stop();
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_fault() {
        let token = CancellationToken::new();
        let svc = BasicService::from_fn(|_| async { panic!("kaboom") });
        svc.start(&token).unwrap();

        assert_eq!(svc.await_terminal(&token).await.unwrap(), ServiceState::Failed);
        let cause = svc.failure_cause().unwrap();
        assert!(cause.is_fault());
        assert!(cause.to_string().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_service() {
        let parent = CancellationToken::new();
        let svc = BasicService::idle();
        svc.start(&parent).unwrap();
        svc.await_running(&parent).await.unwrap();

        parent.cancel();
        let wait = CancellationToken::new();
        tokio::time::timeout(Duration::from_secs(1), svc.await_terminated(&wait))
            .await
            .expect("service should stop with its parent")
            .unwrap();
    }
}
