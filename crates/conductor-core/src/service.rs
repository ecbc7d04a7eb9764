//! The uniform service contract consumed by the orchestration layer.
//!
//! A service moves through a small state machine:
//!
//! ```text
//! New ──start()──► Starting ──► Running ──► Stopping ──► Terminated
//!  │                  │                         │
//!  └──stop()──► Terminated                      └──────► Failed (carries a FailureCause)
//!                     └──────────────────────────────────► Failed
//! ```
//!
//! Transitions are published through a `tokio::sync::watch` channel, so any
//! number of observers can wait for a state without polling the service.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{FailureCause, ServiceError, ServiceResult};

/// Lifecycle state of a [`Service`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceState {
    /// Constructed, not started yet.
    New,
    /// `start` was called; the service is preparing itself.
    Starting,
    /// Fully operational.
    Running,
    /// Shutting down.
    Stopping,
    /// Stopped without error.
    Terminated,
    /// Stopped with a [`FailureCause`].
    Failed,
}

impl ServiceState {
    /// Returns `true` for `Terminated` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    /// Returns the lowercase name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to a type-erased service.
pub type BoxedService = Arc<dyn Service>;

/// A unit of work with a start/stop lifecycle and an observable failure cause.
///
/// Implementors provide the four required methods; the waiting helpers are
/// derived from [`watch_state`](Service::watch_state).
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Starts the service asynchronously.
    ///
    /// The service derives its own cancellation token from `parent`, so
    /// cancelling `parent` also asks the service to stop. Fails with
    /// [`ServiceError::InvalidState`] unless the service is `New`.
    fn start(&self, parent: &CancellationToken) -> ServiceResult<()>;

    /// Requests an asynchronous stop. A `New` service terminates immediately.
    fn stop(&self);

    /// Subscribes to state transitions.
    fn watch_state(&self) -> watch::Receiver<ServiceState>;

    /// Returns the failure cause once the service is `Failed`.
    fn failure_cause(&self) -> Option<FailureCause>;

    /// Returns the current state.
    fn state(&self) -> ServiceState {
        *self.watch_state().borrow()
    }

    /// Waits until the service is `Running`.
    ///
    /// Fails if the service moves past `Running` instead, or if `token` fires.
    async fn await_running(&self, token: &CancellationToken) -> ServiceResult<()> {
        let mut rx = self.watch_state();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ServiceState::Running => return Ok(()),
                ServiceState::New | ServiceState::Starting => {}
                ServiceState::Failed => return Err(failed(self.failure_cause())),
                other => return Err(ServiceError::NotRunning { state: other }),
            }
            wait_changed(&mut rx, token, state).await?;
        }
    }

    /// Waits until the service is `Terminated`; a `Failed` service yields its cause.
    async fn await_terminated(&self, token: &CancellationToken) -> ServiceResult<()> {
        match self.await_terminal(token).await? {
            ServiceState::Failed => Err(failed(self.failure_cause())),
            _ => Ok(()),
        }
    }

    /// Waits until the service reaches a terminal state and returns it.
    async fn await_terminal(&self, token: &CancellationToken) -> ServiceResult<ServiceState> {
        let mut rx = self.watch_state();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_terminal() {
                return Ok(state);
            }
            wait_changed(&mut rx, token, state).await?;
        }
    }
}

fn failed(cause: Option<FailureCause>) -> ServiceError {
    ServiceError::Failed(
        cause.unwrap_or_else(|| FailureCause::fault("service failed without a recorded cause")),
    )
}

async fn wait_changed(
    rx: &mut watch::Receiver<ServiceState>,
    token: &CancellationToken,
    last: ServiceState,
) -> ServiceResult<()> {
    tokio::select! {
        changed = rx.changed() => changed.map_err(|_| ServiceError::NotRunning { state: last }),
        _ = token.cancelled() => Err(ServiceError::Cancelled),
    }
}
