//! Error and failure types shared by every service implementation.
//!
//! Two families live here:
//!
//! - [`FailureCause`]: *why* a service ended up in [`ServiceState::Failed`].
//!   Every cause carries an explicit [`FailureKind`], so an intentional
//!   "please stop the process" request is told apart from a genuine fault by
//!   kind, never by comparing error values.
//! - [`ServiceError`]: errors returned by the service contract itself
//!   (starting twice, waiting on a service that already stopped, a cancelled
//!   wait, ...).

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::service::ServiceState;

/// Boxed error accepted wherever a collaborator reports a failure.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// =============================================================================
// Failure causes
// =============================================================================

/// Classifies a [`FailureCause`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The service stopped because the process was asked to stop.
    OperatorStop,
    /// Something actually broke.
    Fault,
}

impl FailureKind {
    /// Returns a short stable label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OperatorStop => "operator_stop",
            Self::Fault => "fault",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error carried by [`FailureCause::stop_process`].
#[derive(Debug, Clone, Copy, Error)]
#[error("stop requested")]
pub struct StopRequested;

/// Adds a message in front of an existing error while keeping it as `source`.
#[derive(Debug)]
struct Contextual {
    message: String,
    source: Arc<dyn StdError + Send + Sync + 'static>,
}

impl fmt::Display for Contextual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.message, self.source)
    }
}

impl StdError for Contextual {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.source)
    }
}

/// The reason a service failed.
///
/// Cheap to clone: the underlying error is shared. `Display` and `source()`
/// are forwarded to the wrapped error, so the original cause is never lost.
///
/// ```rust,ignore
/// // A service that wants the whole process to shut down:
/// return Err(FailureCause::stop_process());
///
/// // A genuine failure:
/// return Err(FailureCause::fault(io_error));
/// ```
#[derive(Clone)]
pub struct FailureCause {
    kind: FailureKind,
    error: Arc<dyn StdError + Send + Sync + 'static>,
}

impl FailureCause {
    /// Creates a cause of the given kind.
    pub fn new(kind: FailureKind, error: impl Into<BoxError>) -> Self {
        Self {
            kind,
            error: Arc::from(error.into()),
        }
    }

    /// The sentinel cause: the service stopped because the process should stop.
    pub fn stop_process() -> Self {
        Self::new(FailureKind::OperatorStop, StopRequested)
    }

    /// A genuine fault.
    pub fn fault(error: impl Into<BoxError>) -> Self {
        Self::new(FailureKind::Fault, error)
    }

    /// Returns the kind of this cause.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns `true` for the intentional-stop sentinel.
    pub fn is_operator_stop(&self) -> bool {
        self.kind == FailureKind::OperatorStop
    }

    /// Returns `true` for a genuine fault.
    pub fn is_fault(&self) -> bool {
        self.kind == FailureKind::Fault
    }

    /// Returns the wrapped error.
    pub fn error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.error
    }

    /// Prefixes the cause with `message`, keeping its kind and source chain.
    pub fn with_context(self, message: impl Into<String>) -> Self {
        Self {
            kind: self.kind,
            error: Arc::new(Contextual {
                message: message.into(),
                source: self.error,
            }),
        }
    }
}

impl fmt::Debug for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureCause")
            .field("kind", &self.kind)
            .field("error", &self.error)
            .finish()
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl StdError for FailureCause {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.error.source()
    }
}

impl From<StopRequested> for FailureCause {
    fn from(_: StopRequested) -> Self {
        Self::stop_process()
    }
}

// =============================================================================
// Service errors
// =============================================================================

/// Errors returned by the [`Service`](crate::Service) contract.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The operation requires a different state.
    #[error("invalid service state: expected {expected}, got {actual}")]
    InvalidState {
        /// State the operation requires.
        expected: ServiceState,
        /// State the service is actually in.
        actual: ServiceState,
    },

    /// The service moved past `Running` without failing.
    #[error("service is not running (state: {state})")]
    NotRunning {
        /// State observed when the wait gave up.
        state: ServiceState,
    },

    /// The service failed.
    #[error("service failed: {0}")]
    Failed(#[source] FailureCause),

    /// The wait was cancelled through its token.
    #[error("wait cancelled")]
    Cancelled,

    /// A manager was created without any service.
    #[error("no services to manage")]
    NoServices,
}

impl ServiceError {
    /// Returns the failure cause for [`ServiceError::Failed`].
    pub fn failure_cause(&self) -> Option<&FailureCause> {
        match self {
            Self::Failed(cause) => Some(cause),
            _ => None,
        }
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_process_is_operator_stop() {
        let cause = FailureCause::stop_process();
        assert!(cause.is_operator_stop());
        assert!(!cause.is_fault());
        assert_eq!(cause.to_string(), "stop requested");
    }

    #[test]
    fn test_context_keeps_kind_and_source() {
        let io = std::io::Error::other("disk on fire");
        let cause = FailureCause::fault(io).with_context("module 'store'");

        assert!(cause.is_fault());
        assert_eq!(cause.to_string(), "module 'store': disk on fire");
        let source = cause.source().expect("context keeps the original error");
        assert_eq!(source.to_string(), "disk on fire");

        let stop = FailureCause::stop_process().with_context("dependency 'api' stopped");
        assert!(stop.is_operator_stop());
    }

    #[test]
    fn test_service_error_exposes_cause() {
        let err = ServiceError::Failed(FailureCause::fault("boom"));
        assert_eq!(err.failure_cause().map(|c| c.to_string()).as_deref(), Some("boom"));
        assert!(ServiceError::Cancelled.failure_cause().is_none());
    }
}
