//! # Conductor Core
//!
//! The service contract shared by every layer of the Conductor runtime.
//!
//! The orchestration layer never knows what a service computes; it only
//! drives a uniform lifecycle:
//!
//! - [`Service`]: start / stop / await-running / await-terminated plus a
//!   [`FailureCause`] once the service failed.
//! - [`ServiceState`]: `New → Starting → Running → Stopping → {Terminated | Failed}`.
//! - [`FailureCause`]: a failure tagged with a [`FailureKind`]; the
//!   [`FailureKind::OperatorStop`] sentinel means "the process was asked to
//!   stop" and is not treated as an error by supervisors.
//! - [`BasicService`]: a ready-made implementation driven by a [`Lifecycle`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use conductor_core::{BasicService, FailureCause, Service};
//! use tokio_util::sync::CancellationToken;
//!
//! let worker = BasicService::from_fn(|token| async move {
//!     tokio::select! {
//!         _ = token.cancelled() => Ok(()),
//!         res = do_work() => res.map_err(FailureCause::fault),
//!     }
//! });
//!
//! let token = CancellationToken::new();
//! worker.start(&token)?;
//! worker.await_running(&token).await?;
//! ```

pub mod basic;
pub mod error;
pub mod service;

pub use basic::{BasicService, Lifecycle};
pub use error::{BoxError, FailureCause, FailureKind, ServiceError, ServiceResult, StopRequested};
pub use service::{BoxedService, Service, ServiceState};

// Re-exported so downstream crates name the same token type.
pub use tokio_util::sync::CancellationToken;

/// Prelude for implementing and driving services.
pub mod prelude {
    pub use super::{
        BasicService, BoxedService, CancellationToken, FailureCause, FailureKind, Lifecycle,
        Service, ServiceError, ServiceState,
    };
}
