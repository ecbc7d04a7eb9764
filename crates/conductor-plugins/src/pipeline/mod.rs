//! The five pipeline stages and their default implementations.
//!
//! | Stage          | Trait            | Default                 |
//! |----------------|------------------|-------------------------|
//! | discovery      | [`Discoverer`]   | [`FsDiscoverer`]        |
//! | bootstrap      | [`Bootstrapper`] | [`ManifestBootstrapper`]|
//! | validation     | [`Validator`]    | [`StepValidator`]       |
//! | initialization | [`Initializer`]  | [`RuntimeInitializer`]  |
//! | termination    | [`Terminator`]   | [`RuntimeTerminator`]   |
//!
//! Every stage receives the load's cancellation token and may stop early
//! when it fires.

pub mod bootstrap;
pub mod discovery;
pub mod initialization;
pub mod termination;
pub mod validation;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

pub use bootstrap::{Bootstrapper, ManifestBootstrapper};
pub use discovery::{Discoverer, FsDiscoverer};
pub use initialization::{Initializer, RuntimeInitializer};
pub use termination::{RuntimeTerminator, Terminator};
pub use validation::{
    ApiVersionStep, BackendStep, HOST_API_VERSION, SignatureStep, StepValidator, ValidationStep,
    Validator, parse_api_version,
};

/// Polls `fut`, turning a panic into `Err(message)`.
pub(crate) async fn catch_panic<F: Future>(fut: F) -> Result<F::Output, String> {
    AssertUnwindSafe(fut).catch_unwind().await.map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
