//! The wrapper that makes a module's service respect its dependencies.
//!
//! Every service built by [`ModuleManager`](crate::ModuleManager) is wrapped
//! in a [`BasicService`] driven by [`ModuleLifecycle`]:
//!
//! - **starting**: wait for every dependency to be `Running`, then start the
//!   wrapped service and wait for it to be `Running` too;
//! - **running**: wait for the wrapped service to terminate, or for a stop;
//! - **stopping**: wait for every dependent module to terminate, then stop the
//!   wrapped service and wait for it.
//!
//! Start order therefore follows the dependency graph, and stop order is its
//! reverse, without the service manager knowing about dependencies at all.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use conductor_core::{
    BasicService, BoxedService, CancellationToken, FailureCause, Lifecycle, ServiceError,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

/// Mapping from module name to its (wrapped) service.
pub type ServiceMap = BTreeMap<String, BoxedService>;

/// The complete map of wrapped services, filled in once all modules exist so
/// a module can find its dependents when stopping.
pub(crate) type SharedServiceMap = Arc<RwLock<ServiceMap>>;

pub(crate) struct ModuleLifecycle {
    name: String,
    service: BoxedService,
    dependencies: Vec<(String, BoxedService)>,
    dependents: Vec<String>,
    registry: SharedServiceMap,
}

impl ModuleLifecycle {
    pub(crate) fn wrap(
        name: String,
        service: BoxedService,
        dependencies: Vec<(String, BoxedService)>,
        dependents: Vec<String>,
        registry: SharedServiceMap,
    ) -> BoxedService {
        Arc::new(BasicService::new(Self {
            name,
            service,
            dependencies,
            dependents,
            registry,
        }))
    }

    async fn stop_inner(&self) -> Result<(), FailureCause> {
        self.service.stop();
        self.service
            .await_terminated(&CancellationToken::new())
            .await
            .map_err(into_cause)
    }
}

#[async_trait]
impl Lifecycle for ModuleLifecycle {
    async fn starting(&self, token: CancellationToken) -> Result<(), FailureCause> {
        for (dependency, service) in &self.dependencies {
            if let Err(err) = service.await_running(&token).await {
                return Err(into_cause(err)
                    .with_context(format!("dependency '{dependency}' is not running")));
            }
        }

        debug!(module = %self.name, "Starting module");
        self.service
            .start(&CancellationToken::new())
            .map_err(|err| FailureCause::fault(err).with_context("service refused to start"))?;

        if let Err(err) = self.service.await_running(&token).await {
            // Stopped while starting, or the service ended before it was seen
            // running. Its own cause is reported as is.
            let stopped = self.stop_inner().await;
            return Err(match (err, stopped) {
                (ServiceError::Cancelled, Ok(())) => FailureCause::fault(ServiceError::Cancelled),
                (_, Err(cause)) => cause,
                (err, Ok(())) => into_cause(err),
            });
        }

        info!(module = %self.name, "Module running");
        Ok(())
    }

    async fn running(&self, token: CancellationToken) -> Result<(), FailureCause> {
        // Returns early with `Cancelled` when the module is asked to stop.
        let _ = self.service.await_terminal(&token).await;
        match self.service.failure_cause() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    async fn stopping(&self, failure: Option<&FailureCause>) -> Result<(), FailureCause> {
        if self.service.state().is_terminal() {
            if failure.is_none() {
                debug!(module = %self.name, "Module stopped on its own");
            }
            return Ok(());
        }

        let dependents: Vec<(String, BoxedService)> = {
            let registry = self.registry.read();
            self.dependents
                .iter()
                .filter_map(|name| registry.get(name).map(|svc| (name.clone(), Arc::clone(svc))))
                .collect()
        };
        for (name, service) in dependents {
            debug!(module = %self.name, dependent = %name, "Waiting for dependent module to stop");
            let _ = service.await_terminal(&CancellationToken::new()).await;
        }

        debug!(module = %self.name, "Stopping module");
        match self.stop_inner().await {
            Ok(()) => {
                info!(module = %self.name, "Module stopped");
                Ok(())
            }
            Err(cause) => {
                warn!(module = %self.name, error = %cause, "Module failed while stopping");
                Err(cause.with_context("error while stopping"))
            }
        }
    }
}

/// Unwraps a failure out of a [`ServiceError`], wrapping anything else as a fault.
fn into_cause(err: ServiceError) -> FailureCause {
    match err {
        ServiceError::Failed(cause) => cause,
        other => FailureCause::fault(other),
    }
}
