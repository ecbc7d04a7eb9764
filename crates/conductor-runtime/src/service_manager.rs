//! Group supervision of module services.
//!
//! [`ServiceManager`] starts a fixed set of services together, watches each
//! one from its own monitor task and reports group-level events to
//! [`ManagerListener`]s:
//!
//! - `healthy` once every service reached `Running`;
//! - `failure(name, cause)` whenever a service ends `Failed`;
//! - `stopped` once every service is terminal.
//!
//! A monitor delivers the failure callback *before* counting its service as
//! stopped, so by the time [`await_stopped`](ServiceManager::await_stopped)
//! returns every failure has been seen by every listener.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use conductor_core::{
    BoxedService, CancellationToken, FailureCause, ServiceError, ServiceResult, ServiceState,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, trace};

/// Receives group-level events from a [`ServiceManager`].
///
/// Callbacks run on monitor tasks and must not block.
pub trait ManagerListener: Send + Sync {
    /// Every service reached `Running`.
    fn healthy(&self) {}

    /// Every service reached a terminal state.
    fn stopped(&self) {}

    /// The service `name` failed with `cause`.
    fn failure(&self, _name: &str, _cause: &FailureCause) {}
}

type Entries = Arc<[(String, BoxedService)]>;

/// Stops every service of a group without holding the manager itself.
#[derive(Clone)]
pub struct StopHandle {
    services: Entries,
}

impl StopHandle {
    /// Requests every service to stop.
    pub fn stop_all(&self) {
        for (_, service) in self.services.iter() {
            service.stop();
        }
    }
}

struct Shared {
    services: Entries,
    listeners: Mutex<Vec<Arc<dyn ManagerListener>>>,
    monitoring: AtomicBool,
    running: AtomicUsize,
    remaining: AtomicUsize,
    healthy: watch::Sender<bool>,
    stopped: watch::Sender<bool>,
}

impl Shared {
    fn listeners(&self) -> Vec<Arc<dyn ManagerListener>> {
        self.listeners.lock().clone()
    }

    async fn monitor(self: Arc<Self>, index: usize) {
        let (name, service) = &self.services[index];
        let mut rx = service.watch_state();
        let mut seen_running = false;

        let last = loop {
            let state = *rx.borrow_and_update();
            if state == ServiceState::Running && !seen_running {
                seen_running = true;
                if self.running.fetch_add(1, Ordering::AcqRel) + 1 == self.services.len() {
                    debug!("All services running");
                    self.healthy.send_replace(true);
                    for listener in self.listeners() {
                        listener.healthy();
                    }
                }
            }
            if state.is_terminal() {
                break state;
            }
            if rx.changed().await.is_err() {
                // The service dropped its state channel; nothing more will happen.
                break state;
            }
        };
        trace!(service = %name, state = %last, "Service reached final state");

        if last == ServiceState::Failed {
            let cause = service.failure_cause().unwrap_or_else(|| {
                FailureCause::fault("service failed without a recorded cause")
            });
            for listener in self.listeners() {
                listener.failure(name, &cause);
            }
        }

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            debug!("All services stopped");
            for listener in self.listeners() {
                listener.stopped();
            }
            self.stopped.send_replace(true);
        }
    }
}

/// Supervises a group of services as one unit.
#[derive(Clone)]
pub struct ServiceManager {
    shared: Arc<Shared>,
}

impl ServiceManager {
    /// Creates a manager over `services`.
    ///
    /// # Errors
    ///
    /// [`ServiceError::NoServices`] for an empty set and
    /// [`ServiceError::InvalidState`] if a service is not `New`.
    pub fn new(
        services: impl IntoIterator<Item = (String, BoxedService)>,
    ) -> ServiceResult<Self> {
        let services: Vec<(String, BoxedService)> = services.into_iter().collect();
        if services.is_empty() {
            return Err(ServiceError::NoServices);
        }
        if let Some((_, service)) = services.iter().find(|(_, s)| s.state() != ServiceState::New) {
            return Err(ServiceError::InvalidState {
                expected: ServiceState::New,
                actual: service.state(),
            });
        }

        let count = services.len();
        let (healthy, _) = watch::channel(false);
        let (stopped, _) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(Shared {
                services: services.into(),
                listeners: Mutex::new(Vec::new()),
                monitoring: AtomicBool::new(false),
                running: AtomicUsize::new(0),
                remaining: AtomicUsize::new(count),
                healthy,
                stopped,
            }),
        })
    }

    /// Registers a listener. Listeners added after an event missed it.
    pub fn add_listener(&self, listener: Arc<dyn ManagerListener>) {
        self.shared.listeners.lock().push(listener);
    }

    /// Returns a handle that can stop the group.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            services: Arc::clone(&self.shared.services),
        }
    }

    /// Starts every service; each derives its token from `token`.
    ///
    /// Returns the first start error; services started before it keep running.
    pub fn start_async(&self, token: &CancellationToken) -> ServiceResult<()> {
        self.ensure_monitors();
        for (name, service) in self.shared.services.iter() {
            if let Err(err) = service.start(token) {
                error!(service = %name, error = %err, "Failed to start service");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Requests every service to stop.
    pub fn stop_async(&self) {
        info!(services = self.shared.services.len(), "Stopping all services");
        self.stop_handle().stop_all();
    }

    /// Waits until every service is `Running`.
    ///
    /// Fails with [`ServiceError::NotRunning`] if the group stopped first.
    pub async fn await_healthy(&self, token: &CancellationToken) -> ServiceResult<()> {
        self.ensure_monitors();
        let mut healthy = self.shared.healthy.subscribe();
        let mut stopped = self.shared.stopped.subscribe();
        tokio::select! {
            res = healthy.wait_for(|h| *h) => res.map(|_| ()).map_err(|_| ServiceError::Cancelled),
            _ = stopped.wait_for(|s| *s) => Err(ServiceError::NotRunning { state: ServiceState::Terminated }),
            _ = token.cancelled() => Err(ServiceError::Cancelled),
        }
    }

    /// Waits until every service reached a terminal state.
    pub async fn await_stopped(&self, token: &CancellationToken) -> ServiceResult<()> {
        self.ensure_monitors();
        let mut stopped = self.shared.stopped.subscribe();
        tokio::select! {
            res = stopped.wait_for(|s| *s) => res.map(|_| ()).map_err(|_| ServiceError::Cancelled),
            _ = token.cancelled() => Err(ServiceError::Cancelled),
        }
    }

    /// Returns `true` once every service is `Running`.
    pub fn is_healthy(&self) -> bool {
        self.shared
            .services
            .iter()
            .all(|(_, s)| s.state() == ServiceState::Running)
    }

    /// Returns `true` once every service is terminal.
    pub fn is_stopped(&self) -> bool {
        self.shared
            .services
            .iter()
            .all(|(_, s)| s.state().is_terminal())
    }

    /// Names of the services grouped by their current state.
    pub fn services_by_state(&self) -> BTreeMap<ServiceState, Vec<String>> {
        let mut by_state: BTreeMap<ServiceState, Vec<String>> = BTreeMap::new();
        for (name, service) in self.shared.services.iter() {
            by_state.entry(service.state()).or_default().push(name.clone());
        }
        by_state
    }

    /// Current state of every service.
    pub fn states(&self) -> BTreeMap<String, ServiceState> {
        self.shared
            .services
            .iter()
            .map(|(name, service)| (name.clone(), service.state()))
            .collect()
    }

    /// Returns the service registered as `name`.
    pub fn service(&self, name: &str) -> Option<&BoxedService> {
        self.shared
            .services
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    fn ensure_monitors(&self) {
        if self.shared.monitoring.swap(true, Ordering::AcqRel) {
            return;
        }
        for index in 0..self.shared.services.len() {
            tokio::spawn(Arc::clone(&self.shared).monitor(index));
        }
    }
}
