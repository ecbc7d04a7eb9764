//! The listener that turns one module failure into a group shutdown.

use std::sync::Arc;

use conductor_core::FailureCause;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::service_manager::{ManagerListener, StopHandle};

/// Module failures in the order they were observed.
#[derive(Debug, Default)]
pub struct FailureTable {
    entries: Mutex<Vec<(String, FailureCause)>>,
}

impl FailureTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a failure.
    pub fn record(&self, module: &str, cause: &FailureCause) {
        self.entries.lock().push((module.to_string(), cause.clone()));
    }

    /// Every recorded failure, oldest first.
    pub fn snapshot(&self) -> Vec<(String, FailureCause)> {
        self.entries.lock().clone()
    }

    /// The oldest failure that is not an operator stop.
    pub fn first_fault(&self) -> Option<(String, FailureCause)> {
        self.entries
            .lock()
            .iter()
            .find(|(_, cause)| !cause.is_operator_stop())
            .cloned()
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing failed.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Forgets every failure.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Logs group transitions and stops every module once any module fails.
pub(crate) struct ModuleListener {
    failures: Arc<FailureTable>,
    stop: StopHandle,
}

impl ModuleListener {
    pub(crate) fn new(failures: Arc<FailureTable>, stop: StopHandle) -> Self {
        Self { failures, stop }
    }
}

impl ManagerListener for ModuleListener {
    fn healthy(&self) {
        info!("All modules healthy");
    }

    fn stopped(&self) {
        info!("All modules stopped");
    }

    fn failure(&self, module: &str, cause: &FailureCause) {
        self.failures.record(module, cause);
        self.stop.stop_all();

        if cause.is_operator_stop() {
            info!(module, "Received stop signal via return error");
        } else {
            error!(module, error = %cause, "Module failed");
        }
    }
}
