//! Dependent controller launcher
//!
//! The CSI driver controllers only make sense once Manila was found. They
//! are started the first time a sync sees share types and then run for the
//! rest of the process; they are never stopped when Manila goes away.

use crate::domain::ports::RunnableRef;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Worker count handed to each dependent controller
pub const DEPENDENT_WORKERS: usize = 1;

/// Starts a fixed set of controllers at most once
pub struct ControllerLauncher {
    controllers: Vec<RunnableRef>,
    started: AtomicBool,
}

impl ControllerLauncher {
    pub fn new(controllers: Vec<RunnableRef>) -> Self {
        Self {
            controllers,
            started: AtomicBool::new(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Spawn every controller on its own task the first time this is
    /// called. Returns whether this call started them.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_once(&self, cancel: &CancellationToken) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        info!("Starting {} CSI driver controllers", self.controllers.len());
        for controller in &self.controllers {
            let controller = controller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                debug!("Controller {} started", controller.name());
                controller.run(cancel, DEPENDENT_WORKERS).await;
                debug!("Controller {} stopped", controller.name());
            });
        }
        true
    }
}
