//! Manila CSI Operator
//!
//! A Kubernetes operator that detects whether the underlying OpenStack
//! cloud offers Manila shares and, if it does, publishes one StorageClass
//! per Manila share type and starts the Manila CSI driver controllers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Manila Controller                           │
//! │   resync ticker + watch triggers ──► sync ──► Degraded reporting     │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌────────────────┐  ┌────────────────────┐  ┌───────────────────┐   │
//! │  │    Operator    │  │    StorageClass    │  │    Controller     │   │
//! │  │     Status     │  │     Reconciler     │  │     Launcher      │   │
//! │  └───────┬────────┘  └─────────┬──────────┘  └─────────┬─────────┘   │
//! ├──────────┼─────────────────────┼───────────────────────┼─────────────┤
//! │          │          Domain Ports (traits)              │             │
//! ├──────────┼─────────────────────┼───────────────────────┼─────────────┤
//! │  ┌───────┴────────┐  ┌─────────┴──────────┐  ┌─────────┴─────────┐   │
//! │  │  ManilaDriver  │  │  StorageClass API  │  │  CSIDriver apply  │   │
//! │  │     status     │  │  + reflector cache │  │                   │   │
//! │  └────────────────┘  └────────────────────┘  └───────────────────┘   │
//! │                 OpenStack: Keystone + Manila share types             │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: Manila controller, reconcilers and platform adapters
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod controlplane;
pub mod crd;
pub mod domain;
pub mod error;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use controlplane::{
    ControllerLauncher, ControllerMetrics, CsiDriverController, ManilaController,
    ManilaControllerConfig, OperatorStatus, ReconcileAction, StorageClassConfig,
    StorageClassReconciler, SyncOutcome,
};

pub use crd::{
    ConditionStatus, ManagementState, ManilaDriver, ManilaDriverSpec, ManilaDriverStatus,
    OperatorCondition,
};

pub use domain::ports::{
    OperatorStatusStore, Runnable, ShareType, ShareTypeListing, ShareTypeSource,
    StorageClassStore,
};

pub use error::{Error, ErrorAction, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
