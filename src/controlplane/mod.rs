//! Control Plane Module
//!
//! The Manila controller and the pieces it drives: operator status
//! transitions, StorageClass reconciliation, the CSI driver controllers it
//! launches and the platform adapters behind the domain ports.

pub mod csi_driver;
pub mod launcher;
pub mod manila;
pub mod metrics;
pub mod platform;
pub mod status;
pub mod storage_class;

pub use csi_driver::*;
pub use launcher::*;
pub use manila::*;
pub use metrics::*;
pub use platform::*;
pub use status::*;
pub use storage_class::*;
