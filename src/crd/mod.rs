//! Custom Resource Definitions for the Manila CSI Operator
//!
//! - ManilaDriver: operator management state and status conditions

pub mod manila_driver;

pub use manila_driver::*;
