//! Domain layer - Core types and port definitions
//!
//! This module defines the core traits (ports) that adapters implement,
//! following hexagonal architecture principles, plus the condition and
//! metadata helpers shared by the controller and the adapters.

pub mod conditions;
pub mod object_meta;
pub mod ports;

pub use conditions::*;
pub use object_meta::*;
pub use ports::*;
