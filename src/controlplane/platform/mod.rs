//! Platform Adapters
//!
//! Implementations of the domain ports:
//! - OpenStack (Keystone + Manila share types)
//! - Kubernetes (StorageClasses, ManilaDriver status, watch triggers)

pub mod kubernetes;
pub mod openstack;

pub use kubernetes::*;
pub use openstack::*;
