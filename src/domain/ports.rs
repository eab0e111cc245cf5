//! Domain Ports - Core trait definitions for the Manila operator
//!
//! These traits define the boundaries between the sync loop and the external
//! systems it talks to: OpenStack, the Kubernetes StorageClass API and the
//! operator's own status record. Adapters implement these traits to provide
//! concrete functionality.

use crate::crd::ManagementState;
use crate::domain::conditions::ConditionUpdate;
use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::storage::v1::StorageClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Share Types
// =============================================================================

/// A Manila share type as reported by the share service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareType {
    /// Share type ID
    #[serde(default)]
    pub id: String,
    /// Share type name, used to derive the StorageClass name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the type is visible to all projects
    #[serde(default = "default_true", rename = "share_type_access:is_public")]
    pub is_public: bool,
    /// Extra specs
    #[serde(default)]
    pub extra_specs: BTreeMap<String, String>,
    /// Required extra specs
    #[serde(default)]
    pub required_extra_specs: BTreeMap<String, String>,
}

impl ShareType {
    /// Create a share type with just a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_public: true,
            ..Default::default()
        }
    }
}

fn default_true() -> bool {
    true
}

/// Outcome of probing the cloud for share types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareTypeListing {
    /// The share service answered with its current share types
    Available(Vec<ShareType>),
    /// The cloud does not provide the share service at all
    NotSupported,
}

// =============================================================================
// Share Type Source Port
// =============================================================================

/// Port for the backend capability probe.
///
/// `Err` is reserved for transient and infrastructure failures; a cloud
/// without the share service answers `Ok(ShareTypeListing::NotSupported)`.
#[async_trait]
pub trait ShareTypeSource: Send + Sync {
    /// List the share types currently offered
    async fn list_share_types(&self) -> Result<ShareTypeListing>;
}

// =============================================================================
// StorageClass Store Port
// =============================================================================

/// Port for StorageClass lookups and mutations
#[async_trait]
pub trait StorageClassStore: Send + Sync {
    /// Look up a StorageClass in the (eventually consistent) cache
    fn get(&self, name: &str) -> Option<Arc<StorageClass>>;

    /// Create a StorageClass. Fails with `ResourceExists` if it is already there.
    async fn create(&self, class: &StorageClass) -> Result<()>;

    /// Ensure the live object carries the required metadata. Safe to call
    /// with an object that already matches.
    async fn apply(&self, class: &StorageClass) -> Result<()>;

    /// Delete a StorageClass by name. Fails with `ResourceNotFound` if absent.
    async fn delete(&self, name: &str) -> Result<()>;
}

// =============================================================================
// Operator Status Store Port
// =============================================================================

/// Port for the operator's own status record
#[async_trait]
pub trait OperatorStatusStore: Send + Sync {
    /// Current management state requested by the administrator
    async fn management_state(&self) -> Result<ManagementState>;

    /// Atomically apply a condition update. Write conflicts are retried
    /// inside the store; an update that changes nothing is not written.
    async fn update_conditions(&self, update: ConditionUpdate) -> Result<()>;
}

// =============================================================================
// Runnable Port
// =============================================================================

/// A long-running dependent controller
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Run until the token is cancelled
    async fn run(&self, cancel: CancellationToken, workers: usize);
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ShareTypeSourceRef = Arc<dyn ShareTypeSource>;
pub type StorageClassStoreRef = Arc<dyn StorageClassStore>;
pub type OperatorStatusStoreRef = Arc<dyn OperatorStatusStore>;
pub type RunnableRef = Arc<dyn Runnable>;
