//! ManilaDriver CRD
//!
//! The operator's own configuration and status record. It carries the
//! management state requested by the cluster administrator and the
//! conditions reported by the Manila controller.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// ManilaDriver CRD
// =============================================================================

/// ManilaDriver configures the Manila CSI operator for the cluster.
/// A single cluster-scoped instance (conventionally named `cluster`) exists.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.openstack.org",
    version = "v1",
    kind = "ManilaDriver",
    plural = "maniladrivers",
    shortname = "md",
    status = "ManilaDriverStatus",
    printcolumn = r#"{"name": "State", "type": "string", "jsonPath": ".spec.managementState"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced = false
)]
#[serde(rename_all = "camelCase")]
pub struct ManilaDriverSpec {
    /// Whether the operator should manage the driver
    #[serde(default)]
    pub management_state: ManagementState,
}

// =============================================================================
// Sub-Types
// =============================================================================

/// Management state requested for the operator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ManagementState {
    /// The operator actively reconciles
    #[default]
    Managed,
    /// The operator leaves everything as it is
    Unmanaged,
    /// The operand should be removed
    Removed,
}

impl std::fmt::Display for ManagementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagementState::Managed => write!(f, "Managed"),
            ManagementState::Unmanaged => write!(f, "Unmanaged"),
            ManagementState::Removed => write!(f, "Removed"),
        }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of the ManilaDriver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManilaDriverStatus {
    /// Generation last acted upon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions
    #[serde(default)]
    pub conditions: Vec<OperatorCondition>,
}

/// Condition reported on the operator status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatorCondition {
    /// Type of condition
    pub r#type: String,
    /// Status: True, False, Unknown
    pub status: ConditionStatus,
    /// Last transition time
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_transition_time: Option<DateTime<Utc>>,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Condition status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

// =============================================================================
// Implementations
// =============================================================================

impl ManilaDriver {
    /// Get the name of this driver record
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Conditions currently recorded, empty when no status was written yet
    pub fn conditions(&self) -> &[OperatorCondition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_management_state_default() {
        let spec = ManilaDriverSpec::default();
        assert_eq!(spec.management_state, ManagementState::Managed);
    }

    #[test]
    fn test_management_state_serde() {
        let spec: ManilaDriverSpec =
            serde_json::from_str(r#"{"managementState": "Unmanaged"}"#).unwrap();
        assert_eq!(spec.management_state, ManagementState::Unmanaged);

        let spec: ManilaDriverSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(spec.management_state, ManagementState::Managed);
    }

    #[test]
    fn test_condition_roundtrip_field_names() {
        let cond = OperatorCondition {
            r#type: "ManilaControllerAvailable".into(),
            status: ConditionStatus::True,
            last_transition_time: None,
            reason: None,
            message: None,
        };
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["type"], "ManilaControllerAvailable");
        assert_eq!(json["status"], "True");
    }

    #[test]
    fn test_conditions_without_status() {
        let driver = ManilaDriver::new("cluster", ManilaDriverSpec::default());
        assert!(driver.conditions().is_empty());
        assert_eq!(driver.name(), "cluster");
    }
}
