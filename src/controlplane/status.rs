//! Operator status transitions
//!
//! The Manila controller reports exactly one of two mutually exclusive
//! states on the operator record: Available (Manila found and storage
//! classes in place) or Disabled (no Manila in this cloud). Each transition
//! sets one condition and removes the other in a single store update.

use crate::crd::{ConditionStatus, ManagementState, OperatorCondition};
use crate::domain::conditions::ConditionUpdate;
use crate::domain::ports::OperatorStatusStoreRef;
use crate::error::{Error, Result};
use tracing::{debug, info};

/// Prefix shared by all conditions this controller owns
pub const CONDITION_PREFIX: &str = "ManilaController";

pub const AVAILABLE_CONDITION: &str = "ManilaControllerAvailable";
pub const DISABLED_CONDITION: &str = "ManilaControllerDisabled";
pub const DEGRADED_CONDITION: &str = "ManilaControllerDegraded";

/// Reason recorded on the Disabled condition
pub const REASON_NO_MANILA: &str = "NoManila";
/// Reason recorded on the Degraded condition after a failed sync
pub const REASON_SYNC_ERROR: &str = "SyncError";
pub const REASON_AS_EXPECTED: &str = "AsExpected";

/// Update marking Manila as available
pub fn enabled_update() -> ConditionUpdate {
    ConditionUpdate::new()
        .set(OperatorCondition::new(AVAILABLE_CONDITION, ConditionStatus::True))
        .remove(DISABLED_CONDITION)
}

/// Update marking Manila as absent from this cloud
pub fn disabled_update(message: &str) -> ConditionUpdate {
    ConditionUpdate::new()
        .set(
            OperatorCondition::new(DISABLED_CONDITION, ConditionStatus::True)
                .with_reason(REASON_NO_MANILA)
                .with_message(message),
        )
        .remove(AVAILABLE_CONDITION)
}

/// Update reporting a failed sync
pub fn degraded_update(err: &Error) -> ConditionUpdate {
    ConditionUpdate::new().set(
        OperatorCondition::new(DEGRADED_CONDITION, ConditionStatus::True)
            .with_reason(REASON_SYNC_ERROR)
            .with_message(err.to_string()),
    )
}

/// Update clearing a previous sync failure
pub fn not_degraded_update() -> ConditionUpdate {
    ConditionUpdate::new().set(
        OperatorCondition::new(DEGRADED_CONDITION, ConditionStatus::False)
            .with_reason(REASON_AS_EXPECTED),
    )
}

/// Status transitions against the operator status store
#[derive(Clone)]
pub struct OperatorStatus {
    store: OperatorStatusStoreRef,
}

impl OperatorStatus {
    pub fn new(store: OperatorStatusStoreRef) -> Self {
        Self { store }
    }

    pub async fn management_state(&self) -> Result<ManagementState> {
        self.store.management_state().await
    }

    /// Available=True, Disabled removed
    pub async fn set_enabled(&self) -> Result<()> {
        debug!("Setting {}", AVAILABLE_CONDITION);
        self.store.update_conditions(enabled_update()).await
    }

    /// Disabled=True with the given message, Available removed
    pub async fn set_disabled(&self, message: &str) -> Result<()> {
        info!("Manila is not usable: {}", message);
        self.store.update_conditions(disabled_update(message)).await
    }

    pub async fn set_degraded(&self, err: &Error) -> Result<()> {
        self.store.update_conditions(degraded_update(err)).await
    }

    pub async fn clear_degraded(&self) -> Result<()> {
        self.store.update_conditions(not_degraded_update()).await
    }
}
