//! Operator condition bookkeeping
//!
//! Conditions are kept as a map keyed by condition type. Updates are plain
//! data (`ConditionUpdate`) so a store can apply them inside its own
//! read-modify-write cycle and retry them on conflict.

use crate::crd::{ConditionStatus, OperatorCondition};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

impl OperatorCondition {
    /// Build a condition without reason or message
    pub fn new(condition_type: impl Into<String>, status: ConditionStatus) -> Self {
        Self {
            r#type: condition_type.into(),
            status,
            last_transition_time: None,
            reason: None,
            message: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// =============================================================================
// Condition Set
// =============================================================================

/// Conditions indexed by type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionSet {
    conditions: BTreeMap<String, OperatorCondition>,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a condition list. Later duplicates of a type win.
    pub fn from_conditions(conditions: &[OperatorCondition]) -> Self {
        Self {
            conditions: conditions
                .iter()
                .map(|c| (c.r#type.clone(), c.clone()))
                .collect(),
        }
    }

    /// Conditions ordered by type
    pub fn into_conditions(self) -> Vec<OperatorCondition> {
        self.conditions.into_values().collect()
    }

    pub fn get(&self, condition_type: &str) -> Option<&OperatorCondition> {
        self.conditions.get(condition_type)
    }

    pub fn is_true(&self, condition_type: &str) -> bool {
        self.get(condition_type)
            .map(|c| c.status == ConditionStatus::True)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Insert or replace a condition by type.
    ///
    /// The transition time only moves when the status changes. Returns
    /// whether anything observable changed.
    pub fn set(&mut self, condition: OperatorCondition, now: DateTime<Utc>) -> bool {
        match self.conditions.get_mut(&condition.r#type) {
            Some(existing) => {
                let mut changed = false;
                if existing.status != condition.status {
                    existing.status = condition.status;
                    existing.last_transition_time = Some(now);
                    changed = true;
                }
                if existing.reason != condition.reason {
                    existing.reason = condition.reason;
                    changed = true;
                }
                if existing.message != condition.message {
                    existing.message = condition.message;
                    changed = true;
                }
                changed
            }
            None => {
                let mut condition = condition;
                condition.last_transition_time = Some(now);
                self.conditions.insert(condition.r#type.clone(), condition);
                true
            }
        }
    }

    /// Remove a condition by type, returns whether it was present
    pub fn remove(&mut self, condition_type: &str) -> bool {
        self.conditions.remove(condition_type).is_some()
    }
}

// =============================================================================
// Condition Update
// =============================================================================

/// A set of condition changes committed together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionUpdate {
    set: Vec<OperatorCondition>,
    remove: Vec<String>,
}

impl ConditionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, condition: OperatorCondition) -> Self {
        self.set.push(condition);
        self
    }

    pub fn remove(mut self, condition_type: impl Into<String>) -> Self {
        self.remove.push(condition_type.into());
        self
    }

    /// Apply to a condition set, returns whether anything changed
    pub fn apply(&self, conditions: &mut ConditionSet, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        for condition in &self.set {
            changed |= conditions.set(condition.clone(), now);
        }
        for condition_type in &self.remove {
            changed |= conditions.remove(condition_type);
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_set_adds_new_with_transition_time() {
        let mut set = ConditionSet::new();
        let changed = set.set(OperatorCondition::new("Available", ConditionStatus::True), at(10));
        assert!(changed);
        assert_eq!(set.get("Available").unwrap().last_transition_time, Some(at(10)));
    }

    #[test]
    fn test_set_preserves_transition_time_on_same_status() {
        let mut set = ConditionSet::new();
        set.set(
            OperatorCondition::new("Disabled", ConditionStatus::True).with_message("first"),
            at(10),
        );
        let changed = set.set(
            OperatorCondition::new("Disabled", ConditionStatus::True).with_message("second"),
            at(20),
        );

        assert!(changed);
        let cond = set.get("Disabled").unwrap();
        assert_eq!(cond.last_transition_time, Some(at(10)));
        assert_eq!(cond.message.as_deref(), Some("second"));
    }

    #[test]
    fn test_set_identical_is_unchanged() {
        let mut set = ConditionSet::new();
        let cond = OperatorCondition::new("Available", ConditionStatus::True);
        set.set(cond.clone(), at(10));
        assert!(!set.set(cond, at(20)));
    }

    #[test]
    fn test_status_flip_moves_transition_time() {
        let mut set = ConditionSet::new();
        set.set(OperatorCondition::new("Degraded", ConditionStatus::True), at(10));
        set.set(OperatorCondition::new("Degraded", ConditionStatus::False), at(30));
        assert_eq!(set.get("Degraded").unwrap().last_transition_time, Some(at(30)));
        assert!(!set.is_true("Degraded"));
    }

    #[test]
    fn test_update_sets_and_removes() {
        let mut set = ConditionSet::from_conditions(&[
            OperatorCondition::new("Disabled", ConditionStatus::True),
            OperatorCondition::new("Other", ConditionStatus::False),
        ]);

        let update = ConditionUpdate::new()
            .set(OperatorCondition::new("Available", ConditionStatus::True))
            .remove("Disabled");

        assert!(update.apply(&mut set, at(5)));
        assert!(set.is_true("Available"));
        assert!(set.get("Disabled").is_none());
        assert!(set.get("Other").is_some());

        // Second application is a no-op
        assert!(!update.apply(&mut set, at(6)));
    }

    #[test]
    fn test_into_conditions_sorted_by_type() {
        let set = ConditionSet::from_conditions(&[
            OperatorCondition::new("b", ConditionStatus::True),
            OperatorCondition::new("a", ConditionStatus::True),
        ]);
        let types: Vec<_> = set.into_conditions().into_iter().map(|c| c.r#type).collect();
        assert_eq!(types, vec!["a", "b"]);
    }
}
