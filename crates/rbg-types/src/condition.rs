//! Type-keyed status conditions with merge-by-type semantics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition vocabulary shared by groups and sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Every role reports all replicas ready
    Ready,
    /// At least one replica of every role is serving
    Available,
    /// The controller is still converging the group
    Progressing,
    /// An ordinal-indexed role is mid-rollout
    RollingUpdateInProgress,
    /// A group-wide recreate sequence is running
    RestartInProgress,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
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

/// Condition reasons written by the controller
pub mod reasons {
    pub const ALL_ROLES_READY: &str = "AllRolesReady";
    pub const ROLE_NOT_READY: &str = "RoleNotReady";
    pub const INVALID_ROLE_DEPENDENCY: &str = "InvalidRoleDependency";
    pub const DEPENDENCY_NOT_READY: &str = "DependencyNotReady";
    pub const ROLLING_UPDATE: &str = "RollingUpdate";
    pub const ROLLOUT_COMPLETE: &str = "RolloutComplete";
    pub const RESTART_STARTED: &str = "RBGRestart";
    pub const RESTART_COMPLETED: &str = "RBGRestartCompleted";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        condition_type: ConditionType,
        status: impl Into<ConditionStatus>,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            condition_type,
            status: status.into(),
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Merge `condition` into `conditions` by type.
///
/// The entry of matching type is replaced in place; when the status is
/// unchanged its transition time is kept. Returns true when anything
/// observable changed.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions
        .iter_mut()
        .find(|c| c.condition_type == condition.condition_type)
    {
        Some(existing) => {
            if existing.status == condition.status
                && existing.reason == condition.reason
                && existing.message == condition.message
            {
                return false;
            }
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

pub fn find_condition(conditions: &[Condition], condition_type: ConditionType) -> Option<&Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

pub fn is_condition_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    find_condition(conditions, condition_type)
        .map(Condition::is_true)
        .unwrap_or(false)
}
