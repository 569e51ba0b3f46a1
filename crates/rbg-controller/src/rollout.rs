//! Staged rollout targets for ordinal-indexed workloads
//!
//! Surge-then-replace: on a template change the workload first grows by
//! `max_surge`, then the partition walks down from `desired - max_unavailable`
//! toward zero as pods at the new revision become ready. Everything here is a
//! pure function of the role spec and the observed object, so a restarted
//! controller resumes a rollout from observed state alone.

use crate::error::ValidationError;
use rbg_types::{labels, RoleSpec, Workload};

/// Replica and partition targets for one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutTarget {
    pub partition: i32,
    pub replicas: i32,
}

/// Observed state of the existing workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutSnapshot {
    pub replicas: i32,
    pub partition: i32,
    /// Desired size recorded at the last write
    pub previous_size: Option<i32>,
    pub updated_ready_replicas: i32,
    /// Whether status reflects the latest spec generation
    pub status_current: bool,
}

impl RolloutSnapshot {
    pub fn from_workload(workload: &Workload) -> Self {
        Self {
            replicas: workload.replicas(),
            partition: workload.partition(),
            previous_size: workload
                .metadata
                .annotations
                .get(labels::ROLE_SIZE_ANNOTATION)
                .and_then(|v| v.parse().ok()),
            updated_ready_replicas: workload.status.updated_ready_replicas,
            status_current: workload.status.observed_generation >= workload.metadata.generation,
        }
    }

    /// Replicas above the size recorded at the last write; a plain
    /// scale-down leaves the two equal
    pub fn surge_held(&self, desired: i32) -> bool {
        self.replicas > self.previous_size.unwrap_or(desired).max(0)
    }

    /// Whether a staged replace is still underway
    pub fn in_progress(&self, desired: i32) -> bool {
        self.partition > 0 || self.surge_held(desired)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutInput {
    pub desired: i32,
    pub max_surge: i32,
    pub max_unavailable: i32,
    /// `None` before the workload exists
    pub current: Option<RolloutSnapshot>,
    /// The pod template differs from the one last written
    pub template_changed: bool,
}

/// Resolve a role's surge/unavailable bounds against its desired size.
///
/// Surge rounds up, unavailable rounds down; if both end up zero the
/// rollout could never progress, so one replica may be unavailable.
pub fn resolve_bounds(role: &RoleSpec) -> Result<(i32, i32), ValidationError> {
    let desired = role.replicas.max(0);
    let invalid = |e: rbg_types::IntOrPercentError| ValidationError::InvalidRollout {
        role: role.name.clone(),
        reason: e.to_string(),
    };
    let surge = role
        .rollout_strategy
        .max_surge
        .resolve(desired, true)
        .map_err(invalid)?;
    let mut unavailable = role
        .rollout_strategy
        .max_unavailable
        .resolve(desired, false)
        .map_err(invalid)?;
    if surge == 0 && unavailable == 0 {
        unavailable = 1;
    }
    Ok((surge, unavailable))
}

/// Compute this pass's targets
pub fn compute(input: &RolloutInput) -> RolloutTarget {
    let desired = input.desired.max(0);
    let steady = RolloutTarget {
        partition: 0,
        replicas: desired,
    };

    let Some(current) = input.current else {
        return steady;
    };

    if input.template_changed {
        // The snapshot caps the base so a surge already held is not stacked
        let base = current
            .previous_size
            .map_or(current.replicas, |size| current.replicas.min(size.max(0)));
        return RolloutTarget {
            partition: (desired - input.max_unavailable).max(0),
            replicas: (base + input.max_surge).max(desired),
        };
    }

    if !current.in_progress(desired) {
        return steady;
    }

    let held = RolloutTarget {
        partition: current.partition.min(desired),
        replicas: current.replicas.max(desired),
    };
    if !current.status_current {
        return held;
    }
    if current.updated_ready_replicas >= desired {
        return steady;
    }

    let at_new_revision = held.replicas - held.partition;
    if current.updated_ready_replicas >= at_new_revision {
        RolloutTarget {
            partition: (held.partition - input.max_unavailable).max(0),
            replicas: held.replicas,
        }
    } else {
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbg_types::IntOrPercent;

    fn snapshot(replicas: i32, partition: i32, updated_ready: i32) -> RolloutSnapshot {
        RolloutSnapshot {
            replicas,
            partition,
            previous_size: Some(4),
            updated_ready_replicas: updated_ready,
            status_current: true,
        }
    }

    fn input(current: Option<RolloutSnapshot>, template_changed: bool) -> RolloutInput {
        RolloutInput {
            desired: 4,
            max_surge: 2,
            max_unavailable: 2,
            current,
            template_changed,
        }
    }

    fn target(partition: i32, replicas: i32) -> RolloutTarget {
        RolloutTarget { partition, replicas }
    }

    #[test]
    fn test_surge_then_replace_sequence() {
        // First create
        assert_eq!(compute(&input(None, false)), target(0, 4));
        // Template change on a steady 4-replica workload
        assert_eq!(compute(&input(Some(snapshot(4, 0, 4)), true)), target(2, 6));
        // All four target-revision pods ready
        assert_eq!(compute(&input(Some(snapshot(6, 2, 4)), false)), target(0, 4));
    }

    #[test]
    fn test_partition_holds_until_new_pods_ready() {
        assert_eq!(compute(&input(Some(snapshot(6, 2, 3)), false)), target(2, 6));
    }

    #[test]
    fn test_partition_steps_by_max_unavailable() {
        let i = RolloutInput {
            desired: 6,
            max_surge: 1,
            max_unavailable: 2,
            current: Some(RolloutSnapshot {
                replicas: 7,
                partition: 4,
                previous_size: Some(6),
                updated_ready_replicas: 3,
                status_current: true,
            }),
            template_changed: false,
        };
        assert_eq!(compute(&i), target(2, 7));
    }

    #[test]
    fn test_stale_status_holds() {
        let mut s = snapshot(6, 2, 4);
        s.status_current = false;
        assert_eq!(compute(&input(Some(s), false)), target(2, 6));
    }

    #[test]
    fn test_steady_state_follows_desired() {
        assert_eq!(compute(&input(Some(snapshot(4, 0, 4)), false)), target(0, 4));
        // Plain scale-up is not a rollout
        assert_eq!(compute(&input(Some(snapshot(2, 0, 2)), false)), target(0, 4));
    }

    #[test]
    fn test_unavailable_larger_than_desired() {
        let i = RolloutInput {
            desired: 1,
            max_surge: 0,
            max_unavailable: 3,
            current: Some(snapshot(1, 0, 1)),
            template_changed: true,
        };
        assert_eq!(compute(&i), target(0, 1));
    }

    #[test]
    fn test_template_change_surges_from_current_replicas() {
        // Snapshot larger than the live size does not add replicas
        let i = RolloutInput {
            desired: 2,
            max_surge: 1,
            max_unavailable: 1,
            current: Some(snapshot(2, 0, 2)),
            template_changed: true,
        };
        assert_eq!(compute(&i), target(1, 3));

        // A second template change mid-rollout keeps the existing surge
        assert_eq!(compute(&input(Some(snapshot(6, 2, 2)), true)), target(2, 6));
    }

    #[test]
    fn test_scale_down_is_not_a_rollout() {
        let mut s = snapshot(6, 0, 6);
        s.previous_size = Some(6);
        assert!(!s.in_progress(4));
        assert_eq!(compute(&input(Some(s), false)), target(0, 4));

        let surged = snapshot(6, 0, 2);
        assert!(surged.in_progress(4));
    }

    #[test]
    fn test_negative_desired_is_clamped() {
        let i = RolloutInput {
            desired: -1,
            max_surge: 0,
            max_unavailable: 1,
            current: None,
            template_changed: false,
        };
        assert_eq!(compute(&i), target(0, 0));
    }

    #[test]
    fn test_compute_is_reproducible() {
        let i = input(Some(snapshot(6, 2, 2)), false);
        assert_eq!(compute(&i), compute(&i));
    }

    #[test]
    fn test_resolve_bounds() {
        let mut role = RoleSpec::new("w", 4);
        role.rollout_strategy.max_surge = IntOrPercent::Percent(25);
        role.rollout_strategy.max_unavailable = IntOrPercent::Percent(10);
        assert_eq!(resolve_bounds(&role).unwrap(), (1, 0));

        role.rollout_strategy.max_surge = IntOrPercent::Int(0);
        role.rollout_strategy.max_unavailable = IntOrPercent::Int(0);
        assert_eq!(resolve_bounds(&role).unwrap(), (0, 1));

        role.rollout_strategy.max_surge = IntOrPercent::Int(-1);
        assert!(matches!(
            resolve_bounds(&role),
            Err(ValidationError::InvalidRollout { .. })
        ));
    }
}
