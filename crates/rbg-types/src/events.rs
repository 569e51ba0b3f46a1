//! Event types for controller observability
//!
//! Every failure path of a reconcile records an event against the object it
//! concerns. Recording is best-effort; see the recorder in `rbg-store`.

use crate::meta::ObjectKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Envelope wrapping all recorded events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Controller loop that emitted the event
    pub source: EventSource,

    pub severity: EventSeverity,

    /// Object the event is about
    pub involved: InvolvedObject,

    pub reason: EventReason,

    /// Human readable detail
    pub message: String,
}

impl EventEnvelope {
    pub fn new(
        source: EventSource,
        severity: EventSeverity,
        involved: InvolvedObject,
        reason: EventReason,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            source,
            severity,
            involved,
            reason,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvolvedObject {
    pub kind: String,
    pub key: ObjectKey,
}

impl InvolvedObject {
    pub fn new(kind: impl Into<String>, key: ObjectKey) -> Self {
        Self {
            kind: kind.into(),
            key,
        }
    }
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Group reconciler
    Group,
    /// Scaling adapter state machine
    ScalingAdapter,
    /// Restart coordinator
    Restart,
    /// Group-set replicator
    GroupSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Normal,
    Warning,
}

/// Machine-readable event reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventReason {
    // ═══════════════════════════════════════════════════════════════════
    // GROUP EVENTS
    // ═══════════════════════════════════════════════════════════════════
    FailedGetRBG,
    InvalidRoleDependency,
    FailedCheckRoleDependency,
    FailedReconcileWorkload,
    FailedUpdateStatus,
    Succeed,

    // ═══════════════════════════════════════════════════════════════════
    // SCALING ADAPTER EVENTS
    // ═══════════════════════════════════════════════════════════════════
    SuccessfulBound,
    SuccessfulScale,
    FailedScale,
    FailedGetRBGRole,

    // ═══════════════════════════════════════════════════════════════════
    // RESTART EVENTS
    // ═══════════════════════════════════════════════════════════════════
    RBGRestart,
    RBGRestartCompleted,
    FailedRestart,

    // ═══════════════════════════════════════════════════════════════════
    // GROUP SET EVENTS
    // ═══════════════════════════════════════════════════════════════════
    SuccessfulCreate,
    FailedCreate,
}

impl fmt::Display for EventReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}
