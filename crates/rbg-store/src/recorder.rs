//! Event recording sinks
//!
//! Recording never blocks and never fails from the caller's point of view:
//! a reconcile must not be aborted because an event could not be stored.

use parking_lot::Mutex;
use rbg_types::{EventEnvelope, EventReason, EventSeverity, EventSource, InvolvedObject};
use std::collections::VecDeque;
use tokio::sync::broadcast;

const DEFAULT_HISTORY: usize = 10_000;

/// Best-effort event sink
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: EventEnvelope);

    fn normal(
        &self,
        source: EventSource,
        involved: InvolvedObject,
        reason: EventReason,
        message: String,
    ) {
        self.record(EventEnvelope::new(
            source,
            EventSeverity::Normal,
            involved,
            reason,
            message,
        ));
    }

    fn warning(
        &self,
        source: EventSource,
        involved: InvolvedObject,
        reason: EventReason,
        message: String,
    ) {
        self.record(EventEnvelope::new(
            source,
            EventSeverity::Warning,
            involved,
            reason,
            message,
        ));
    }
}

/// Recorder that fans events out to subscribers and keeps a bounded history
pub struct BroadcastRecorder {
    tx: broadcast::Sender<EventEnvelope>,
    history: Mutex<VecDeque<EventEnvelope>>,
    capacity: usize,
}

impl Default for BroadcastRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}

impl BroadcastRecorder {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(4096);
        Self {
            tx,
            history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Snapshot of retained events, oldest first
    pub fn history(&self) -> Vec<EventEnvelope> {
        self.history.lock().iter().cloned().collect()
    }

    /// Reasons recorded for one object, oldest first
    pub fn reasons_for(&self, involved: &InvolvedObject) -> Vec<EventReason> {
        self.history
            .lock()
            .iter()
            .filter(|e| &e.involved == involved)
            .map(|e| e.reason)
            .collect()
    }

    pub fn count(&self, reason: EventReason) -> usize {
        self.history
            .lock()
            .iter()
            .filter(|e| e.reason == reason)
            .count()
    }
}

impl EventRecorder for BroadcastRecorder {
    fn record(&self, event: EventEnvelope) {
        match event.severity {
            EventSeverity::Normal => tracing::debug!(
                object = %event.involved.key,
                kind = %event.involved.kind,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventSeverity::Warning => tracing::warn!(
                object = %event.involved.key,
                kind = %event.involved.kind,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }

        {
            let mut history = self.history.lock();
            if history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // Nobody listening is not an error
        let _ = self.tx.send(event);
    }
}
