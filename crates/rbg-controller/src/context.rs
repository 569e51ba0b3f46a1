//! Shared state handed to every reconciler

use crate::config::ControllerConfig;
use rbg_store::{Client, EventRecorder};
use rbg_types::{EventReason, EventSource, InvolvedObject, ObjectKey};
use std::sync::Arc;

/// Client, event sink and configuration shared by the controller loops
#[derive(Clone)]
pub struct ControllerContext {
    pub client: Client,
    pub recorder: Arc<dyn EventRecorder>,
    pub config: ControllerConfig,
}

impl ControllerContext {
    pub fn new(client: Client, recorder: Arc<dyn EventRecorder>, config: ControllerConfig) -> Self {
        Self {
            client,
            recorder,
            config,
        }
    }

    pub fn normal(
        &self,
        source: EventSource,
        kind: &str,
        key: &ObjectKey,
        reason: EventReason,
        message: impl Into<String>,
    ) {
        self.recorder.normal(
            source,
            InvolvedObject::new(kind, key.clone()),
            reason,
            message.into(),
        );
    }

    pub fn warning(
        &self,
        source: EventSource,
        kind: &str,
        key: &ObjectKey,
        reason: EventReason,
        message: impl Into<String>,
    ) {
        self.recorder.warning(
            source,
            InvolvedObject::new(kind, key.clone()),
            reason,
            message.into(),
        );
    }
}
