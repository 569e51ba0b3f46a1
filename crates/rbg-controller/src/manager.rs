//! Wires the controller loops to the store and runs them until shutdown

use crate::adapter::ScalingAdapterReconciler;
use crate::config::ControllerConfig;
use crate::context::ControllerContext;
use crate::error::Result;
use crate::gc::GarbageCollector;
use crate::group::GroupReconciler;
use crate::restart::RestartCoordinator;
use crate::runtime::{stopped, Controller};
use crate::set::GroupSetReplicator;
use futures::future::ready;
use rbg_store::{Client, EventRecorder, WatchEvent};
use rbg_types::{labels, LabelSelector, ObjectKey, ObjectMeta, Resource};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info};

/// Owner group of a dependent object, read from its identity label
fn labelled_owner(meta: &ObjectMeta, label: &str) -> Vec<ObjectKey> {
    meta.labels
        .get(label)
        .map(|name| ObjectKey::new(meta.namespace.clone(), name.clone()))
        .into_iter()
        .collect()
}

/// Runs the group, adapter, set, restart and garbage-collection loops
pub struct ControllerManager {
    ctx: ControllerContext,
    shutdown_tx: watch::Sender<bool>,
}

impl ControllerManager {
    pub fn new(client: Client, recorder: Arc<dyn EventRecorder>, config: ControllerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ctx: ControllerContext::new(client, recorder, config),
            shutdown_tx,
        }
    }

    pub fn client(&self) -> &Client {
        &self.ctx.client
    }

    /// Signal every loop to stop; loops started afterwards stop at once
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Run all loops until [`shutdown`](Self::shutdown) is called
    pub async fn run(&self) -> Result<()> {
        let client = self.ctx.client.clone();
        let config = self.ctx.config.clone();
        let stop = || self.shutdown_tx.subscribe();

        let groups = Controller::new(Arc::new(GroupReconciler::new(self.ctx.clone())), config.clone());
        let adapters = Controller::new(
            Arc::new(ScalingAdapterReconciler::new(self.ctx.clone())),
            config.clone(),
        );
        let sets = Controller::new(Arc::new(GroupSetReplicator::new(self.ctx.clone())), config.clone());
        let restarts = Controller::new(Arc::new(RestartCoordinator::new(self.ctx.clone())), config);

        let mut watchers = vec![
            groups.watch(client.groups.watch(), |e| ready(vec![e.object().key()]), stop()),
            groups.watch(
                client.workloads.watch(),
                |e| ready(labelled_owner(e.object().metadata(), labels::GROUP_NAME_LABEL)),
                stop(),
            ),
            groups.watch(
                client.services.watch(),
                |e| ready(labelled_owner(e.object().metadata(), labels::GROUP_NAME_LABEL)),
                stop(),
            ),
            groups.watch(
                client.config_maps.watch(),
                |e| ready(labelled_owner(e.object().metadata(), labels::GROUP_NAME_LABEL)),
                stop(),
            ),
            adapters.watch(client.adapters.watch(), |e| ready(vec![e.object().key()]), stop()),
            sets.watch(client.sets.watch(), |e| ready(vec![e.object().key()]), stop()),
            sets.watch(
                client.groups.watch(),
                |e| ready(labelled_owner(e.object().metadata(), labels::SET_NAME_LABEL)),
                stop(),
            ),
        ];

        // A group change may rebind or rescale the adapters that target it
        let adapter_store = client.adapters.clone();
        watchers.push(adapters.watch(
            client.groups.watch(),
            move |e| {
                let store = adapter_store.clone();
                let group = e.object().key();
                async move {
                    match store.list(Some(&group.namespace), &LabelSelector::everything()).await {
                        Ok(found) => found
                            .iter()
                            .filter(|a| a.target_group_key() == group)
                            .map(|a| a.key())
                            .collect(),
                        Err(err) => {
                            error!(group = %group, error = %err, "Listing adapters failed");
                            Vec::new()
                        }
                    }
                }
            },
            stop(),
        ));

        let coordinator = restarts.reconciler();
        watchers.push(restarts.watch(
            client.pods.watch(),
            move |e| {
                let coordinator = coordinator.clone();
                async move { coordinator.triggers_for(e).await }
            },
            stop(),
        ));

        let collector = GarbageCollector::new(client.clone());
        collector.sweep().await?;
        watchers.push(tokio::spawn(run_collector(collector, client.clone(), stop())));

        for trigger in restarts.reconciler().resume_interrupted().await? {
            restarts.queue().add(trigger);
        }
        groups.resync().await;
        adapters.resync().await;
        sets.resync().await;

        info!("Controller manager started");
        tokio::join!(
            groups.run(stop()),
            adapters.run(stop()),
            sets.run(stop()),
            restarts.run(stop()),
        );
        for watcher in watchers {
            let _ = watcher.await;
        }
        info!("Controller manager stopped");
        Ok(())
    }
}

enum Collect {
    Cascade(String),
    /// Events were lost
    Sweep,
    Skip,
    Closed,
}

fn collect_signal<T: Resource>(event: std::result::Result<WatchEvent<T>, broadcast::error::RecvError>) -> Collect {
    match event {
        Ok(WatchEvent::Deleted(object)) => Collect::Cascade(object.metadata().uid.clone()),
        Ok(_) => Collect::Skip,
        Err(broadcast::error::RecvError::Lagged(_)) => Collect::Sweep,
        Err(broadcast::error::RecvError::Closed) => Collect::Closed,
    }
}

/// Cascade deletions as owners disappear
async fn run_collector(collector: GarbageCollector, client: Client, mut shutdown: watch::Receiver<bool>) {
    let mut sets = client.sets.watch();
    let mut groups = client.groups.watch();
    let mut workloads = client.workloads.watch();
    loop {
        let signal = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            event = sets.recv() => collect_signal(event),
            event = groups.recv() => collect_signal(event),
            event = workloads.recv() => collect_signal(event),
        };
        let result = match signal {
            Collect::Cascade(uid) => collector.cascade(&uid).await,
            Collect::Sweep => collector.sweep().await,
            Collect::Skip => continue,
            Collect::Closed => break,
        };
        if let Err(err) = result {
            error!(error = %err, "Garbage collection failed");
        }
    }
}
