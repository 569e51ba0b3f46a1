//! Level-triggered controller runtime
//!
//! A [`Controller`] owns a deduplicating work queue of keys and drives a
//! [`Reconciler`] over them. The queue guarantees a key is never reconciled
//! by two workers at once; a key that changes while in flight is marked
//! dirty and re-run when the current pass finishes.

use crate::config::ControllerConfig;
use crate::error::{ErrorClass, Result};
use crate::retry::backoff_delay;
use async_trait::async_trait;
use parking_lot::Mutex;
use rbg_store::WatchEvent;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What to do with a key after a successful pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action {
    requeue_after: Option<Duration>,
}

impl Action {
    /// Wait for the next watch event
    pub fn await_change() -> Self {
        Self { requeue_after: None }
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        self.requeue_after
    }
}

/// One convergence loop's logic
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static;

    fn name(&self) -> &'static str;

    async fn reconcile(&self, key: &Self::Key) -> Result<Action>;

    /// Every key this loop is responsible for; used for resync
    async fn list_keys(&self) -> Result<Vec<Self::Key>> {
        Ok(Vec::new())
    }

    /// Deadline for one pass; `None` runs unbounded
    fn pass_timeout(&self, config: &ControllerConfig) -> Option<Duration> {
        Some(config.reconcile_timeout())
    }
}

struct QueueState<K> {
    queued: HashSet<K>,
    processing: HashSet<K>,
    dirty: HashSet<K>,
    failures: HashMap<K, u32>,
}

/// Deduplicating queue with per-key exclusivity
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    tx: mpsc::UnboundedSender<K>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<K>>,
}

impl<K: Clone + Eq + Hash + Send + Sync + 'static> WorkQueue<K> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(QueueState {
                queued: HashSet::new(),
                processing: HashSet::new(),
                dirty: HashSet::new(),
                failures: HashMap::new(),
            }),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Enqueue `key` unless it is already waiting
    pub fn add(&self, key: K) {
        let mut state = self.state.lock();
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            let _ = self.tx.send(key);
        }
    }

    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Next key to process; marks it in flight
    pub async fn next(&self) -> Option<K> {
        let key = self.rx.lock().await.recv().await?;
        let mut state = self.state.lock();
        state.queued.remove(&key);
        state.processing.insert(key.clone());
        Some(key)
    }

    /// Finish processing `key`, re-queueing it if it changed meanwhile
    pub fn done(&self, key: &K) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.remove(key) && state.queued.insert(key.clone()) {
            let _ = self.tx.send(key.clone());
        }
    }

    /// Count a failure; returns the consecutive failure count
    pub fn record_failure(&self, key: &K) -> u32 {
        let mut state = self.state.lock();
        let count = state.failures.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn forget(&self, key: &K) {
        self.state.lock().failures.remove(key);
    }

    pub fn len(&self) -> usize {
        self.state.lock().queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Clone + Eq + Hash + Send + Sync + 'static> Default for WorkQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a reconciler over its work queue
pub struct Controller<R: Reconciler> {
    reconciler: Arc<R>,
    queue: Arc<WorkQueue<R::Key>>,
    config: ControllerConfig,
}

impl<R: Reconciler> Controller<R> {
    pub fn new(reconciler: Arc<R>, config: ControllerConfig) -> Self {
        Self {
            reconciler,
            queue: Arc::new(WorkQueue::new()),
            config,
        }
    }

    pub fn queue(&self) -> Arc<WorkQueue<R::Key>> {
        Arc::clone(&self.queue)
    }

    pub fn reconciler(&self) -> Arc<R> {
        Arc::clone(&self.reconciler)
    }

    /// Enqueue every key the reconciler reports
    pub async fn resync(&self) {
        enqueue_all(self.reconciler.as_ref(), &self.queue).await;
    }

    /// Forward watch events into the queue through `mapper`.
    ///
    /// A lagged receiver triggers a full resync since events were lost.
    pub fn watch<T, F, Fut>(
        &self,
        mut events: broadcast::Receiver<WatchEvent<T>>,
        mapper: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()>
    where
        T: Clone + Send + 'static,
        F: Fn(WatchEvent<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<R::Key>> + Send,
    {
        let queue = self.queue();
        let reconciler = self.reconciler();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopped(&mut shutdown) => break,
                    event = events.recv() => match event {
                        Ok(event) => {
                            for key in mapper(event).await {
                                queue.add(key);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(controller = reconciler.name(), missed, "Watch lagged, resyncing");
                            enqueue_all(reconciler.as_ref(), &queue).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Process the queue until shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let name = self.reconciler.name();
        let limit = self.config.max_concurrent_reconciles.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut resync = self.config.resync_interval().map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker
        });

        info!(controller = name, max_concurrent = limit, "Controller started");
        loop {
            // Wait for a free slot first so a saturated pool still sees
            // shutdown and resync
            let permit = tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = tick(&mut resync) => {
                    enqueue_all(self.reconciler.as_ref(), &self.queue).await;
                    continue;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            tokio::select! {
                _ = stopped(&mut shutdown) => break,
                _ = tick(&mut resync) => {
                    enqueue_all(self.reconciler.as_ref(), &self.queue).await;
                }
                key = self.queue.next() => {
                    let Some(key) = key else { break };
                    let reconciler = self.reconciler();
                    let queue = self.queue();
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        process(reconciler.as_ref(), &queue, &config, key).await;
                        drop(permit);
                    });
                }
            }
        }
        info!(controller = name, "Controller stopped");
    }
}

async fn tick(resync: &mut Option<tokio::time::Interval>) {
    match resync.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Resolves once shutdown has been signalled, including before the call
pub(crate) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn enqueue_all<R: Reconciler>(reconciler: &R, queue: &WorkQueue<R::Key>) {
    match reconciler.list_keys().await {
        Ok(keys) => keys.into_iter().for_each(|k| queue.add(k)),
        Err(err) => error!(controller = reconciler.name(), error = %err, "Resync listing failed"),
    }
}

async fn process<R: Reconciler>(
    reconciler: &R,
    queue: &Arc<WorkQueue<R::Key>>,
    config: &ControllerConfig,
    key: R::Key,
) {
    let name = reconciler.name();
    let deadline = reconciler.pass_timeout(config);
    let outcome = match deadline {
        Some(limit) => tokio::time::timeout(limit, reconciler.reconcile(&key)).await,
        None => Ok(reconciler.reconcile(&key).await),
    };
    queue.done(&key);

    let transient = |reason: String| {
        let failures = queue.record_failure(&key);
        let delay = backoff_delay(config.error_requeue_base(), config.error_requeue_max(), failures);
        warn!(controller = name, key = %key, failures, ?delay, error = %reason, "Reconcile failed, retrying");
        queue.add_after(key.clone(), delay);
    };

    match outcome {
        Ok(Ok(action)) => {
            queue.forget(&key);
            if let Some(delay) = action.requeue_after() {
                queue.add_after(key.clone(), delay);
            }
        }
        Ok(Err(err)) => match err.class() {
            ErrorClass::Validation => {
                queue.forget(&key);
                warn!(controller = name, key = %key, error = %err, "Invalid spec, waiting for a change");
            }
            ErrorClass::NotReady => {
                queue.forget(&key);
                debug!(controller = name, key = %key, reason = %err, "Not ready, requeueing");
                queue.add_after(key.clone(), config.dependency_requeue());
            }
            ErrorClass::Transient => transient(err.to_string()),
        },
        Err(_) => transient(format!("reconcile exceeded {deadline:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ReconcileError, ValidationError};
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recording {
        calls: DashMap<String, usize>,
        in_flight: DashMap<String, usize>,
        max_in_flight: AtomicUsize,
        delay_ms: u64,
    }

    #[async_trait]
    impl Reconciler for Recording {
        type Key = String;

        fn name(&self) -> &'static str {
            "recording"
        }

        async fn reconcile(&self, key: &String) -> Result<Action> {
            *self.calls.entry(key.clone()).or_insert(0) += 1;
            let now = {
                let mut entry = self.in_flight.entry(key.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            if let Some(mut entry) = self.in_flight.get_mut(key) {
                *entry -= 1;
            }
            match key.as_str() {
                "invalid" => Err(ValidationError::DuplicateRole("x".into()).into()),
                "blocked" => Err(ReconcileError::DependencyNotReady {
                    role: "a".into(),
                    dependency: "b".into(),
                }),
                _ => Ok(Action::await_change()),
            }
        }
    }

    fn calls(r: &Recording, key: &str) -> usize {
        r.calls.get(key).map_or(0, |c| *c)
    }

    fn config() -> ControllerConfig {
        ControllerConfig {
            dependency_requeue_secs: 0,
            resync_interval_secs: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_queue_deduplicates() {
        let queue: WorkQueue<String> = WorkQueue::new();
        queue.add("a".into());
        queue.add("a".into());
        queue.add("b".into());
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.next().await.as_deref(), Some("a"));
        // Changed while in flight: held back until done
        queue.add("a".into());
        assert_eq!(queue.len(), 1);
        queue.done(&"a".to_string());
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_same_key_never_runs_concurrently() {
        let reconciler = Arc::new(Recording {
            delay_ms: 20,
            ..Default::default()
        });
        let controller = Arc::new(Controller::new(Arc::clone(&reconciler), config()));
        let (tx, shutdown) = watch::channel(false);
        let runner = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.run(shutdown).await })
        };

        let queue = controller.queue();
        for _ in 0..5 {
            queue.add("g".to_string());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        tx.send(true).unwrap();
        runner.await.unwrap();

        assert_eq!(reconciler.max_in_flight.load(Ordering::SeqCst), 1);
        let n = calls(&reconciler, "g");
        assert!((2..=5).contains(&n), "ran {n} times");
    }

    #[tokio::test]
    async fn test_error_classes_drive_requeue() {
        let reconciler = Arc::new(Recording::default());
        let controller = Arc::new(Controller::new(Arc::clone(&reconciler), config()));
        let (tx, shutdown) = watch::channel(false);
        let runner = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.run(shutdown).await })
        };

        let queue = controller.queue();
        queue.add("invalid".to_string());
        queue.add("blocked".to_string());
        queue.add("fine".to_string());
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        runner.await.unwrap();

        assert_eq!(calls(&reconciler, "invalid"), 1);
        assert_eq!(calls(&reconciler, "fine"), 1);
        assert!(calls(&reconciler, "blocked") > 1);
    }

    #[tokio::test]
    async fn test_shutdown_while_all_workers_busy() {
        let reconciler = Arc::new(Recording {
            delay_ms: 30_000,
            ..Default::default()
        });
        let config = ControllerConfig {
            max_concurrent_reconciles: 1,
            ..config()
        };
        let controller = Arc::new(Controller::new(Arc::clone(&reconciler), config));
        let (tx, shutdown) = watch::channel(false);
        let runner = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.run(shutdown).await })
        };

        let queue = controller.queue();
        queue.add("slow".to_string());
        queue.add("waiting".to_string());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls(&reconciler, "slow"), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .expect("controller stopped while its only worker was busy")
            .unwrap();
        assert_eq!(calls(&reconciler, "waiting"), 0);
    }

    #[test]
    fn test_action() {
        assert_eq!(Action::await_change().requeue_after(), None);
        assert_eq!(
            Action::requeue(Duration::from_secs(1)).requeue_after(),
            Some(Duration::from_secs(1))
        );
    }
}
