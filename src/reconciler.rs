//! Reconcile loop keeping watchers in sync with the platform's app inventory.
//!
//! Every tick fetches the full application list, diffs the started
//! applications against the watched set and issues the minimal set of
//! delete, create and update calls to the watcher manager. The watched set
//! is owned by the loop; concurrent readers get an immutable `WatchedSet`
//! view that is swapped in at the end of each tick.

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::app::{ApplicationRecord, WatchKey};
use crate::health::HealthStats;
use crate::metrics::ReconcilerMetrics;
use crate::source::{SnapshotError, SnapshotSource};
use crate::watcher::{WatcherAction, WatcherManager};

/// One active watcher as tracked by the reconciler.
pub struct WatchedEntry<H> {
    pub key: WatchKey,
    pub space: String,
    pub instances: u32,
    handle: H,
}

impl<H> WatchedEntry<H> {
    pub fn handle(&self) -> &H {
        &self.handle
    }
}

/// Read-only view of one watched application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchedApp {
    pub guid: String,
    pub name: String,
    pub space: String,
    pub instances: u32,
}

/// Snapshot of the watched set published after every tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WatchedSet {
    /// Watched applications, ordered by name then guid.
    pub apps: Vec<WatchedApp>,
    pub last_tick: Option<DateTime<Utc>>,
    pub last_tick_success: bool,
    pub last_error: Option<String>,
    pub ticks: u64,
}

/// Type alias for the published watched set.
pub type SharedWatchedSet = Arc<RwLock<WatchedSet>>;

/// Actions computed for one tick.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub to_delete: Vec<WatchKey>,
    pub to_create: Vec<ApplicationRecord>,
    pub to_update: Vec<(WatchKey, u32)>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.to_delete.is_empty() && self.to_create.is_empty() && self.to_update.is_empty()
    }
}

/// A watcher action that failed during a tick.
#[derive(Debug, Clone)]
pub struct ActionFailure {
    pub key: WatchKey,
    pub action: WatcherAction,
    pub error: String,
}

/// Outcome of a tick whose snapshot fetch succeeded.
#[derive(Debug, Default)]
pub struct TickReport {
    pub observed: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub failures: Vec<ActionFailure>,
}

impl TickReport {
    pub fn changed(&self) -> bool {
        self.created + self.updated + self.deleted > 0
    }
}

/// Converges the set of watchers to the platform's started applications.
pub struct Reconciler<S, M: WatcherManager> {
    source: S,
    manager: M,
    watched: HashMap<WatchKey, WatchedEntry<M::Handle>>,
    published: SharedWatchedSet,
    stats: Arc<HealthStats>,
    metrics: Option<ReconcilerMetrics>,
}

impl<S, M> Reconciler<S, M>
where
    S: SnapshotSource,
    M: WatcherManager,
{
    pub fn new(source: S, manager: M) -> Self {
        Self {
            source,
            manager,
            watched: HashMap::new(),
            published: Arc::new(RwLock::new(WatchedSet::default())),
            stats: Arc::new(HealthStats::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ReconcilerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_stats(mut self, stats: Arc<HealthStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Handle to the view published at the end of every tick.
    pub fn watched_set(&self) -> SharedWatchedSet {
        self.published.clone()
    }

    pub fn stats(&self) -> Arc<HealthStats> {
        self.stats.clone()
    }

    pub fn watched_len(&self) -> usize {
        self.watched.len()
    }

    pub fn entry(&self, key: &WatchKey) -> Option<&WatchedEntry<M::Handle>> {
        self.watched.get(key)
    }

    /// Computes the actions needed to converge the watched set to `snapshot`.
    ///
    /// Only started applications are desired. When a snapshot carries the
    /// same watch key twice, the last record wins.
    pub fn plan(&self, snapshot: Vec<ApplicationRecord>) -> Plan {
        let mut desired: HashMap<WatchKey, ApplicationRecord> = HashMap::new();
        for record in snapshot {
            if record.state.is_started() {
                desired.insert(record.watch_key(), record);
            }
        }

        let mut plan = Plan {
            to_delete: self
                .watched
                .keys()
                .filter(|key| !desired.contains_key(*key))
                .cloned()
                .collect(),
            ..Default::default()
        };

        for (key, record) in desired {
            match self.watched.get(&key) {
                None => plan.to_create.push(record),
                Some(entry) if entry.instances != record.instances => {
                    plan.to_update.push((key, record.instances))
                }
                Some(_) => {}
            }
        }

        plan.to_delete.sort();
        plan.to_create
            .sort_by(|a, b| (&a.name, &a.guid).cmp(&(&b.name, &b.guid)));
        plan.to_update.sort();
        plan
    }

    /// Runs one fetch-diff-act cycle.
    ///
    /// A failed fetch applies nothing and returns the error. Individual
    /// watcher failures are collected in the report; the tracked state only
    /// changes for actions that succeeded so the next tick retries the rest.
    #[instrument(skip(self))]
    pub async fn reconcile_once(&mut self) -> Result<TickReport, SnapshotError> {
        let start = Instant::now();

        let snapshot = match self.source.list_applications().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let elapsed = start.elapsed().as_secs_f64();
                error!(error = %e, "Failed to fetch application list, skipping tick");
                self.stats.record_fetch_failure(elapsed);
                if let Some(m) = &self.metrics {
                    m.ticks_total.inc();
                    m.fetch_errors_total.inc();
                    m.last_tick_success.set(0.0);
                    m.last_tick_duration.set(elapsed);
                }
                self.publish(false, Some(e.to_string())).await;
                return Err(e);
            }
        };

        let mut report = TickReport {
            observed: snapshot.len(),
            ..Default::default()
        };
        let plan = self.plan(snapshot);

        for key in plan.to_delete {
            let Some(entry) = self.watched.get(&key) else {
                continue;
            };
            match self.manager.delete_watcher(&entry.handle).await {
                Ok(()) => {
                    self.watched.remove(&key);
                    self.note_action(WatcherAction::Delete, true);
                    info!(guid = %key.guid, app = %key.name, "Deleted watcher");
                    report.deleted += 1;
                }
                Err(e) => {
                    self.note_failure(&mut report, key, WatcherAction::Delete, e.to_string());
                }
            }
        }

        for record in plan.to_create {
            let key = record.watch_key();
            match self.manager.add_watcher(&record).await {
                Ok(handle) => {
                    info!(
                        guid = %record.guid,
                        app = %record.name,
                        space = %record.space,
                        instances = record.instances,
                        "Created watcher"
                    );
                    self.watched.insert(
                        key.clone(),
                        WatchedEntry {
                            key,
                            space: record.space,
                            instances: record.instances,
                            handle,
                        },
                    );
                    self.note_action(WatcherAction::Create, true);
                    report.created += 1;
                }
                Err(e) => {
                    self.note_failure(&mut report, key, WatcherAction::Create, e.to_string());
                }
            }
        }

        for (key, instances) in plan.to_update {
            let Some(entry) = self.watched.get_mut(&key) else {
                continue;
            };
            let previous = entry.instances;
            match self
                .manager
                .update_instance_count(&entry.handle, instances)
                .await
            {
                Ok(()) => {
                    entry.instances = instances;
                    self.note_action(WatcherAction::Update, true);
                    info!(
                        guid = %key.guid,
                        app = %key.name,
                        from = previous,
                        to = instances,
                        "Updated watcher instance count"
                    );
                    report.updated += 1;
                }
                Err(e) => {
                    self.note_failure(&mut report, key, WatcherAction::Update, e.to_string());
                }
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        self.stats.record_tick(
            report.observed,
            self.watched.len(),
            elapsed,
            report.failures.len(),
        );
        if let Some(m) = &self.metrics {
            m.ticks_total.inc();
            m.last_tick_success.set(1.0);
            m.last_tick_duration.set(elapsed);
            m.watched_apps.set(self.watched.len() as i64);
        }
        self.publish(true, None).await;

        if report.changed() || !report.failures.is_empty() {
            info!(
                observed = report.observed,
                watched = self.watched.len(),
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                failed = report.failures.len(),
                "Reconcile tick applied changes"
            );
        } else {
            debug!(
                observed = report.observed,
                watched = self.watched.len(),
                "Reconcile tick found nothing to do"
            );
        }

        Ok(report)
    }

    /// Runs the loop until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// The first tick fires after one full `period`; ticks never overlap and a
    /// slow tick delays the next one. Shutdown is observed between ticks, so an
    /// in-flight tick always runs to completion.
    pub async fn start(&mut self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let period = if period.is_zero() {
            warn!("Reconcile interval of zero requested, using 1ms");
            Duration::from_millis(1)
        } else {
            period
        };

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_ms = period.as_millis() as u64,
            "Reconcile loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Reconciler handle dropped");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    // Errors are already reported inside the tick.
                    let _ = self.reconcile_once().await;
                }
            }
        }

        info!(watched = self.watched.len(), "Reconcile loop stopped");
    }

    fn note_action(&self, action: WatcherAction, ok: bool) {
        if let Some(m) = &self.metrics {
            m.record_action(action, ok);
        }
    }

    fn note_failure(
        &self,
        report: &mut TickReport,
        key: WatchKey,
        action: WatcherAction,
        error: String,
    ) {
        error!(
            guid = %key.guid,
            app = %key.name,
            action = %action,
            error = %error,
            "Watcher action failed, will retry next tick"
        );
        self.note_action(action, false);
        report.failures.push(ActionFailure { key, action, error });
    }

    async fn publish(&self, success: bool, last_error: Option<String>) {
        let mut apps: Vec<WatchedApp> = self
            .watched
            .values()
            .map(|entry| WatchedApp {
                guid: entry.key.guid.clone(),
                name: entry.key.name.clone(),
                space: entry.space.clone(),
                instances: entry.instances,
            })
            .collect();
        apps.sort_by(|a, b| (&a.name, &a.guid).cmp(&(&b.name, &b.guid)));

        let mut set = self.published.write().await;
        *set = WatchedSet {
            apps,
            last_tick: Some(Utc::now()),
            last_tick_success: success,
            last_error,
            ticks: set.ticks + 1,
        };
    }
}

impl<S, M> Reconciler<S, M>
where
    S: SnapshotSource + 'static,
    M: WatcherManager + 'static,
{
    /// Moves the reconciler onto its own task and starts the loop.
    pub fn spawn(mut self, period: Duration) -> ReconcilerHandle<S, M> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            self.start(period, shutdown_rx).await;
            self
        });
        ReconcilerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a spawned reconcile loop. Dropping it also stops the loop.
pub struct ReconcilerHandle<S, M: WatcherManager> {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Reconciler<S, M>>,
}

impl<S, M: WatcherManager> ReconcilerHandle<S, M> {
    /// Requests shutdown and waits for the in-flight tick, if any, to finish.
    pub async fn stop(self) -> Result<Reconciler<S, M>, JoinError> {
        let _ = self.shutdown.send(true);
        self.task.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::LifecycleState;
    use crate::watcher::WatcherError;
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    const GUID: &str = "33333333-3333-3333-3333-333333333333";

    fn app(guid: &str, name: &str, state: LifecycleState, instances: u32) -> ApplicationRecord {
        ApplicationRecord {
            guid: guid.into(),
            name: name.into(),
            space: "123".into(),
            state,
            instances,
        }
    }

    fn started(name: &str, instances: u32) -> ApplicationRecord {
        app(GUID, name, LifecycleState::Started, instances)
    }

    fn stopped(name: &str) -> ApplicationRecord {
        app(GUID, name, LifecycleState::Stopped, 0)
    }

    /// Serves scripted responses in tick order, then keeps repeating the
    /// last successful snapshot.
    #[derive(Default)]
    struct FakeSource {
        scripted: Mutex<VecDeque<Result<Vec<ApplicationRecord>, SnapshotError>>>,
        current: Mutex<Vec<ApplicationRecord>>,
        calls: Mutex<usize>,
    }

    impl FakeSource {
        /// Same application list on every tick.
        fn serving(apps: Vec<ApplicationRecord>) -> Arc<Self> {
            let source = Self::default();
            *source.current.lock().unwrap() = apps;
            Arc::new(source)
        }

        /// One response per tick, in order.
        fn scripted(ticks: Vec<Result<Vec<ApplicationRecord>, SnapshotError>>) -> Arc<Self> {
            let source = Self::default();
            *source.scripted.lock().unwrap() = ticks.into();
            Arc::new(source)
        }

        fn now_serving(&self, apps: Vec<ApplicationRecord>) {
            *self.current.lock().unwrap() = apps;
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SnapshotSource for FakeSource {
        async fn list_applications(&self) -> Result<Vec<ApplicationRecord>, SnapshotError> {
            *self.calls.lock().unwrap() += 1;
            let next = self.scripted.lock().unwrap().pop_front();
            match next {
                Some(Ok(apps)) => {
                    *self.current.lock().unwrap() = apps.clone();
                    Ok(apps)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.current.lock().unwrap().clone()),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Add(WatchKey),
        Update(WatchKey, u32),
        Delete(WatchKey),
    }

    /// Records every call; fails actions listed in `failing` by app name.
    #[derive(Default)]
    struct FakeManager {
        calls: Mutex<Vec<Call>>,
        added: Mutex<Vec<ApplicationRecord>>,
        failing: Mutex<HashSet<(WatcherAction, String)>>,
    }

    impl FakeManager {
        fn fail(&self, action: WatcherAction, name: &str) {
            self.failing.lock().unwrap().insert((action, name.to_string()));
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn should_fail(&self, action: WatcherAction, name: &str) -> bool {
            self.failing
                .lock()
                .unwrap()
                .contains(&(action, name.to_string()))
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, action: WatcherAction) -> usize {
            self.calls()
                .iter()
                .filter(|c| {
                    matches!(
                        (action, c),
                        (WatcherAction::Create, Call::Add(_))
                            | (WatcherAction::Update, Call::Update(..))
                            | (WatcherAction::Delete, Call::Delete(_))
                    )
                })
                .count()
        }
    }

    #[async_trait]
    impl WatcherManager for FakeManager {
        type Handle = WatchKey;

        async fn add_watcher(&self, record: &ApplicationRecord) -> Result<WatchKey, WatcherError> {
            let key = record.watch_key();
            self.calls.lock().unwrap().push(Call::Add(key.clone()));
            if self.should_fail(WatcherAction::Create, &record.name) {
                return Err(WatcherError::Other("add refused".into()));
            }
            self.added.lock().unwrap().push(record.clone());
            Ok(key)
        }

        async fn update_instance_count(
            &self,
            handle: &WatchKey,
            instances: u32,
        ) -> Result<(), WatcherError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Update(handle.clone(), instances));
            if self.should_fail(WatcherAction::Update, &handle.name) {
                return Err(WatcherError::Other("update refused".into()));
            }
            Ok(())
        }

        async fn delete_watcher(&self, handle: &WatchKey) -> Result<(), WatcherError> {
            self.calls.lock().unwrap().push(Call::Delete(handle.clone()));
            if self.should_fail(WatcherAction::Delete, &handle.name) {
                return Err(WatcherError::Other("delete refused".into()));
            }
            Ok(())
        }
    }

    fn reconciler(
        source: &Arc<FakeSource>,
        manager: &Arc<FakeManager>,
    ) -> Reconciler<Arc<FakeSource>, Arc<FakeManager>> {
        Reconciler::new(source.clone(), manager.clone())
    }

    async fn ticks(r: &mut Reconciler<Arc<FakeSource>, Arc<FakeManager>>, n: usize) {
        for _ in 0..n {
            let _ = r.reconcile_once().await;
        }
    }

    #[tokio::test]
    async fn test_creates_new_app_once() {
        let source = FakeSource::serving(vec![started("foo", 1)]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        let report = r.reconcile_once().await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(manager.count(WatcherAction::Create), 1);

        ticks(&mut r, 5).await;
        assert_eq!(source.calls(), 6);
        assert_eq!(manager.calls().len(), 1);
        assert_eq!(r.watched_len(), 1);

        let added = manager.added.lock().unwrap().clone();
        assert_eq!(added, vec![started("foo", 1)]);
    }

    #[tokio::test]
    async fn test_unchanged_snapshot_is_a_noop() {
        let source = FakeSource::serving(vec![
            started("foo", 1),
            app("g2", "bar", LifecycleState::Started, 3),
            app("g3", "baz", LifecycleState::Stopped, 0),
        ]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        r.reconcile_once().await.unwrap();
        let report = r.reconcile_once().await.unwrap();
        assert!(!report.changed());
        assert_eq!(report.observed, 3);
        assert_eq!(manager.count(WatcherAction::Create), 2);
        assert_eq!(manager.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_stopped_app_is_not_watched() {
        let source = FakeSource::serving(vec![stopped("foo")]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        ticks(&mut r, 3).await;
        assert!(manager.calls().is_empty());
        assert_eq!(r.watched_len(), 0);
    }

    #[tokio::test]
    async fn test_transient_state_is_treated_as_stopped() {
        let source = FakeSource::serving(vec![app(
            GUID,
            "foo",
            LifecycleState::Other("PENDING".into()),
            1,
        )]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        ticks(&mut r, 2).await;
        assert!(manager.calls().is_empty());
    }

    #[tokio::test]
    async fn test_started_after_stopped_creates_once() {
        let source = FakeSource::scripted(vec![
            Ok(vec![stopped("foo")]),
            Ok(vec![started("foo", 1)]),
        ]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        ticks(&mut r, 4).await;
        assert_eq!(manager.count(WatcherAction::Create), 1);
        assert_eq!(manager.count(WatcherAction::Delete), 0);
    }

    #[tokio::test]
    async fn test_deleted_app_deletes_watcher_once() {
        let source = FakeSource::scripted(vec![Ok(vec![started("foo", 1)]), Ok(vec![])]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        ticks(&mut r, 4).await;
        assert_eq!(manager.count(WatcherAction::Create), 1);
        assert_eq!(manager.count(WatcherAction::Delete), 1);
        assert_eq!(r.watched_len(), 0);
    }

    #[tokio::test]
    async fn test_stopped_app_deletes_watcher_once() {
        let guid = "11111111-11111-11111-1111-111-11-1-1-1";
        let source = FakeSource::scripted(vec![
            Ok(vec![app(guid, "foo", LifecycleState::Started, 1)]),
            Ok(vec![app(guid, "foo", LifecycleState::Stopped, 0)]),
        ]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        ticks(&mut r, 4).await;
        assert_eq!(manager.count(WatcherAction::Create), 1);
        assert_eq!(manager.count(WatcherAction::Delete), 1);
    }

    #[tokio::test]
    async fn test_restart_after_stop_is_a_fresh_create() {
        let source = FakeSource::scripted(vec![
            Ok(vec![started("foo", 1)]),
            Ok(vec![stopped("foo")]),
            Ok(vec![started("foo", 1)]),
        ]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        ticks(&mut r, 5).await;
        assert_eq!(
            manager.calls(),
            vec![
                Call::Add(started("foo", 1).watch_key()),
                Call::Delete(started("foo", 1).watch_key()),
                Call::Add(started("foo", 1).watch_key()),
            ]
        );
    }

    #[tokio::test]
    async fn test_rename_deletes_then_recreates() {
        let source = FakeSource::scripted(vec![
            Ok(vec![started("foo", 1)]),
            Ok(vec![started("bar", 1)]),
        ]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        ticks(&mut r, 4).await;
        assert_eq!(manager.count(WatcherAction::Create), 2);
        assert_eq!(manager.count(WatcherAction::Delete), 1);
        assert_eq!(
            manager.calls(),
            vec![
                Call::Add(started("foo", 1).watch_key()),
                Call::Delete(started("foo", 1).watch_key()),
                Call::Add(started("bar", 1).watch_key()),
            ]
        );
        assert!(r.entry(&started("bar", 1).watch_key()).is_some());
        assert!(r.entry(&started("foo", 1).watch_key()).is_none());
    }

    #[tokio::test]
    async fn test_scale_change_updates_in_place() {
        let source = FakeSource::scripted(vec![
            Ok(vec![started("foo", 1)]),
            Ok(vec![started("foo", 2)]),
        ]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        ticks(&mut r, 4).await;
        assert_eq!(manager.count(WatcherAction::Create), 1);
        assert_eq!(manager.count(WatcherAction::Delete), 0);
        assert_eq!(manager.count(WatcherAction::Update), 1);

        let update = manager.calls()[1].clone();
        match update {
            Call::Update(key, instances) => {
                assert_eq!(key.guid, GUID);
                assert_eq!(instances, 2);
            }
            other => panic!("expected update, got {other:?}"),
        }
        let entry = r.entry(&started("foo", 2).watch_key()).unwrap();
        assert_eq!(entry.instances, 2);
        assert_eq!(entry.handle().name, "foo");
    }

    #[tokio::test]
    async fn test_fetch_failure_applies_nothing() {
        let source = FakeSource::scripted(vec![
            Ok(vec![started("foo", 1)]),
            Err(SnapshotError::Timeout),
        ]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        r.reconcile_once().await.unwrap();
        let result = r.reconcile_once().await;
        assert!(matches!(result, Err(SnapshotError::Timeout)));
        assert_eq!(manager.calls().len(), 1);
        assert_eq!(r.watched_len(), 1);
        assert_eq!(r.entry(&started("foo", 1).watch_key()).unwrap().instances, 1);

        let view = r.watched_set();
        let view = view.read().await;
        assert!(!view.last_tick_success);
        assert_eq!(view.apps.len(), 1);
        assert!(view.last_error.as_deref().unwrap().contains("timed out"));
        assert_eq!(r.stats().fetch_failures(), 1);
    }

    #[tokio::test]
    async fn test_failed_create_is_retried_next_tick() {
        let source = FakeSource::serving(vec![started("foo", 1)]);
        let manager = Arc::new(FakeManager::default());
        manager.fail(WatcherAction::Create, "foo");
        let mut r = reconciler(&source, &manager);

        let report = r.reconcile_once().await.unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].action, WatcherAction::Create);
        assert_eq!(r.watched_len(), 0);

        manager.heal();
        let report = r.reconcile_once().await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(manager.count(WatcherAction::Create), 2);
        assert_eq!(r.watched_len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_entry_and_retries() {
        let source = FakeSource::scripted(vec![Ok(vec![started("foo", 1)]), Ok(vec![])]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        r.reconcile_once().await.unwrap();
        manager.fail(WatcherAction::Delete, "foo");
        let report = r.reconcile_once().await.unwrap();
        assert_eq!(report.deleted, 0);
        assert_eq!(r.watched_len(), 1);

        manager.heal();
        r.reconcile_once().await.unwrap();
        assert_eq!(r.watched_len(), 0);
        assert_eq!(manager.count(WatcherAction::Delete), 2);

        r.reconcile_once().await.unwrap();
        assert_eq!(manager.count(WatcherAction::Delete), 2);
    }

    #[tokio::test]
    async fn test_failed_update_keeps_old_count() {
        let source = FakeSource::scripted(vec![
            Ok(vec![started("foo", 1)]),
            Ok(vec![started("foo", 3)]),
        ]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        r.reconcile_once().await.unwrap();
        manager.fail(WatcherAction::Update, "foo");
        r.reconcile_once().await.unwrap();
        assert_eq!(r.entry(&started("foo", 1).watch_key()).unwrap().instances, 1);

        manager.heal();
        r.reconcile_once().await.unwrap();
        assert_eq!(r.entry(&started("foo", 1).watch_key()).unwrap().instances, 3);
        assert_eq!(manager.count(WatcherAction::Update), 2);

        r.reconcile_once().await.unwrap();
        assert_eq!(manager.count(WatcherAction::Update), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_other_actions() {
        let source = FakeSource::serving(vec![
            app("g1", "alpha", LifecycleState::Started, 1),
            app("g2", "beta", LifecycleState::Started, 1),
            app("g3", "gamma", LifecycleState::Started, 1),
        ]);
        let manager = Arc::new(FakeManager::default());
        manager.fail(WatcherAction::Create, "beta");
        let mut r = reconciler(&source, &manager);

        let report = r.reconcile_once().await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key.name, "beta");
        assert_eq!(manager.count(WatcherAction::Create), 3);
        assert_eq!(r.watched_len(), 2);
    }

    #[tokio::test]
    async fn test_deletes_run_before_creates_and_updates() {
        let source = FakeSource::scripted(vec![
            Ok(vec![
                app("g1", "alpha", LifecycleState::Started, 1),
                app("g2", "beta", LifecycleState::Started, 1),
            ]),
            Ok(vec![
                app("g1", "alpha", LifecycleState::Started, 2),
                app("g3", "gamma", LifecycleState::Started, 1),
            ]),
        ]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        ticks(&mut r, 2).await;
        let calls = manager.calls();
        assert_eq!(
            &calls[2..],
            &[
                Call::Delete(WatchKey {
                    guid: "g2".into(),
                    name: "beta".into()
                }),
                Call::Add(WatchKey {
                    guid: "g3".into(),
                    name: "gamma".into()
                }),
                Call::Update(
                    WatchKey {
                        guid: "g1".into(),
                        name: "alpha".into()
                    },
                    2
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_key_in_snapshot_last_wins() {
        let source = FakeSource::serving(vec![started("foo", 1), started("foo", 4)]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        ticks(&mut r, 2).await;
        assert_eq!(manager.count(WatcherAction::Create), 1);
        assert_eq!(r.entry(&started("foo", 4).watch_key()).unwrap().instances, 4);
    }

    #[tokio::test]
    async fn test_plan_is_empty_once_converged() {
        let source = FakeSource::serving(vec![started("foo", 1)]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager);

        assert_eq!(r.plan(vec![started("foo", 1)]).to_create.len(), 1);
        r.reconcile_once().await.unwrap();
        assert!(r.plan(vec![started("foo", 1)]).is_empty());

        let plan = r.plan(vec![stopped("foo")]);
        assert_eq!(plan.to_delete, vec![started("foo", 1).watch_key()]);
    }

    #[tokio::test]
    async fn test_published_view_and_metrics() {
        let registry = prometheus::Registry::new();
        let metrics = ReconcilerMetrics::new(&registry).unwrap();
        let source = FakeSource::serving(vec![
            app("g2", "zeta", LifecycleState::Started, 2),
            app("g1", "alpha", LifecycleState::Started, 1),
        ]);
        let manager = Arc::new(FakeManager::default());
        let mut r = reconciler(&source, &manager).with_metrics(metrics.clone());
        let view = r.watched_set();

        assert!(view.read().await.last_tick.is_none());
        r.reconcile_once().await.unwrap();

        let set = view.read().await.clone();
        assert!(set.last_tick_success);
        assert_eq!(set.ticks, 1);
        let names: Vec<&str> = set.apps.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        assert_eq!(metrics.ticks_total.get(), 1);
        assert_eq!(metrics.watched_apps.get(), 2);
        assert_eq!(metrics.actions_total.with_label_values(&["create"]).get(), 2);
        assert_eq!(metrics.last_tick_success.get(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_fires_after_one_interval() {
        let source = FakeSource::serving(vec![started("foo", 1)]);
        let manager = Arc::new(FakeManager::default());
        let handle = reconciler(&source, &manager).spawn(Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(source.calls(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.calls(), 1);
        assert_eq!(manager.count(WatcherAction::Create), 1);

        handle.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_creates_exactly_once_across_ticks() {
        let source = FakeSource::serving(vec![started("foo", 1)]);
        let manager = Arc::new(FakeManager::default());
        let handle = reconciler(&source, &manager).spawn(Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(manager.count(WatcherAction::Create), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(source.calls(), 4);
        assert_eq!(manager.count(WatcherAction::Create), 1);

        let r = handle.stop().await.unwrap();
        assert_eq!(r.watched_len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_loop_and_no_more_ticks() {
        let source = FakeSource::serving(vec![started("foo", 1)]);
        let manager = Arc::new(FakeManager::default());
        let handle = reconciler(&source, &manager).spawn(Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(250)).await;
        let calls_before = source.calls();
        assert_eq!(calls_before, 2);

        handle.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.calls(), calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scale_change_through_loop() {
        let source = FakeSource::serving(vec![started("foo", 1)]);
        let manager = Arc::new(FakeManager::default());
        let handle = reconciler(&source, &manager).spawn(Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(150)).await;
        source.now_serving(vec![started("foo", 2)]);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(manager.count(WatcherAction::Create), 1);
        assert_eq!(manager.count(WatcherAction::Update), 1);
        handle.stop().await.unwrap();
    }
}
