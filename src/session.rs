//! Session: the aggregator that owns a rig's watchers, its current dataset
//! handle, and the per-cycle error list.
//!
//! One session corresponds to one physical setup. Each scheduler tick runs
//! one cycle: poll every watcher in configured order, merge the readings
//! into a single timestamped row, manage the dataset lifecycle (lazy
//! creation, day rollover, loss recovery), and append the row. A cycle
//! either has data from every configured watcher or persists nothing.
//!
//! Sessions share no mutable state with each other; all session state is
//! behind one mutex, so externally exposed commands serialize with an
//! in-flight cycle.

use crate::config::Config;
use crate::error::{LoggerError, Result};
use crate::measurement::{flatten_row, Quantity, VariableDescriptor};
use crate::scheduler::{Scheduler, Tick};
use crate::source::SourceHub;
use crate::store::{resolve_name_template, DatasetHandle, DatasetStore};
use crate::watcher::{Watcher, WatcherRegistry};
use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;
use tokio::sync::Mutex;

/// Error category used for store failures on the recreate-and-retry path.
const STORE_ERROR_SOURCE: &str = "data vault";
/// Error category used for store failures that are not retried.
const GENERAL_ERROR_SOURCE: &str = "general";
/// Error category for rows that no longer match the dataset schema.
const SCHEMA_ERROR_SOURCE: &str = "schema";

/// One failure from the most recent cycle: which source (or category) it
/// came from, and the message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Failing source name, or a category for store/schema failures.
    pub source: String,
    /// Human-readable failure message.
    pub message: String,
}

impl ErrorRecord {
    fn new(source: impl Into<String>, err: &LoggerError) -> Self {
        Self {
            source: source.into(),
            message: err.to_string(),
        }
    }
}

struct CycleState {
    dataset: Option<DatasetHandle>,
    current_day: Option<NaiveDate>,
    errors: Vec<ErrorRecord>,
}

/// Cycle engine and state, shared between the session facade and the
/// scheduler task.
pub(crate) struct SessionCore {
    name: String,
    path: String,
    name_template: String,
    watchers: Vec<Arc<dyn Watcher>>,
    store: Arc<dyn DatasetStore>,
    state: Mutex<CycleState>,
}

#[async_trait]
impl Tick for SessionCore {
    async fn tick(&self) {
        self.cycle(Local::now()).await;
    }
}

impl SessionCore {
    /// Run one poll/merge/persist cycle at the given wall-clock time.
    ///
    /// Never returns an error: every failure path degrades to recording the
    /// failure in the session's error list and continuing next tick.
    pub(crate) async fn cycle(&self, now: DateTime<Local>) {
        let mut state = self.state.lock().await;
        let timestamp = Quantity::new(now.timestamp_millis() as f64 / 1000.0, "s");

        // Poll every watcher; one failing source never aborts the others.
        let mut readings = Vec::with_capacity(self.watchers.len());
        let mut errors = Vec::new();
        for watcher in &self.watchers {
            match watcher.take_point().await {
                Ok(reading) => readings.push(reading),
                Err(err) => {
                    tracing::warn!(
                        session = %self.name,
                        source = %watcher.source_name(),
                        error = %err,
                        "Watcher failed to take a point"
                    );
                    errors.push(ErrorRecord::new(watcher.source_name(), &err));
                }
            }
        }

        // A partial row is never persisted.
        if !errors.is_empty() {
            state.errors = errors;
            return;
        }

        let row = flatten_row(&timestamp, &readings);

        // Day rollover: drop the handle, keep the stored data.
        if state.current_day.is_some() && state.current_day != Some(now.date_naive()) {
            tracing::info!(session = %self.name, "Day rolled over, starting a new dataset");
            state.dataset = None;
        }

        if state.dataset.is_none() {
            match self.make_dataset(now).await {
                Ok(handle) => {
                    state.dataset = Some(handle);
                    state.current_day = Some(now.date_naive());
                }
                Err(err) => {
                    tracing::warn!(session = %self.name, error = %err, "Failed to create dataset");
                    state.errors = vec![ErrorRecord::new(GENERAL_ERROR_SOURCE, &err)];
                    return;
                }
            }
        }
        let Some(handle) = state.dataset.clone() else {
            return;
        };

        // A watcher's variable count drifted since creation: reject the
        // cycle rather than write a row against a stale schema.
        if row.len() != handle.column_count() {
            let err = LoggerError::SchemaMismatch {
                expected: handle.column_count(),
                actual: row.len(),
            };
            tracing::error!(session = %self.name, error = %err, "Rejecting cycle");
            state.errors = vec![ErrorRecord::new(SCHEMA_ERROR_SOURCE, &err)];
            return;
        }

        state.errors = match self.store.append(&handle, &row).await {
            Ok(()) => Vec::new(),
            Err(err) if err.is_dataset_loss() => {
                tracing::warn!(
                    session = %self.name,
                    dataset = %handle.name,
                    "Store lost the dataset, recreating and retrying once"
                );
                match self.make_dataset(now).await {
                    Ok(new_handle) => {
                        let retry = self.store.append(&new_handle, &row).await;
                        state.dataset = Some(new_handle);
                        state.current_day = Some(now.date_naive());
                        match retry {
                            Ok(()) => Vec::new(),
                            Err(err) => vec![ErrorRecord::new(STORE_ERROR_SOURCE, &err)],
                        }
                    }
                    Err(err) => {
                        state.dataset = None;
                        vec![ErrorRecord::new(STORE_ERROR_SOURCE, &err)]
                    }
                }
            }
            Err(err) => vec![ErrorRecord::new(GENERAL_ERROR_SOURCE, &err)],
        };
    }

    /// Build and create a dataset: resolve the name template, declare one
    /// `time [s]` independent variable, and gather every watcher's
    /// variables, in watcher order, as the dependent schema.
    async fn make_dataset(&self, now: DateTime<Local>) -> Result<DatasetHandle> {
        let name = resolve_name_template(&self.name_template, now);
        let independents = vec![VariableDescriptor::new("time", "", "s")];
        let mut dependents = Vec::new();
        for watcher in &self.watchers {
            dependents.extend(watcher.get_variables().await?);
        }
        tracing::info!(
            session = %self.name,
            dataset = %name,
            variables = dependents.len(),
            "Creating dataset"
        );
        self.store
            .create(&self.path, &name, &independents, &dependents)
            .await
    }
}

/// The running aggregator for one physical setup.
pub struct Session {
    core: Arc<SessionCore>,
    scheduler: Scheduler<SessionCore>,
    interval: StdMutex<Duration>,
}

impl Session {
    /// Assemble a session from its parts. Watcher order is preserved and
    /// determines row layout.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        name_template: impl Into<String>,
        interval: Duration,
        watchers: Vec<Arc<dyn Watcher>>,
        store: Arc<dyn DatasetStore>,
    ) -> Self {
        let core = Arc::new(SessionCore {
            name: name.into(),
            path: path.into(),
            name_template: name_template.into(),
            watchers,
            store,
            state: Mutex::new(CycleState {
                dataset: None,
                current_day: None,
                errors: Vec::new(),
            }),
        });
        Self {
            scheduler: Scheduler::new(Arc::clone(&core)),
            core,
            interval: StdMutex::new(interval),
        }
    }

    /// This session's rig name.
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Start or stop the poll loop. Starting when already started and
    /// stopping when already stopped are no-ops.
    pub async fn logging(&self, start: bool) {
        if start {
            let interval = self.stored_interval();
            match self.scheduler.start(interval).await {
                Ok(()) | Err(LoggerError::AlreadyRunning) => {}
                Err(err) => {
                    tracing::error!(session = %self.core.name, error = %err, "Failed to start logging");
                }
            }
        } else {
            self.scheduler.stop().await;
        }
    }

    /// Whether the poll loop is currently running.
    pub async fn is_logging(&self) -> bool {
        self.scheduler.is_running().await
    }

    /// The poll interval: the active one while logging, else the one the
    /// next start will use.
    pub async fn interval(&self) -> Duration {
        match self.scheduler.interval().await {
            Some(interval) => interval,
            None => self.stored_interval(),
        }
    }

    /// Change the poll interval. Reconfigures the running loop atomically,
    /// or just updates the stored interval when idle.
    pub async fn set_interval(&self, interval: Duration) {
        *self
            .interval
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = interval;
        if self.scheduler.is_running().await {
            self.scheduler.reconfigure(interval).await;
        }
    }

    /// Trigger one cycle out of band.
    pub async fn take_point(&self) {
        self.core.cycle(Local::now()).await;
    }

    /// Discard the current dataset handle, forcing lazy recreation on the
    /// next successful cycle. Idempotent.
    pub async fn new_dataset(&self) {
        self.core.state.lock().await.dataset = None;
    }

    /// The most recent cycle's failures. Empty after a fully clean cycle.
    pub async fn errors(&self) -> Vec<ErrorRecord> {
        self.core.state.lock().await.errors.clone()
    }

    /// Stop the poll loop, draining any in-flight cycle, and release the
    /// watchers. Terminal: consumes the session.
    pub async fn shutdown(self) {
        self.scheduler.stop().await;
        tracing::info!(session = %self.core.name, "Session shut down");
    }

    fn stored_interval(&self) -> Duration {
        *self
            .interval
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Instantiate a session per configured rig.
///
/// A rig is only instantiable when every declared source kind resolves to a
/// known watcher constructor and its hosting node is reachable; otherwise
/// the rig is skipped with a diagnostic, never a fatal error.
pub fn discover_sessions(
    config: &Config,
    registry: &WatcherRegistry,
    hub: &Arc<dyn SourceHub>,
    store: &Arc<dyn DatasetStore>,
) -> Vec<Session> {
    let mut sessions = Vec::new();
    'rigs: for rig in &config.rigs {
        let mut watchers: Vec<Arc<dyn Watcher>> = Vec::with_capacity(rig.watchers.len());
        for spec in &rig.watchers {
            if !registry.contains(spec.kind) {
                tracing::warn!(rig = %rig.name, kind = %spec.kind, "Skipping rig: unknown source kind");
                continue 'rigs;
            }
            if !hub.node_online(&spec.node) {
                tracing::warn!(rig = %rig.name, node = %spec.node, "Skipping rig: node unreachable");
                continue 'rigs;
            }
            match registry.build(spec, Arc::clone(hub)) {
                Ok(watcher) => watchers.push(watcher),
                Err(err) => {
                    tracing::warn!(rig = %rig.name, source = %spec.source, error = %err, "Skipping rig: watcher construction failed");
                    continue 'rigs;
                }
            }
        }
        tracing::info!(rig = %rig.name, watchers = watchers.len(), "Creating session");
        sessions.push(Session::new(
            rig.name.clone(),
            rig.dataset_path(),
            rig.dataset_name(),
            rig.interval,
            watchers,
            Arc::clone(store),
        ));
    }
    sessions
}

/// Convenience wrapper for building sessions from config with the built-in
/// watcher registry.
pub fn discover_sessions_builtin(
    config: &Config,
    hub: &Arc<dyn SourceHub>,
    store: &Arc<dyn DatasetStore>,
) -> Vec<Session> {
    discover_sessions(config, &WatcherRegistry::builtin(), hub, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Reading;
    use crate::store::MemoryStore;
    use crate::watcher::SourceKind;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test watcher with an adjustable number of produced values.
    struct TestWatcher {
        source: String,
        declared: usize,
        produced: AtomicUsize,
        fail: StdMutex<Option<String>>,
    }

    impl TestWatcher {
        fn new(source: &str, vars: usize) -> Arc<Self> {
            Arc::new(Self {
                source: source.to_string(),
                declared: vars,
                produced: AtomicUsize::new(vars),
                fail: StdMutex::new(None),
            })
        }

        fn set_produced(&self, n: usize) {
            self.produced.store(n, Ordering::SeqCst);
        }

        fn fail_with(&self, message: &str) {
            *self.fail.lock().unwrap_or_else(PoisonError::into_inner) =
                Some(message.to_string());
        }

        fn succeed(&self) {
            *self.fail.lock().unwrap_or_else(PoisonError::into_inner) = None;
        }
    }

    #[async_trait]
    impl Watcher for TestWatcher {
        fn source_name(&self) -> &str {
            &self.source
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Diodes
        }

        fn is_active(&self) -> bool {
            true
        }

        async fn get_variables(&self) -> Result<Vec<VariableDescriptor>> {
            Ok((0..self.declared)
                .map(|i| VariableDescriptor::new(format!("ch{i}"), "Diode", "K"))
                .collect())
        }

        async fn take_point(&self) -> Result<Reading> {
            if let Some(message) = self
                .fail
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
            {
                return Err(LoggerError::Read {
                    source_name: self.source.clone(),
                    message,
                });
            }
            Ok((0..self.produced.load(Ordering::SeqCst))
                .map(|_| Quantity::new(1.0, "K"))
                .collect())
        }
    }

    fn day(day: u32, hour: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2014, 3, day, hour, 0, 0).unwrap()
    }

    fn session_with(
        watchers: Vec<Arc<dyn Watcher>>,
        store: Arc<MemoryStore>,
    ) -> Session {
        Session::new(
            "Ivan",
            "DR/Ivan",
            "Ivan log - [t]",
            Duration::from_secs(1),
            watchers,
            store,
        )
    }

    #[tokio::test]
    async fn day_rollover_creates_a_new_dataset() {
        let store = Arc::new(MemoryStore::new());
        let watcher = TestWatcher::new("lakeshore_diodes", 2);
        let session = session_with(vec![watcher], Arc::clone(&store));

        session.core.cycle(day(1, 12)).await;
        session.core.cycle(day(1, 13)).await;
        assert_eq!(store.create_count(), 1);

        session.core.cycle(day(2, 0)).await;
        assert_eq!(store.create_count(), 2);
        assert!(session.errors().await.is_empty());

        // two rows in the first dataset, one in the second
        let names = store.dataset_names("DR/Ivan");
        assert_eq!(names.len(), 2);
    }

    #[tokio::test]
    async fn lost_dataset_is_recreated_and_the_row_retried_once() {
        let store = Arc::new(MemoryStore::new());
        let watcher = TestWatcher::new("lakeshore_diodes", 2);
        let session = session_with(vec![watcher as Arc<dyn Watcher>], Arc::clone(&store));

        session.core.cycle(day(1, 12)).await;
        assert_eq!(store.create_count(), 1);

        for name in store.dataset_names("DR/Ivan") {
            store.lose("DR/Ivan", &name);
        }
        session.core.cycle(day(1, 13)).await;
        assert_eq!(store.create_count(), 2);
        assert!(session.errors().await.is_empty(), "retried append succeeded");
        // the failed append plus the successful retry
        assert_eq!(store.append_count(), 3);
    }

    #[tokio::test]
    async fn store_failure_on_retry_is_recorded_once() {
        let store = Arc::new(MemoryStore::new());
        let watcher = TestWatcher::new("lakeshore_diodes", 2);
        let session = session_with(vec![watcher as Arc<dyn Watcher>], Arc::clone(&store));

        session.core.cycle(day(1, 12)).await;
        store.inject_append_failure(LoggerError::DatasetNotFound { name: "log".into() });
        store.inject_append_failure(LoggerError::Store("disk full".into()));
        session.core.cycle(day(1, 13)).await;

        let errors = session.errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, "data vault");
    }

    #[tokio::test]
    async fn schema_drift_rejects_the_cycle() {
        let store = Arc::new(MemoryStore::new());
        let watcher = TestWatcher::new("lakeshore_diodes", 2);
        let session = session_with(vec![Arc::clone(&watcher) as Arc<dyn Watcher>], Arc::clone(&store));

        session.core.cycle(day(1, 12)).await;
        assert_eq!(store.append_count(), 1);

        watcher.set_produced(3);
        session.core.cycle(day(1, 13)).await;
        assert_eq!(store.append_count(), 1, "no append for a drifted row");
        let errors = session.errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, "schema");
    }

    #[tokio::test]
    async fn errors_are_replaced_each_cycle_and_cleared_on_success() {
        let store = Arc::new(MemoryStore::new());
        let a = TestWatcher::new("mks_gauge_server", 1);
        let b = TestWatcher::new("lakeshore_diodes", 1);
        let session = session_with(
            vec![
                Arc::clone(&a) as Arc<dyn Watcher>,
                Arc::clone(&b) as Arc<dyn Watcher>,
            ],
            Arc::clone(&store),
        );

        a.fail_with("no route to host");
        b.fail_with("timeout");
        session.take_point().await;
        assert_eq!(session.errors().await.len(), 2);

        b.succeed();
        session.take_point().await;
        let errors = session.errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].source, "mks_gauge_server");

        a.succeed();
        session.take_point().await;
        assert!(session.errors().await.is_empty());
        assert_eq!(store.append_count(), 1);
    }

    #[tokio::test]
    async fn new_dataset_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let watcher = TestWatcher::new("lakeshore_diodes", 1);
        let session = session_with(vec![watcher as Arc<dyn Watcher>], Arc::clone(&store));

        session.take_point().await;
        assert_eq!(store.create_count(), 1);

        session.new_dataset().await;
        session.new_dataset().await;
        session.take_point().await;
        assert_eq!(store.create_count(), 2);
    }

    #[tokio::test]
    async fn discovery_skips_rigs_on_unreachable_nodes() {
        use crate::config::{ApplicationConfig, Config, RigConfig, StorageConfig};
        use crate::source::sim::{SimDiodeSource, SimHub};
        use crate::watcher::WatcherSpec;

        let hub = Arc::new(SimHub::new());
        hub.add_diode_array(Arc::new(SimDiodeSource::new("lakeshore_diodes", &[4.2])));
        hub.set_node_online("vince", false);

        let rig = |name: &str, node: &str| RigConfig {
            name: name.to_string(),
            path: None,
            dataset_name: None,
            interval: Duration::from_secs(1),
            watchers: vec![WatcherSpec {
                kind: SourceKind::Diodes,
                source: "lakeshore_diodes".to_string(),
                node: node.to_string(),
                options: toml::Value::Table(toml::map::Map::new()),
            }],
        };
        let config = Config {
            application: ApplicationConfig {
                name: "DR Logger".to_string(),
                log_level: "info".to_string(),
            },
            storage: StorageConfig {
                backend: "memory".to_string(),
                root_dir: "data".into(),
            },
            rigs: vec![rig("Ivan", "dr"), rig("Vince", "vince")],
        };

        let store: Arc<dyn DatasetStore> = Arc::new(MemoryStore::new());
        let hub: Arc<dyn crate::source::SourceHub> = hub;
        let sessions = discover_sessions_builtin(&config, &hub, &store);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name(), "Ivan");
    }

    #[tokio::test]
    async fn logging_toggle_is_a_no_op_when_repeated() {
        let store = Arc::new(MemoryStore::new());
        let watcher = TestWatcher::new("lakeshore_diodes", 1);
        let session = session_with(vec![watcher as Arc<dyn Watcher>], store);

        session.logging(true).await;
        session.logging(true).await;
        assert!(session.is_logging().await);
        session.logging(false).await;
        session.logging(false).await;
        assert!(!session.is_logging().await);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn set_interval_when_idle_applies_to_next_start() {
        let store = Arc::new(MemoryStore::new());
        let watcher = TestWatcher::new("lakeshore_diodes", 1);
        let session = session_with(vec![watcher as Arc<dyn Watcher>], store);

        session.set_interval(Duration::from_millis(250)).await;
        assert_eq!(session.interval().await, Duration::from_millis(250));
        session.logging(true).await;
        assert_eq!(session.interval().await, Duration::from_millis(250));
        session.shutdown().await;
    }
}
