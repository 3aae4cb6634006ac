//! Dataset store interface and backends.
//!
//! The store is an append-only, schema-described table keyed by path + name.
//! The engine needs exactly two operations from it: create a dataset with a
//! declared schema, and append one row. `append` must report dataset loss
//! (e.g. an external deletion) as the distinguished
//! [`LoggerError::DatasetNotFound`] so the session can recreate the dataset
//! and retry the write once.
//!
//! Two backends are provided: [`MemoryStore`] for tests and demos, and
//! [`CsvStore`] which keeps one CSV file per dataset under a root directory.

use crate::error::{LoggerError, Result};
use crate::measurement::VariableDescriptor;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Substitution token in dataset name templates, resolved to the creation
/// timestamp at minute resolution.
pub const NAME_TEMPLATE_TOKEN: &str = "[t]";

/// Resolve a dataset name template against a creation time.
pub fn resolve_name_template(template: &str, now: DateTime<Local>) -> String {
    template.replace(
        NAME_TEMPLATE_TOKEN,
        &now.format("%Y-%m-%d %H:%M").to_string(),
    )
}

/// Address and schema of one created dataset.
///
/// The dependent-variable schema is fixed at creation time; the session
/// holds at most one handle at a time and simply drops it on rollover.
#[derive(Clone, Debug)]
pub struct DatasetHandle {
    /// Store path the dataset lives under (e.g. "DR/Ivan").
    pub path: String,
    /// Resolved dataset name, unique within the path.
    pub name: String,
    /// Independent variables; always exactly one entry, `time [s]`.
    pub independents: Vec<VariableDescriptor>,
    /// Dependent variables, concatenated over every watcher in order.
    pub dependents: Vec<VariableDescriptor>,
}

impl DatasetHandle {
    /// Total number of columns a row appended to this dataset must have.
    pub fn column_count(&self) -> usize {
        self.independents.len() + self.dependents.len()
    }
}

/// Append-only columnar dataset store.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Create a dataset under `path` with the given schema. The returned
    /// handle carries the resolved (uniquified) name.
    async fn create(
        &self,
        path: &str,
        name: &str,
        independents: &[VariableDescriptor],
        dependents: &[VariableDescriptor],
    ) -> Result<DatasetHandle>;

    /// Append one row to the dataset behind `handle`.
    ///
    /// Fails with [`LoggerError::DatasetNotFound`] when the store no longer
    /// knows the dataset.
    async fn append(&self, handle: &DatasetHandle, row: &[f64]) -> Result<()>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MemoryStore
// =============================================================================

struct StoredDataset {
    columns: usize,
    rows: Vec<Vec<f64>>,
}

/// In-memory dataset store.
///
/// Supports simulating external dataset loss via [`MemoryStore::lose`] and
/// scripting append failures, which the integration tests use to exercise
/// the recreate-and-retry path.
#[derive(Default)]
pub struct MemoryStore {
    datasets: Mutex<HashMap<(String, String), StoredDataset>>,
    injected: Mutex<Vec<LoggerError>>,
    creates: AtomicUsize,
    appends: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a dataset as if it had been deleted externally.
    pub fn lose(&self, path: &str, name: &str) {
        lock(&self.datasets).remove(&(path.to_string(), name.to_string()));
    }

    /// Queue an error to be returned by the next append, ahead of any real
    /// store behavior.
    pub fn inject_append_failure(&self, err: LoggerError) {
        lock(&self.injected).push(err);
    }

    /// Names of the datasets created under `path`, in no particular order.
    pub fn dataset_names(&self, path: &str) -> Vec<String> {
        lock(&self.datasets)
            .keys()
            .filter(|(p, _)| p == path)
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Rows of a dataset, if it exists.
    pub fn rows(&self, path: &str, name: &str) -> Option<Vec<Vec<f64>>> {
        lock(&self.datasets)
            .get(&(path.to_string(), name.to_string()))
            .map(|d| d.rows.clone())
    }

    /// Number of datasets created so far.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of append attempts so far (including failed ones).
    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatasetStore for MemoryStore {
    async fn create(
        &self,
        path: &str,
        name: &str,
        independents: &[VariableDescriptor],
        dependents: &[VariableDescriptor],
    ) -> Result<DatasetHandle> {
        let mut datasets = lock(&self.datasets);
        // Uniquify within the path, the way a data vault numbers duplicates.
        let mut resolved = name.to_string();
        let mut n = 1;
        while datasets.contains_key(&(path.to_string(), resolved.clone())) {
            n += 1;
            resolved = format!("{name} {n}");
        }
        datasets.insert(
            (path.to_string(), resolved.clone()),
            StoredDataset {
                columns: independents.len() + dependents.len(),
                rows: Vec::new(),
            },
        );
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(DatasetHandle {
            path: path.to_string(),
            name: resolved,
            independents: independents.to_vec(),
            dependents: dependents.to_vec(),
        })
    }

    async fn append(&self, handle: &DatasetHandle, row: &[f64]) -> Result<()> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = {
            let mut injected = lock(&self.injected);
            if injected.is_empty() {
                None
            } else {
                Some(injected.remove(0))
            }
        } {
            return Err(err);
        }
        let mut datasets = lock(&self.datasets);
        let dataset = datasets
            .get_mut(&(handle.path.clone(), handle.name.clone()))
            .ok_or_else(|| LoggerError::DatasetNotFound {
                name: handle.name.clone(),
            })?;
        if row.len() != dataset.columns {
            return Err(LoggerError::Store(format!(
                "row has {} values, dataset '{}' declares {} columns",
                row.len(),
                handle.name,
                dataset.columns
            )));
        }
        dataset.rows.push(row.to_vec());
        Ok(())
    }
}

// =============================================================================
// CsvStore
// =============================================================================

/// File-backed dataset store: one CSV file per dataset under a root
/// directory, with the declared schema as the header record.
///
/// Dataset loss is detected when the file has disappeared between appends.
pub struct CsvStore {
    root: PathBuf,
}

impl CsvStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_path(&self, path: &str, name: &str) -> PathBuf {
        self.root.join(path).join(format!("{name}.csv"))
    }
}

#[async_trait]
impl DatasetStore for CsvStore {
    async fn create(
        &self,
        path: &str,
        name: &str,
        independents: &[VariableDescriptor],
        dependents: &[VariableDescriptor],
    ) -> Result<DatasetHandle> {
        let dir = self.root.join(path);
        std::fs::create_dir_all(&dir)?;

        let mut resolved = name.to_string();
        let mut n = 1;
        while self.file_path(path, &resolved).exists() {
            n += 1;
            resolved = format!("{name} {n}");
        }
        let file = std::fs::File::create(self.file_path(path, &resolved))?;
        let mut writer = csv::Writer::from_writer(file);
        let header: Vec<String> = independents
            .iter()
            .chain(dependents.iter())
            .map(|v| v.to_string())
            .collect();
        writer
            .write_record(&header)
            .map_err(|e| LoggerError::Store(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| LoggerError::Store(e.to_string()))?;

        tracing::info!(path, name = %resolved, "Created dataset");
        Ok(DatasetHandle {
            path: path.to_string(),
            name: resolved,
            independents: independents.to_vec(),
            dependents: dependents.to_vec(),
        })
    }

    async fn append(&self, handle: &DatasetHandle, row: &[f64]) -> Result<()> {
        let file_path = self.file_path(&handle.path, &handle.name);
        if !file_path.exists() {
            return Err(LoggerError::DatasetNotFound {
                name: handle.name.clone(),
            });
        }
        let file = OpenOptions::new().append(true).open(&file_path)?;
        let mut writer = csv::Writer::from_writer(file);
        let record: Vec<String> = row.iter().map(f64::to_string).collect();
        writer
            .write_record(&record)
            .map_err(|e| LoggerError::Store(e.to_string()))?;
        writer
            .flush()
            .map_err(|e| LoggerError::Store(e.to_string()))?;
        Ok(())
    }
}
