//! Watchers: polymorphic proxies over remote instrument sources.
//!
//! A watcher normalizes one source's readings and variable descriptors for
//! the session, and owns the device-selection retry policy: when a read
//! fails because no hardware device is selected, the watcher selects one
//! (by configured name, by substring match, or the source default) and
//! retries the read exactly once. Any other failure propagates with the
//! source identity attached and aborts only that watcher's contribution to
//! the current cycle.

use crate::error::{LoggerError, Result};
use crate::measurement::{Reading, VariableDescriptor};
use crate::source::{InstrumentSource, SourceHub};
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod diodes;
pub mod gauges;
pub mod registry;
pub mod ruox;

pub use registry::{SourceKind, WatcherRegistry, WatcherSpec};

/// Proxy over one remote instrument source.
#[async_trait]
pub trait Watcher: Send + Sync {
    /// Name of the proxied source, as configured.
    fn source_name(&self) -> &str;

    /// Which kind of source this watcher reads.
    fn kind(&self) -> SourceKind;

    /// Whether the most recent `take_point` attempt succeeded.
    ///
    /// Diagnostic only; retry decisions never consult it.
    fn is_active(&self) -> bool;

    /// The variables this watcher logs, in the order `take_point` produces
    /// values. Called at dataset creation to declare the schema; idempotent.
    async fn get_variables(&self) -> Result<Vec<VariableDescriptor>>;

    /// Take one reading, with the embedded reselect-and-retry policy.
    async fn take_point(&self) -> Result<Reading>;
}

/// State and policy shared by every watcher kind: source identity, the
/// configured device name, the diagnostic `active` flag, and the hub the
/// source is resolved from on each read.
pub(crate) struct WatcherBase {
    source: String,
    device: Option<String>,
    active: AtomicBool,
    hub: Arc<dyn SourceHub>,
}

impl WatcherBase {
    pub(crate) fn new(source: String, device: Option<String>, hub: Arc<dyn SourceHub>) -> Self {
        Self {
            source,
            device,
            active: AtomicBool::new(false),
            hub,
        }
    }

    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn hub(&self) -> &Arc<dyn SourceHub> {
        &self.hub
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Turn a hub lookup result into the watcher's source proxy, surfacing a
    /// lookup miss as `SourceNotFound`.
    pub(crate) fn resolve<T>(&self, found: Option<T>) -> Result<T> {
        found.ok_or_else(|| {
            self.active.store(false, Ordering::SeqCst);
            LoggerError::SourceNotFound {
                source_name: self.source.clone(),
            }
        })
    }

    /// Run one read attempt with the reselect-retry policy, maintaining the
    /// `active` flag: a "device not selected" failure triggers device
    /// selection followed by exactly one more attempt; everything else
    /// propagates unretried.
    pub(crate) async fn run<S, T, F, Fut>(&self, source: &S, read: F) -> Result<T>
    where
        S: InstrumentSource + ?Sized,
        T: Send,
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        let outcome = match read().await {
            Err(err) if err.is_device_not_selected() => {
                tracing::debug!(source = %self.source, "No device selected, reselecting");
                match self.select_device(source).await {
                    Ok(()) => read().await,
                    Err(err) => Err(err),
                }
            }
            other => other,
        };
        self.active.store(outcome.is_ok(), Ordering::SeqCst);
        outcome
    }

    /// Select a hardware device on the source: the configured name when it
    /// is listed, else the first listed name containing it as a substring,
    /// else the source default when no name is configured.
    async fn select_device<S>(&self, source: &S) -> Result<()>
    where
        S: InstrumentSource + ?Sized,
    {
        let Some(wanted) = self.device.as_deref() else {
            return source.select_device(None).await;
        };
        let devices = source.device_names().await?;
        if devices.iter().any(|d| d == wanted) {
            return source.select_device(Some(wanted)).await;
        }
        if let Some(matched) = devices.iter().find(|d| d.contains(wanted)) {
            tracing::info!(source = %self.source, device = %matched, "Selecting device by substring match");
            return source.select_device(Some(matched)).await;
        }
        Err(LoggerError::NoSuchDevice {
            source_name: self.source.clone(),
            device: wanted.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::sim::{SimGaugeSource, SimHub};
    use crate::source::GaugeSource;

    fn hub() -> Arc<dyn SourceHub> {
        Arc::new(SimHub::new())
    }

    #[tokio::test]
    async fn successful_read_marks_active() {
        let source = SimGaugeSource::new("mks_gauge_server", &[("Still", "Torr", 1.0)]);
        let base = WatcherBase::new("mks_gauge_server".into(), None, hub());
        let source = Arc::new(source);
        let result = base
            .run(source.as_ref(), || {
                let source = Arc::clone(&source);
                async move { source.readings().await }
            })
            .await;
        assert!(result.is_ok());
        assert!(base.is_active());
    }

    #[tokio::test]
    async fn device_not_selected_triggers_one_reselect() {
        let source = Arc::new(
            SimGaugeSource::new("mks_gauge_server", &[("Still", "Torr", 1.0)])
                .with_devices(&["mks-a"])
                .require_selection(),
        );
        let base = WatcherBase::new("mks_gauge_server".into(), None, hub());
        let result = base
            .run(source.as_ref(), || {
                let source = Arc::clone(&source);
                async move { source.readings().await }
            })
            .await;
        assert!(result.is_ok());
        // one failed read, one selection, one successful retry
        assert_eq!(source.read_count(), 2);
        assert_eq!(source.selections(), vec![None]);
    }

    #[tokio::test]
    async fn second_not_selected_failure_is_surfaced() {
        let source = Arc::new(
            SimGaugeSource::new("mks_gauge_server", &[("Still", "Torr", 1.0)]).require_selection(),
        );
        // keep the retry failing too
        source.inject_failure(LoggerError::DeviceNotSelected {
            source_name: "mks_gauge_server".into(),
        });
        source.inject_failure(LoggerError::DeviceNotSelected {
            source_name: "mks_gauge_server".into(),
        });
        let base = WatcherBase::new("mks_gauge_server".into(), None, hub());
        let result = base
            .run(source.as_ref(), || {
                let source = Arc::clone(&source);
                async move { source.readings().await }
            })
            .await;
        assert!(matches!(
            result,
            Err(LoggerError::DeviceNotSelected { .. })
        ));
        assert_eq!(source.read_count(), 2);
        assert!(!base.is_active());
    }

    #[tokio::test]
    async fn configured_device_matched_by_substring() {
        let source = Arc::new(
            SimGaugeSource::new("mks_gauge_server", &[("Still", "Torr", 1.0)])
                .with_devices(&["node-dr mks-a", "node-dr mks-b"])
                .require_selection(),
        );
        let base = WatcherBase::new("mks_gauge_server".into(), Some("mks-b".into()), hub());
        base.run(source.as_ref(), || {
            let source = Arc::clone(&source);
            async move { source.readings().await }
        })
        .await
        .unwrap();
        assert_eq!(
            source.selections(),
            vec![Some("node-dr mks-b".to_string())]
        );
    }

    #[tokio::test]
    async fn unmatched_device_name_is_no_such_device() {
        let source = Arc::new(
            SimGaugeSource::new("mks_gauge_server", &[("Still", "Torr", 1.0)])
                .with_devices(&["mks-a"])
                .require_selection(),
        );
        let base = WatcherBase::new("mks_gauge_server".into(), Some("mks-z".into()), hub());
        let result = base
            .run(source.as_ref(), || {
                let source = Arc::clone(&source);
                async move { source.readings().await }
            })
            .await;
        assert!(matches!(result, Err(LoggerError::NoSuchDevice { .. })));
        assert!(!base.is_active());
    }
}
