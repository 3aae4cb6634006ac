//! Diode-array watcher.
//!
//! The diode array has a fixed, statically known channel layout, so no
//! dynamic variable discovery is needed: `get_variables` never touches the
//! source.

use crate::error::{LoggerError, Result};
use crate::measurement::{Reading, VariableDescriptor};
use crate::source::{DiodeSource, SourceHub};
use crate::watcher::{SourceKind, Watcher, WatcherBase, WatcherSpec};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Channel labels of the diode array, in reading order.
pub const DIODE_CHANNELS: [&str; 8] = ["4Kin", "4Kout", "77K", "Ret", "Mix", "Xchg", "Still", "Pot"];

#[derive(Debug, Clone, Default, Deserialize)]
struct DiodeOptions {
    device: Option<String>,
}

/// Watcher over one silicon diode thermometer array.
pub struct DiodeArrayWatcher {
    base: WatcherBase,
}

/// Construct a diode-array watcher from its spec.
pub(crate) fn from_spec(spec: &WatcherSpec, hub: Arc<dyn SourceHub>) -> Result<Arc<dyn Watcher>> {
    let opts: DiodeOptions = spec.options.clone().try_into().map_err(|e| {
        LoggerError::Configuration(format!("invalid diode options for '{}': {e}", spec.source))
    })?;
    Ok(Arc::new(DiodeArrayWatcher {
        base: WatcherBase::new(spec.source.clone(), opts.device, hub),
    }))
}

#[async_trait]
impl Watcher for DiodeArrayWatcher {
    fn source_name(&self) -> &str {
        self.base.source()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Diodes
    }

    fn is_active(&self) -> bool {
        self.base.is_active()
    }

    async fn get_variables(&self) -> Result<Vec<VariableDescriptor>> {
        Ok(DIODE_CHANNELS
            .iter()
            .map(|channel| VariableDescriptor::new(*channel, "Diode", "K"))
            .collect())
    }

    async fn take_point(&self) -> Result<Reading> {
        let src = self
            .base
            .resolve(self.base.hub().diode_array(self.base.source()))?;
        self.base
            .run(src.as_ref(), || {
                let src = Arc::clone(&src);
                async move { src.temperatures().await }
            })
            .await
    }
}
