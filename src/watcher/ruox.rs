//! Resistance-thermometer-array watcher (ruthenium oxide).
//!
//! Temperatures and resistances come back from one combined sweep and are
//! reported as two variable groups. The array's channel names are only
//! known to the source, so `get_variables` performs one reading first to
//! make sure the connection is up before asking for them.

use crate::error::{LoggerError, Result};
use crate::measurement::{Reading, VariableDescriptor};
use crate::source::{SourceHub, ThermometerSource};
use crate::watcher::{SourceKind, Watcher, WatcherBase, WatcherSpec};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Deserialize)]
struct RuoxOptions {
    device: Option<String>,
}

/// Watcher over one ruthenium-oxide resistance thermometer array.
pub struct RuoxWatcher {
    base: WatcherBase,
}

/// Construct a ruox watcher from its spec.
pub(crate) fn from_spec(spec: &WatcherSpec, hub: Arc<dyn SourceHub>) -> Result<Arc<dyn Watcher>> {
    let opts: RuoxOptions = spec.options.clone().try_into().map_err(|e| {
        LoggerError::Configuration(format!("invalid ruox options for '{}': {e}", spec.source))
    })?;
    Ok(Arc::new(RuoxWatcher {
        base: WatcherBase::new(spec.source.clone(), opts.device, hub),
    }))
}

impl RuoxWatcher {
    fn source_proxy(&self) -> Result<Arc<dyn ThermometerSource>> {
        self.base
            .resolve(self.base.hub().thermometer_array(self.base.source()))
    }
}

#[async_trait]
impl Watcher for RuoxWatcher {
    fn source_name(&self) -> &str {
        self.base.source()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Ruox
    }

    fn is_active(&self) -> bool {
        self.base.is_active()
    }

    async fn get_variables(&self) -> Result<Vec<VariableDescriptor>> {
        // Make sure we are connected before asking for channel names.
        self.take_point().await?;
        let src = self.source_proxy()?;
        let mut vars: Vec<VariableDescriptor> = src
            .named_temperatures()
            .await?
            .into_iter()
            .map(|(name, q)| VariableDescriptor::new(name, "Ruox", q.unit))
            .collect();
        vars.extend(
            src.named_resistances()
                .await?
                .into_iter()
                .map(|(name, q)| VariableDescriptor::new(name, "Ruox Res", q.unit)),
        );
        Ok(vars)
    }

    async fn take_point(&self) -> Result<Reading> {
        let src = self.source_proxy()?;
        self.base
            .run(src.as_ref(), || {
                let src = Arc::clone(&src);
                async move {
                    let sweep = src.read_sweep().await?;
                    let mut reading = sweep.temperatures;
                    reading.extend(sweep.resistances);
                    Ok(reading)
                }
            })
            .await
    }
}
