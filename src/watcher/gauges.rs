//! Gauge-set watcher (MKS-style pressure gauges).
//!
//! Besides the raw gauge readings, a gauge set may declare one derived flow
//! channel computed as `multiplier * reading[channel]`, where the channel is
//! resolved once by name-matching the configured label against the set's
//! reported gauge names. If no gauge matches, the derived channel is
//! permanently disabled for this watcher's lifetime; that is logged, not
//! fatal.

use crate::error::{LoggerError, Result};
use crate::measurement::{Quantity, Reading, VariableDescriptor};
use crate::source::{GaugeSource, SourceHub};
use crate::watcher::{SourceKind, Watcher, WatcherBase, WatcherSpec};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Unit of the derived flow channel.
const FLOW_UNIT: &str = "L/h";

#[derive(Debug, Clone, Default, Deserialize)]
struct GaugeOptions {
    device: Option<String>,
    flow_channel: Option<String>,
    flow_multiplier: Option<f64>,
}

#[derive(Debug, Clone)]
struct FlowConfig {
    channel: String,
    multiplier: f64,
}

#[derive(Debug, Clone, Copy)]
struct FlowChannel {
    index: usize,
    multiplier: f64,
}

/// Watcher over one pressure gauge set.
pub struct GaugeSetWatcher {
    base: WatcherBase,
    flow: Option<FlowConfig>,
    // Resolved at most once; None means "configured but no matching gauge",
    // which disables the derived channel for good.
    resolved_flow: OnceCell<Option<FlowChannel>>,
}

/// Construct a gauge-set watcher from its spec. Registered in
/// [`WatcherRegistry::builtin`](crate::watcher::WatcherRegistry::builtin).
pub(crate) fn from_spec(spec: &WatcherSpec, hub: Arc<dyn SourceHub>) -> Result<Arc<dyn Watcher>> {
    let opts: GaugeOptions = spec.options.clone().try_into().map_err(|e| {
        LoggerError::Configuration(format!("invalid gauge options for '{}': {e}", spec.source))
    })?;
    let flow = match (opts.flow_channel, opts.flow_multiplier) {
        (Some(channel), Some(multiplier)) => Some(FlowConfig {
            channel,
            multiplier,
        }),
        (None, None) => None,
        _ => {
            return Err(LoggerError::Configuration(format!(
                "'{}': flow_channel and flow_multiplier must be configured together",
                spec.source
            )))
        }
    };
    Ok(Arc::new(GaugeSetWatcher {
        base: WatcherBase::new(spec.source.clone(), opts.device, hub),
        flow,
        resolved_flow: OnceCell::new(),
    }))
}

impl GaugeSetWatcher {
    fn source_proxy(&self) -> Result<Arc<dyn GaugeSource>> {
        self.base
            .resolve(self.base.hub().gauge_set(self.base.source()))
    }

    /// Resolve the derived flow channel, at most once. A transport failure
    /// leaves it unresolved for the next attempt; a missing gauge name
    /// disables it permanently.
    async fn flow_channel(&self, src: &Arc<dyn GaugeSource>) -> Result<Option<FlowChannel>> {
        let Some(cfg) = self.flow.as_ref() else {
            return Ok(None);
        };
        let resolved = self
            .resolved_flow
            .get_or_try_init(|| async {
                let names = src.gauge_names().await?;
                Ok::<_, LoggerError>(match names.iter().position(|n| n == &cfg.channel) {
                    Some(index) => {
                        tracing::info!(
                            source = %self.base.source(),
                            channel = %cfg.channel,
                            index,
                            multiplier = cfg.multiplier,
                            "Using gauge reading for derived flow channel"
                        );
                        Some(FlowChannel {
                            index,
                            multiplier: cfg.multiplier,
                        })
                    }
                    None => {
                        tracing::error!(
                            source = %self.base.source(),
                            channel = %cfg.channel,
                            "No gauge matches the configured flow channel; derived flow disabled"
                        );
                        None
                    }
                })
            })
            .await?;
        Ok(*resolved)
    }

    async fn read_once(&self, src: &Arc<dyn GaugeSource>) -> Result<Reading> {
        let mut readings = src.readings().await?;
        let flow = self.flow_channel(src).await?;
        if readings.is_empty() {
            return Err(LoggerError::NoData {
                source_name: self.base.source().to_string(),
            });
        }
        if let Some(fc) = flow {
            let gauge = readings.get(fc.index).ok_or_else(|| LoggerError::Read {
                source_name: self.base.source().to_string(),
                message: format!("flow channel index {} out of range", fc.index),
            })?;
            readings.push(Quantity::new(fc.multiplier * gauge.magnitude, FLOW_UNIT));
        }
        Ok(readings)
    }
}

#[async_trait]
impl Watcher for GaugeSetWatcher {
    fn source_name(&self) -> &str {
        self.base.source()
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Gauges
    }

    fn is_active(&self) -> bool {
        self.base.is_active()
    }

    async fn get_variables(&self) -> Result<Vec<VariableDescriptor>> {
        // One reading first: it resolves the flow channel and carries the
        // per-gauge units the schema needs.
        let point = self.take_point().await?;
        let src = self.source_proxy()?;
        let names = src.gauge_names().await?;
        let mut vars: Vec<VariableDescriptor> = names
            .iter()
            .zip(point.iter())
            .map(|(name, q)| VariableDescriptor::new(name.clone(), "Pressure", q.unit.clone()))
            .collect();
        if self.resolved_flow.get().copied().flatten().is_some() {
            vars.push(VariableDescriptor::new("He Flow", "LHe", FLOW_UNIT));
        }
        Ok(vars)
    }

    async fn take_point(&self) -> Result<Reading> {
        let src = self.source_proxy()?;
        self.base
            .run(src.as_ref(), || {
                let src = Arc::clone(&src);
                async move { self.read_once(&src).await }
            })
            .await
    }
}
