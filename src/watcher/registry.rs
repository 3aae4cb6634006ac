//! Static registry mapping source kinds to watcher constructors.
//!
//! The set of watcher kinds is finite and closed, so the registry is built
//! once at startup from the built-in constructors and passed into session
//! discovery; there is no open-ended dynamic dispatch by class name.

use crate::error::{LoggerError, Result};
use crate::source::SourceHub;
use crate::watcher::{diodes, gauges, ruox, Watcher};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// The kinds of instrument source the logger knows how to watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// MKS-style pressure gauge set, optionally with a derived flow channel.
    #[serde(alias = "mks")]
    Gauges,
    /// Silicon diode thermometer array with a fixed channel layout.
    Diodes,
    /// Ruthenium-oxide resistance thermometer array.
    Ruox,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SourceKind::Gauges => "gauges",
            SourceKind::Diodes => "diodes",
            SourceKind::Ruox => "ruox",
        };
        f.write_str(s)
    }
}

fn empty_options() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

/// One watcher's configuration: which kind of source to watch, the source's
/// name in the connection hub, the node hosting it, and an open option bag
/// interpreted by the matching watcher kind.
///
/// Immutable once a session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherSpec {
    /// Source kind, resolved against the registry.
    pub kind: SourceKind,
    /// Source name in the connection hub (e.g. "mks_gauge_server").
    pub source: String,
    /// Node hosting the source; the rig is skipped if it is unreachable.
    pub node: String,
    /// Kind-specific options (e.g. device name, flow channel + multiplier).
    #[serde(default = "empty_options")]
    pub options: toml::Value,
}

type Constructor = fn(&WatcherSpec, Arc<dyn SourceHub>) -> Result<Arc<dyn Watcher>>;

/// Registry of watcher constructors, keyed by source kind.
pub struct WatcherRegistry {
    constructors: HashMap<SourceKind, Constructor>,
}

impl WatcherRegistry {
    /// Registry holding every built-in watcher kind.
    pub fn builtin() -> Self {
        let mut constructors: HashMap<SourceKind, Constructor> = HashMap::new();
        constructors.insert(SourceKind::Gauges, gauges::from_spec);
        constructors.insert(SourceKind::Diodes, diodes::from_spec);
        constructors.insert(SourceKind::Ruox, ruox::from_spec);
        Self { constructors }
    }

    /// Whether a constructor is registered for `kind`.
    pub fn contains(&self, kind: SourceKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Instantiate a watcher for `spec`.
    pub fn build(&self, spec: &WatcherSpec, hub: Arc<dyn SourceHub>) -> Result<Arc<dyn Watcher>> {
        let ctor = self.constructors.get(&spec.kind).ok_or_else(|| {
            LoggerError::Configuration(format!("no watcher registered for kind '{}'", spec.kind))
        })?;
        ctor(spec, hub)
    }
}

impl Default for WatcherRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
