//! Transport-facing traits for remote instrument sources.
//!
//! The logging engine treats the RPC transport and the instrument-specific
//! protocol adapters as external collaborators. This module defines the
//! narrow seam the engine needs from them: per-kind read operations plus
//! device listing/selection, and a connection hub to resolve a named source
//! at the moment of each read.
//!
//! Implementations are expected to surface a
//! [`LoggerError::DeviceNotSelected`](crate::error::LoggerError) when a read
//! is attempted with no hardware device selected; that is the one condition
//! the watcher layer recovers from by selecting a device and retrying once.

use crate::error::Result;
use crate::measurement::Quantity;
use async_trait::async_trait;
use std::sync::Arc;

pub mod sim;

/// Device listing and selection, common to every instrument source.
#[async_trait]
pub trait InstrumentSource: Send + Sync {
    /// Names of the hardware devices reachable through this source.
    async fn device_names(&self) -> Result<Vec<String>>;

    /// Select a device by exact name, or the source's default when `None`.
    async fn select_device(&self, name: Option<&str>) -> Result<()>;
}

/// A pressure gauge set (MKS-style).
#[async_trait]
pub trait GaugeSource: InstrumentSource {
    /// Current reading of every gauge, in gauge order.
    async fn readings(&self) -> Result<Vec<Quantity>>;

    /// Gauge names, in the same order as [`readings`](Self::readings).
    async fn gauge_names(&self) -> Result<Vec<String>>;
}

/// A silicon diode thermometer array with a fixed channel layout.
#[async_trait]
pub trait DiodeSource: InstrumentSource {
    /// Temperature of every diode channel, in channel order.
    async fn temperatures(&self) -> Result<Vec<Quantity>>;
}

/// One combined sweep of a resistance thermometer array.
#[derive(Clone, Debug)]
pub struct ThermometerSweep {
    /// Channel temperatures, in channel order.
    pub temperatures: Vec<Quantity>,
    /// Channel resistances, in the same channel order.
    pub resistances: Vec<Quantity>,
}

/// A ruthenium-oxide resistance thermometer array.
///
/// Temperatures and resistances are read in one combined request so the two
/// groups come from the same sweep.
#[async_trait]
pub trait ThermometerSource: InstrumentSource {
    /// Read temperatures and resistances together.
    async fn read_sweep(&self) -> Result<ThermometerSweep>;

    /// Channel names paired with their latest temperature.
    async fn named_temperatures(&self) -> Result<Vec<(String, Quantity)>>;

    /// Channel names paired with their latest resistance.
    async fn named_resistances(&self) -> Result<Vec<(String, Quantity)>>;
}

/// Connection registry mapping source names to live proxies.
///
/// Watchers resolve their source through the hub on every read, so a source
/// that reconnects under the same name is picked up without any watcher
/// state change. A lookup miss is reported by the watcher as
/// `SourceNotFound` and is never retried within the cycle.
pub trait SourceHub: Send + Sync {
    /// Resolve a gauge-set source by name.
    fn gauge_set(&self, name: &str) -> Option<Arc<dyn GaugeSource>>;

    /// Resolve a diode-array source by name.
    fn diode_array(&self, name: &str) -> Option<Arc<dyn DiodeSource>>;

    /// Resolve a resistance-thermometer source by name.
    fn thermometer_array(&self, name: &str) -> Option<Arc<dyn ThermometerSource>>;

    /// Whether the named node hosting a source is currently reachable.
    /// Used at session discovery to skip rigs with missing nodes.
    fn node_online(&self, node: &str) -> bool;
}
