//! Simulated instrument sources.
//!
//! Provides in-process implementations of the source traits for testing and
//! for running the daemon without physical hardware. Readings are generated
//! around configurable baselines with a little random jitter; failures can
//! be scripted per source to exercise the engine's retry and error paths.

use crate::error::{LoggerError, Result};
use crate::measurement::Quantity;
use crate::source::{
    DiodeSource, GaugeSource, InstrumentSource, SourceHub, ThermometerSource, ThermometerSweep,
};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

fn jittered(base: f64) -> f64 {
    base * (1.0 + rand::thread_rng().gen_range(-0.01..0.01))
}

/// Shared scripting state: selection tracking plus a queue of injected
/// failures returned by upcoming reads.
struct SimState {
    devices: Vec<String>,
    selected: Option<String>,
    require_selection: bool,
    injected: VecDeque<LoggerError>,
    selections: Vec<Option<String>>,
}

impl SimState {
    fn new(devices: Vec<String>) -> Self {
        Self {
            devices,
            selected: None,
            require_selection: false,
            injected: VecDeque::new(),
            selections: Vec::new(),
        }
    }

    fn check_read(&mut self, source: &str) -> Result<()> {
        if let Some(err) = self.injected.pop_front() {
            return Err(err);
        }
        if self.require_selection && self.selected.is_none() {
            return Err(LoggerError::DeviceNotSelected {
                source_name: source.to_string(),
            });
        }
        Ok(())
    }

    fn select(&mut self, source: &str, name: Option<&str>) -> Result<()> {
        self.selections.push(name.map(str::to_string));
        match name {
            Some(n) => {
                if self.devices.iter().any(|d| d == n) {
                    self.selected = Some(n.to_string());
                    Ok(())
                } else {
                    Err(LoggerError::Read {
                        source_name: source.to_string(),
                        message: format!("cannot select unknown device '{n}'"),
                    })
                }
            }
            None => {
                self.selected = Some(
                    self.devices
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "default".to_string()),
                );
                Ok(())
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// SimGaugeSource - Simulated pressure gauge set
// =============================================================================

/// Simulated MKS-style gauge set.
///
/// Gauges are (label, unit, baseline) triples; readings carry each gauge's
/// own unit. Can be scripted to return an empty reading set or to require
/// device selection before reads succeed.
pub struct SimGaugeSource {
    name: String,
    gauges: Vec<(String, String, f64)>,
    state: Mutex<SimState>,
    empty: Mutex<bool>,
    reads: AtomicUsize,
}

impl SimGaugeSource {
    /// Create a gauge set with `(label, unit, baseline)` gauges.
    pub fn new(name: impl Into<String>, gauges: &[(&str, &str, f64)]) -> Self {
        Self {
            name: name.into(),
            gauges: gauges
                .iter()
                .map(|(l, u, b)| (l.to_string(), u.to_string(), *b))
                .collect(),
            state: Mutex::new(SimState::new(Vec::new())),
            empty: Mutex::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    /// Set the device names this source reports.
    pub fn with_devices(self, devices: &[&str]) -> Self {
        lock(&self.state).devices = devices.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Make reads fail with `DeviceNotSelected` until a device is selected.
    pub fn require_selection(self) -> Self {
        lock(&self.state).require_selection = true;
        self
    }

    /// Queue an error to be returned by the next read.
    pub fn inject_failure(&self, err: LoggerError) {
        lock(&self.state).injected.push_back(err);
    }

    /// When set, `readings` returns an empty vector.
    pub fn set_empty(&self, empty: bool) {
        *lock(&self.empty) = empty;
    }

    /// Number of completed read attempts (including failed ones).
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Device arguments passed to `select_device`, in call order.
    pub fn selections(&self) -> Vec<Option<String>> {
        lock(&self.state).selections.clone()
    }
}

#[async_trait]
impl InstrumentSource for SimGaugeSource {
    async fn device_names(&self) -> Result<Vec<String>> {
        Ok(lock(&self.state).devices.clone())
    }

    async fn select_device(&self, name: Option<&str>) -> Result<()> {
        lock(&self.state).select(&self.name, name)
    }
}

#[async_trait]
impl GaugeSource for SimGaugeSource {
    async fn readings(&self) -> Result<Vec<Quantity>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        lock(&self.state).check_read(&self.name)?;
        if *lock(&self.empty) {
            return Ok(Vec::new());
        }
        Ok(self
            .gauges
            .iter()
            .map(|(_, unit, base)| Quantity::new(jittered(*base), unit.clone()))
            .collect())
    }

    async fn gauge_names(&self) -> Result<Vec<String>> {
        Ok(self.gauges.iter().map(|(l, _, _)| l.clone()).collect())
    }
}

// =============================================================================
// SimDiodeSource - Simulated diode thermometer array
// =============================================================================

/// Simulated silicon diode array reading a fixed number of channels in
/// kelvin.
pub struct SimDiodeSource {
    name: String,
    baselines: Vec<f64>,
    state: Mutex<SimState>,
    reads: AtomicUsize,
}

impl SimDiodeSource {
    /// Create a diode array with one baseline temperature per channel.
    pub fn new(name: impl Into<String>, baselines: &[f64]) -> Self {
        Self {
            name: name.into(),
            baselines: baselines.to_vec(),
            state: Mutex::new(SimState::new(Vec::new())),
            reads: AtomicUsize::new(0),
        }
    }

    /// Queue an error to be returned by the next read.
    pub fn inject_failure(&self, err: LoggerError) {
        lock(&self.state).injected.push_back(err);
    }

    /// Number of completed read attempts (including failed ones).
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstrumentSource for SimDiodeSource {
    async fn device_names(&self) -> Result<Vec<String>> {
        Ok(lock(&self.state).devices.clone())
    }

    async fn select_device(&self, name: Option<&str>) -> Result<()> {
        lock(&self.state).select(&self.name, name)
    }
}

#[async_trait]
impl DiodeSource for SimDiodeSource {
    async fn temperatures(&self) -> Result<Vec<Quantity>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        lock(&self.state).check_read(&self.name)?;
        Ok(self
            .baselines
            .iter()
            .map(|base| Quantity::new(jittered(*base), "K"))
            .collect())
    }
}

// =============================================================================
// SimThermometerSource - Simulated ruox thermometer array
// =============================================================================

/// Simulated ruthenium-oxide array with named channels; each sweep produces
/// a temperature (K) and a resistance (Ohm) per channel.
pub struct SimThermometerSource {
    name: String,
    channels: Vec<(String, f64, f64)>,
    state: Mutex<SimState>,
    reads: AtomicUsize,
}

impl SimThermometerSource {
    /// Create an array with `(channel, temperature, resistance)` baselines.
    pub fn new(name: impl Into<String>, channels: &[(&str, f64, f64)]) -> Self {
        Self {
            name: name.into(),
            channels: channels
                .iter()
                .map(|(c, t, r)| (c.to_string(), *t, *r))
                .collect(),
            state: Mutex::new(SimState::new(Vec::new())),
            reads: AtomicUsize::new(0),
        }
    }

    /// Queue an error to be returned by the next sweep.
    pub fn inject_failure(&self, err: LoggerError) {
        lock(&self.state).injected.push_back(err);
    }

    /// Number of completed sweep attempts (including failed ones).
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InstrumentSource for SimThermometerSource {
    async fn device_names(&self) -> Result<Vec<String>> {
        Ok(lock(&self.state).devices.clone())
    }

    async fn select_device(&self, name: Option<&str>) -> Result<()> {
        lock(&self.state).select(&self.name, name)
    }
}

#[async_trait]
impl ThermometerSource for SimThermometerSource {
    async fn read_sweep(&self) -> Result<ThermometerSweep> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        lock(&self.state).check_read(&self.name)?;
        Ok(ThermometerSweep {
            temperatures: self
                .channels
                .iter()
                .map(|(_, t, _)| Quantity::new(jittered(*t), "K"))
                .collect(),
            resistances: self
                .channels
                .iter()
                .map(|(_, _, r)| Quantity::new(jittered(*r), "Ohm"))
                .collect(),
        })
    }

    async fn named_temperatures(&self) -> Result<Vec<(String, Quantity)>> {
        Ok(self
            .channels
            .iter()
            .map(|(c, t, _)| (c.clone(), Quantity::new(*t, "K")))
            .collect())
    }

    async fn named_resistances(&self) -> Result<Vec<(String, Quantity)>> {
        Ok(self
            .channels
            .iter()
            .map(|(c, _, r)| (c.clone(), Quantity::new(*r, "Ohm")))
            .collect())
    }
}

// =============================================================================
// SimHub - Simulated connection registry
// =============================================================================

/// In-process connection hub over simulated sources.
///
/// Sources can be added and removed while sessions are live, to simulate a
/// source disconnecting and reconnecting under the same name.
#[derive(Default)]
pub struct SimHub {
    gauges: RwLock<HashMap<String, Arc<SimGaugeSource>>>,
    diodes: RwLock<HashMap<String, Arc<SimDiodeSource>>>,
    thermometers: RwLock<HashMap<String, Arc<SimThermometerSource>>>,
    offline_nodes: RwLock<HashSet<String>>,
}

fn read<T>(m: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    m.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(m: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    m.write().unwrap_or_else(PoisonError::into_inner)
}

impl SimHub {
    /// Create an empty hub with every node considered online.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a gauge-set source under its name.
    pub fn add_gauge_set(&self, source: Arc<SimGaugeSource>) {
        write(&self.gauges).insert(source.name.clone(), source);
    }

    /// Register a diode-array source under its name.
    pub fn add_diode_array(&self, source: Arc<SimDiodeSource>) {
        write(&self.diodes).insert(source.name.clone(), source);
    }

    /// Register a thermometer-array source under its name.
    pub fn add_thermometer_array(&self, source: Arc<SimThermometerSource>) {
        write(&self.thermometers).insert(source.name.clone(), source);
    }

    /// Remove a source of any kind, simulating a disconnect.
    pub fn remove(&self, name: &str) {
        write(&self.gauges).remove(name);
        write(&self.diodes).remove(name);
        write(&self.thermometers).remove(name);
    }

    /// Mark a node as offline or online.
    pub fn set_node_online(&self, node: &str, online: bool) {
        if online {
            write(&self.offline_nodes).remove(node);
        } else {
            write(&self.offline_nodes).insert(node.to_string());
        }
    }
}

impl SourceHub for SimHub {
    fn gauge_set(&self, name: &str) -> Option<Arc<dyn GaugeSource>> {
        read(&self.gauges)
            .get(name)
            .cloned()
            .map(|s| s as Arc<dyn GaugeSource>)
    }

    fn diode_array(&self, name: &str) -> Option<Arc<dyn DiodeSource>> {
        read(&self.diodes)
            .get(name)
            .cloned()
            .map(|s| s as Arc<dyn DiodeSource>)
    }

    fn thermometer_array(&self, name: &str) -> Option<Arc<dyn ThermometerSource>> {
        read(&self.thermometers)
            .get(name)
            .cloned()
            .map(|s| s as Arc<dyn ThermometerSource>)
    }

    fn node_online(&self, node: &str) -> bool {
        !read(&self.offline_nodes).contains(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gauge_readings_match_declared_gauges() {
        let source = SimGaugeSource::new(
            "mks_gauge_server",
            &[("Still", "Torr", 1.0e-3), ("OVC", "Torr", 1.0e-6)],
        );
        let readings = source.readings().await.unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].unit, "Torr");
        assert_eq!(
            source.gauge_names().await.unwrap(),
            vec!["Still".to_string(), "OVC".to_string()]
        );
    }

    #[tokio::test]
    async fn injected_failure_is_returned_once() {
        let source = SimDiodeSource::new("lakeshore_diodes", &[4.2]);
        source.inject_failure(LoggerError::Read {
            source_name: "lakeshore_diodes".into(),
            message: "timeout".into(),
        });
        assert!(source.temperatures().await.is_err());
        assert!(source.temperatures().await.is_ok());
    }

    #[tokio::test]
    async fn selection_required_until_selected() {
        let source = SimGaugeSource::new("mks_gauge_server", &[("Still", "Torr", 1.0)])
            .with_devices(&["mks-a"])
            .require_selection();
        assert!(matches!(
            source.readings().await,
            Err(LoggerError::DeviceNotSelected { .. })
        ));
        source.select_device(Some("mks-a")).await.unwrap();
        assert!(source.readings().await.is_ok());
    }

    #[tokio::test]
    async fn hub_lookup_and_removal() {
        let hub = SimHub::new();
        hub.add_diode_array(Arc::new(SimDiodeSource::new("lakeshore_diodes", &[4.2])));
        assert!(hub.diode_array("lakeshore_diodes").is_some());
        hub.remove("lakeshore_diodes");
        assert!(hub.diode_array("lakeshore_diodes").is_none());
    }

    #[test]
    fn nodes_default_online() {
        let hub = SimHub::new();
        assert!(hub.node_online("dr"));
        hub.set_node_online("dr", false);
        assert!(!hub.node_online("dr"));
    }
}
