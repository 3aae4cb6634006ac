//! Core measurement data types for the logging pipeline.
//!
//! Values travel through the poll/merge pipeline as explicit
//! (magnitude, unit) pairs and are stripped to plain numbers only at the
//! point a row is handed to the store.

use serde::{Deserialize, Serialize};

/// A single measured value carrying its own unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    /// Numeric magnitude, expressed in `unit`.
    pub magnitude: f64,
    /// Unit label (e.g. "K", "Torr", "L/h").
    pub unit: String,
}

impl Quantity {
    /// Create a quantity from a magnitude and unit label.
    pub fn new(magnitude: f64, unit: impl Into<String>) -> Self {
        Self {
            magnitude,
            unit: unit.into(),
        }
    }

    /// Strip the unit, yielding the magnitude in the value's own unit.
    ///
    /// Pure and total: every quantity converts to itself.
    pub fn strip(&self) -> f64 {
        self.magnitude
    }
}

/// One reading from a watcher: ordered values, one per declared variable.
pub type Reading = Vec<Quantity>;

/// Schema entry for one logged variable.
///
/// Order is significant and must match the order the owning watcher
/// produces values in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    /// Channel label (e.g. "Still", "He Flow").
    pub label: String,
    /// Legend/category (e.g. "Diode", "Pressure", "Ruox").
    pub category: String,
    /// Unit label.
    pub unit: String,
}

impl VariableDescriptor {
    /// Create a descriptor from label, category, and unit.
    pub fn new(
        label: impl Into<String>,
        category: impl Into<String>,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            category: category.into(),
            unit: unit.into(),
        }
    }
}

impl std::fmt::Display for VariableDescriptor {
    /// Renders as `"label (category) [unit]"`, the form the dataset store
    /// expects for schema declaration. The category is omitted when empty,
    /// as for the `time [s]` independent variable.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.category.is_empty() {
            write!(f, "{} [{}]", self.label, self.unit)
        } else {
            write!(f, "{} ({}) [{}]", self.label, self.category, self.unit)
        }
    }
}

/// Flatten a timestamp plus per-watcher readings into one plain numeric row,
/// stripping each value's unit individually.
pub fn flatten_row(timestamp: &Quantity, readings: &[Reading]) -> Vec<f64> {
    let mut row = Vec::with_capacity(1 + readings.iter().map(Vec::len).sum::<usize>());
    row.push(timestamp.strip());
    for reading in readings {
        row.extend(reading.iter().map(Quantity::strip));
    }
    row
}
