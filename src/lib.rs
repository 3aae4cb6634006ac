//! # DR Logger Core Library
//!
//! This crate is the core library for the `dr-logger` application: a
//! periodic instrument-polling daemon for dilution refrigerators. It polls
//! a set of instrument sources on a fixed interval, merges each sweep into
//! one timestamped row, and appends the row to a dataset store, keeping the
//! system running through instrument dropouts and store hiccups.
//!
//! ## Crate Structure
//!
//! - **`command`**: Serializable operational commands over a running session
//!   and their dispatcher.
//! - **`config`**: Figment-based configuration loading (TOML file +
//!   environment overrides) and validation.
//! - **`error`**: The central `LoggerError` enum used across the crate.
//! - **`logging`**: Structured logging setup on `tracing`.
//! - **`measurement`**: Unit-tagged quantities, variable descriptors, and
//!   row flattening.
//! - **`scheduler`**: Fixed-interval, non-overlapping repeating-action
//!   driver.
//! - **`session`**: The aggregator: one poll/merge/persist cycle per tick,
//!   dataset lifecycle, fault isolation, and rig discovery.
//! - **`source`**: Typed async traits for instrument sources and the
//!   connection hub, plus in-process simulators for tests and demos.
//! - **`store`**: Append-only dataset store trait with in-memory and CSV
//!   backends.
//! - **`watcher`**: Per-source watchers (gauges, diodes, ruox) with the
//!   shared connect/reselect/retry policy, and their registry.

pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod measurement;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod store;
pub mod watcher;
