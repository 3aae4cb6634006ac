//! End-to-end cycle behavior over simulated sources: row assembly, fault
//! isolation, dataset lifecycle, and loop control.

use dr_logger::error::LoggerError;
use dr_logger::session::Session;
use dr_logger::source::sim::{SimDiodeSource, SimGaugeSource, SimHub, SimThermometerSource};
use dr_logger::source::SourceHub;
use dr_logger::store::MemoryStore;
use dr_logger::watcher::{SourceKind, WatcherRegistry, WatcherSpec};
use std::sync::Arc;
use std::time::Duration;

fn empty_options() -> toml::Value {
    toml::Value::Table(toml::map::Map::new())
}

fn spec(kind: SourceKind, source: &str) -> WatcherSpec {
    WatcherSpec {
        kind,
        source: source.to_string(),
        node: "dr".to_string(),
        options: empty_options(),
    }
}

/// A hub with one gauge set (2 gauges), one diode array (8 channels), and
/// one ruox array (2 channels).
fn populated_hub() -> Arc<SimHub> {
    let hub = Arc::new(SimHub::new());
    hub.add_gauge_set(Arc::new(SimGaugeSource::new(
        "mks_gauge_server",
        &[("Still", "Torr", 1.2e-3), ("OVC", "Torr", 3.0e-6)],
    )));
    hub.add_diode_array(Arc::new(SimDiodeSource::new(
        "lakeshore_diodes",
        &[4.2, 4.5, 77.0, 3.0, 0.1, 0.8, 0.7, 1.5],
    )));
    hub.add_thermometer_array(Arc::new(SimThermometerSource::new(
        "lakeshore_ruox",
        &[("MC", 0.015, 2100.0), ("Still", 0.7, 310.0)],
    )));
    hub
}

fn session(hub: &Arc<SimHub>, store: &Arc<MemoryStore>) -> Session {
    let registry = WatcherRegistry::builtin();
    let hub: Arc<dyn SourceHub> = Arc::clone(hub) as Arc<dyn SourceHub>;
    let watchers = vec![
        registry
            .build(&spec(SourceKind::Gauges, "mks_gauge_server"), Arc::clone(&hub))
            .unwrap(),
        registry
            .build(&spec(SourceKind::Diodes, "lakeshore_diodes"), Arc::clone(&hub))
            .unwrap(),
        registry
            .build(&spec(SourceKind::Ruox, "lakeshore_ruox"), Arc::clone(&hub))
            .unwrap(),
    ];
    Session::new(
        "Ivan",
        "DR/Ivan",
        "Ivan log - [t]",
        Duration::from_millis(50),
        watchers,
        Arc::clone(store) as Arc<dyn dr_logger::store::DatasetStore>,
    )
}

#[tokio::test]
async fn full_cycle_appends_one_complete_row() {
    let hub = populated_hub();
    let store = Arc::new(MemoryStore::new());
    let session = session(&hub, &store);

    session.take_point().await;

    assert_eq!(store.create_count(), 1);
    let names = store.dataset_names("DR/Ivan");
    assert_eq!(names.len(), 1);
    let rows = store.rows("DR/Ivan", &names[0]).unwrap();
    assert_eq!(rows.len(), 1);
    // time + 2 gauges + 8 diodes + 2 ruox temperatures + 2 resistances
    assert_eq!(rows[0].len(), 15);
    assert!(session.errors().await.is_empty());
}

#[tokio::test]
async fn one_failing_source_blocks_the_whole_row() {
    let hub = populated_hub();
    let store = Arc::new(MemoryStore::new());
    let session = session(&hub, &store);

    session.take_point().await;
    assert_eq!(store.append_count(), 1);

    // re-register a scripted failure on the live source name
    let failing = Arc::new(SimDiodeSource::new("lakeshore_diodes", &[4.2; 8]));
    failing.inject_failure(LoggerError::Read {
        source_name: "lakeshore_diodes".into(),
        message: "timed out".into(),
    });
    hub.add_diode_array(Arc::clone(&failing));

    session.take_point().await;
    assert_eq!(store.append_count(), 1, "partial row must not be written");
    let errors = session.errors().await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].source, "lakeshore_diodes");

    // the failure was transient; next cycle is clean again
    session.take_point().await;
    assert_eq!(store.append_count(), 2);
    assert!(session.errors().await.is_empty());
}

#[tokio::test]
async fn disconnected_source_is_reported_until_it_returns() {
    let hub = populated_hub();
    let store = Arc::new(MemoryStore::new());
    let session = session(&hub, &store);

    session.take_point().await;
    hub.remove("lakeshore_ruox");

    session.take_point().await;
    let errors = session.errors().await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].source, "lakeshore_ruox");

    hub.add_thermometer_array(Arc::new(SimThermometerSource::new(
        "lakeshore_ruox",
        &[("MC", 0.015, 2100.0), ("Still", 0.7, 310.0)],
    )));
    session.take_point().await;
    assert!(session.errors().await.is_empty());
    assert_eq!(store.append_count(), 2);
}

#[tokio::test]
async fn deselected_device_is_reselected_within_the_cycle() {
    let hub = populated_hub();
    let gauges = Arc::new(
        SimGaugeSource::new(
            "mks_gauge_server",
            &[("Still", "Torr", 1.2e-3), ("OVC", "Torr", 3.0e-6)],
        )
        .with_devices(&["mks-670"])
        .require_selection(),
    );
    hub.add_gauge_set(Arc::clone(&gauges));
    let store = Arc::new(MemoryStore::new());
    let session = session(&hub, &store);

    session.take_point().await;
    assert!(session.errors().await.is_empty(), "reselect should recover");
    assert_eq!(gauges.selections(), vec![None]);
    assert_eq!(store.append_count(), 1);
}

#[tokio::test]
async fn lost_dataset_is_recreated_without_losing_the_row() {
    let hub = populated_hub();
    let store = Arc::new(MemoryStore::new());
    let session = session(&hub, &store);

    session.take_point().await;
    for name in store.dataset_names("DR/Ivan") {
        store.lose("DR/Ivan", &name);
    }

    session.take_point().await;
    assert_eq!(store.create_count(), 2);
    assert!(session.errors().await.is_empty());
    let names = store.dataset_names("DR/Ivan");
    assert_eq!(names.len(), 1);
    assert_eq!(store.rows("DR/Ivan", &names[0]).unwrap().len(), 1);
}

#[tokio::test]
async fn new_dataset_starts_a_fresh_dataset_under_a_distinct_name() {
    let hub = populated_hub();
    let store = Arc::new(MemoryStore::new());
    let session = session(&hub, &store);

    session.take_point().await;
    session.new_dataset().await;
    session.take_point().await;

    let names = store.dataset_names("DR/Ivan");
    assert_eq!(names.len(), 2);
    // same minute, so the second name is uniquified
    assert_ne!(names[0], names[1]);
}

#[tokio::test]
async fn stopping_the_loop_stops_appends() {
    let hub = populated_hub();
    let store = Arc::new(MemoryStore::new());
    let session = session(&hub, &store);

    session.logging(true).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    session.logging(false).await;
    assert!(!session.is_logging().await);

    let appended = store.append_count();
    assert!(appended >= 1);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(store.append_count(), appended, "no appends after stop");
    session.shutdown().await;
}
