//! Integration tests for durable entity state and rehydration

use std::sync::Arc;
use std::time::Duration;

use health_trends::actors::service_monitor::MonitorState;
use health_trends::model::Status;
use health_trends::scheduler::HEALTH_CHECK_REMINDER;
use health_trends::storage::{EntityKey, EntityKind, MemoryBackend, StateStore};

use crate::helpers::{ScriptedProber, db_service, system_with, test_settings};

#[tokio::test]
async fn test_idle_monitor_is_rehydrated() {
    let store = Arc::new(MemoryBackend::new());
    let settings = health_trends::ActorSettings {
        idle_timeout: Duration::from_millis(100),
        ..test_settings()
    };
    let system = system_with(
        store.clone(),
        ScriptedProber::new([Status::Healthy, Status::Critical]),
        settings,
    );

    let monitor = system.monitor("db");
    monitor.register(db_service("db")).await.unwrap();
    monitor.probe().await.unwrap();
    monitor.probe().await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(system.live_entities().0, 0);

    // the next lookup activates a fresh actor from the stored document
    let monitor = system.monitor("db");
    assert_eq!(monitor.get_record_count().await.unwrap(), 2);
    let last = monitor.get_last_record().await.unwrap().unwrap();
    assert_eq!(last.status, Status::Critical);
    assert_eq!(monitor.get_configuration().await.unwrap(), Some(db_service("db")));

    system.shutdown().await;
}

#[tokio::test]
async fn test_register_persists_health_check_reminder() {
    let store = Arc::new(MemoryBackend::new());
    let system = system_with(store.clone(), ScriptedProber::default(), test_settings());

    system.monitor("db").register(db_service("db")).await.unwrap();

    let reminders = store.load_reminders().await.unwrap();
    let health_check = reminders
        .iter()
        .find(|r| r.key.kind == EntityKind::ServiceMonitor && r.name == HEALTH_CHECK_REMINDER)
        .expect("health check reminder");
    assert_eq!(health_check.key.id, "db");
    assert_eq!(health_check.period, Duration::from_secs(60));

    system.shutdown().await;
}

/// Records of the `db` monitor as currently written to `store`
async fn stored_records(store: &dyn StateStore) -> usize {
    store
        .load_state(&EntityKey::service_monitor("db"))
        .await
        .unwrap()
        .map_or(0, |row| row.decode::<MonitorState>().unwrap().records.len())
}

#[tokio::test]
async fn test_commands_at_idle_boundary_keep_every_record() {
    let store = Arc::new(MemoryBackend::new());
    let settings = health_trends::ActorSettings {
        idle_timeout: Duration::from_millis(30),
        ..test_settings()
    };
    let system = system_with(store.clone(), ScriptedProber::default(), settings);
    system.monitor("db").register(db_service("db")).await.unwrap();

    // each call lands shortly before, at, or after the deactivation
    let mut stored = 0;
    for i in 0..15u64 {
        if system.monitor("db").probe().await.is_ok() {
            stored += 1;
        }
        tokio::time::sleep(Duration::from_millis(25 + (i % 3) * 5)).await;
    }
    assert!(stored > 0);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(stored_records(store.as_ref()).await, stored);
    assert_eq!(system.monitor("db").get_record_count().await.unwrap(), stored);

    system.shutdown().await;
}

#[tokio::test]
async fn test_deferred_records_are_flushed_on_shutdown() {
    let store = Arc::new(MemoryBackend::new());
    let settings = health_trends::ActorSettings {
        state_flush_interval: Duration::from_secs(3600),
        ..test_settings()
    };
    let system = system_with(store.clone(), ScriptedProber::default(), settings);
    let monitor = system.monitor("db");
    monitor.register(db_service("db")).await.unwrap();

    for _ in 0..3 {
        monitor.probe().await.unwrap();
    }
    assert_eq!(monitor.get_record_count().await.unwrap(), 3);
    assert_eq!(stored_records(store.as_ref()).await, 0);

    system.shutdown().await;
    assert_eq!(stored_records(store.as_ref()).await, 3);
}

#[tokio::test]
async fn test_deferred_records_are_flushed_after_interval() {
    let store = Arc::new(MemoryBackend::new());
    let settings = health_trends::ActorSettings {
        state_flush_interval: Duration::from_millis(50),
        ..test_settings()
    };
    let system = system_with(store.clone(), ScriptedProber::default(), settings);
    let monitor = system.monitor("db");
    monitor.register(db_service("db")).await.unwrap();

    monitor.probe().await.unwrap();
    monitor.probe().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(stored_records(store.as_ref()).await, 2);

    system.shutdown().await;
}

#[cfg(feature = "storage-sqlite")]
#[tokio::test]
async fn test_state_survives_restart_with_sqlite() {
    use health_trends::storage::sqlite::SqliteBackend;
    use tempfile::tempdir;

    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("health.db");

    {
        let store = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        let system = system_with(store, ScriptedProber::new([Status::Healthy; 3]), test_settings());
        let monitor = system.monitor("db");
        monitor.register(db_service("db")).await.unwrap();
        for _ in 0..3 {
            monitor.probe().await.unwrap();
        }
        system.trend("db").calculate_trend(Duration::from_secs(3600)).await.unwrap();
        system.shutdown().await;
    }

    let store = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let system = system_with(store.clone(), ScriptedProber::default(), test_settings());

    let monitor = system.monitor("db");
    assert_eq!(monitor.get_record_count().await.unwrap(), 3);
    assert_eq!(monitor.get_configuration().await.unwrap(), Some(db_service("db")));

    let history = system.trend("db").get_trend_history(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].total_data_points, 3);

    assert!(!store.load_reminders().await.unwrap().is_empty());

    system.shutdown().await;
}
