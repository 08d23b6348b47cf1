//! Integration tests for durable reminders driving the actors

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use health_trends::scheduler::{HEALTH_CHECK_REMINDER, Scheduler};
use health_trends::storage::{EntityKey, MemoryBackend, ReminderRow, StateStore};

use crate::helpers::{ScriptedProber, db_service, seed_monitor, system_with, test_settings};

#[tokio::test]
async fn test_past_due_reminder_fires_after_restart() {
    let store = Arc::new(MemoryBackend::new());
    seed_monitor(store.as_ref(), db_service("db"), Vec::new()).await;
    store
        .save_reminder(ReminderRow {
            key: EntityKey::service_monitor("db"),
            name: HEALTH_CHECK_REMINDER.to_string(),
            due_at: Utc::now() - chrono::Duration::hours(1),
            period: Duration::from_secs(60),
        })
        .await
        .unwrap();

    let system = system_with(store.clone(), ScriptedProber::default(), test_settings());
    let mut events = system.subscribe();
    system.start().await.unwrap();
    assert_eq!(system.scheduler().armed_count(), 1);

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("reminder did not fire")
        .unwrap();
    assert_eq!(event.service_id, "db");
    assert_eq!(system.monitor("db").get_record_count().await.unwrap(), 1);

    // the next due time moved past the firing
    tokio::time::sleep(Duration::from_millis(50)).await;
    let reminders = store.load_reminders().await.unwrap();
    assert!(reminders[0].due_at > Utc::now() - chrono::Duration::seconds(5));

    system.shutdown().await;
}

#[tokio::test]
async fn test_unregistered_reminder_stops_firing() {
    let store = Arc::new(MemoryBackend::new());
    let system = system_with(store.clone(), ScriptedProber::default(), test_settings());
    system.start().await.unwrap();

    let key = EntityKey::service_monitor("db");
    system
        .scheduler()
        .register_or_update(ReminderRow {
            key: key.clone(),
            name: HEALTH_CHECK_REMINDER.to_string(),
            due_at: Utc::now() + chrono::Duration::hours(1),
            period: Duration::from_secs(60),
        })
        .await
        .unwrap();
    assert_eq!(system.scheduler().armed_count(), 1);

    system.scheduler().unregister(&key, HEALTH_CHECK_REMINDER).await.unwrap();
    assert_eq!(system.scheduler().armed_count(), 0);
    assert!(store.load_reminders().await.unwrap().is_empty());

    system.shutdown().await;
}
