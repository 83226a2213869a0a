//! Round trip against a real PostgreSQL.
//!
//! Run with `DATABASE_URL=postgres://... cargo test -- --ignored`.

use chrono::Utc;
use monitor::db::{make_pool, PgReadingStore};
use monitor::model::{AlertType, DeviceHealth};
use monitor::report::compute_alert_reports;
use monitor::store::ReadingStore;
use tokio_util::sync::CancellationToken;

async fn seed(store: &PgReadingStore, serial: &str, temperatures: &[f64]) {
    sqlx::query("INSERT INTO devices (serial_number) VALUES ($1) ON CONFLICT DO NOTHING")
        .bind(serial)
        .execute(store.pool())
        .await
        .unwrap();

    for t in temperatures {
        sqlx::query(
            r#"
            INSERT INTO device_readings (
                device_serial_number, temperature, carbon_monoxide, humidity,
                health, recorded_date_time_utc
            ) VALUES ($1, $2, 1.0, 40.0, $3, $4)
            "#,
        )
        .bind(serial)
        .bind(t)
        .bind(DeviceHealth::Ok.as_str())
        .bind(Utc::now())
        .execute(store.pool())
        .await
        .unwrap();
    }
}

#[tokio::test]
#[ignore]
async fn test_select_commit_and_report() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgReadingStore::new(make_pool(&url, 2).await.unwrap());
    let serial = format!("it-{}", uuid::Uuid::new_v4());
    seed(&store, &serial, &[18.0, 122.5, 15.0]).await;

    let mut devices = store.devices_with_unprocessed_readings(1000).await.unwrap();
    let device = devices
        .iter_mut()
        .find(|d| d.serial_number == serial)
        .expect("seeded device selected");
    assert_eq!(device.readings.len(), 3);

    let processor = monitor::processor::Processor::new(Default::default());
    processor.handle(device, Utc::now());
    let device = device.clone();
    store.commit(&[device], &CancellationToken::new()).await.unwrap();

    let again = store.devices_with_unprocessed_readings(1000).await.unwrap();
    assert!(again.iter().all(|d| d.serial_number != serial));

    let reports = compute_alert_reports(&store, &serial, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].alert_type, AlertType::OutOfRangeTemp);
    assert_eq!(reports[0].min_value, 15.0);
    assert_eq!(reports[0].max_value, 122.5);
}

#[tokio::test]
#[ignore]
async fn test_canceled_commit_rolls_back() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgReadingStore::new(make_pool(&url, 2).await.unwrap());
    let serial = format!("it-{}", uuid::Uuid::new_v4());
    seed(&store, &serial, &[120.0]).await;

    let mut devices = store.devices_with_unprocessed_readings(1000).await.unwrap();
    devices.retain(|d| d.serial_number == serial);
    let processor = monitor::processor::Processor::new(Default::default());
    processor.handle(&mut devices[0], Utc::now());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = store.commit(&devices, &cancel).await;
    assert!(matches!(result, Err(monitor::errors::Error::Canceled)));

    let again = store.devices_with_unprocessed_readings(1000).await.unwrap();
    assert!(again.iter().any(|d| d.serial_number == serial));
}

#[tokio::test]
#[ignore]
async fn test_batch_orders_serials_bytewise() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgReadingStore::new(make_pool(&url, 2).await.unwrap());
    let prefix = format!("it-{}", uuid::Uuid::new_v4());
    let lower = format!("{}-a", prefix);
    let upper = format!("{}-B", prefix);
    seed(&store, &lower, &[20.0]).await;
    seed(&store, &upper, &[20.0]).await;

    let devices = store.devices_with_unprocessed_readings(100_000).await.unwrap();
    let seeded: Vec<&str> = devices
        .iter()
        .map(|d| d.serial_number.as_str())
        .filter(|s| s.starts_with(&prefix))
        .collect();

    assert_eq!(seeded, vec![upper.as_str(), lower.as_str()]);
}

#[tokio::test]
#[ignore]
async fn test_schema_rejects_unknown_health_and_state() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgReadingStore::new(make_pool(&url, 2).await.unwrap());
    let serial = format!("it-{}", uuid::Uuid::new_v4());
    seed(&store, &serial, &[]).await;

    let reading = sqlx::query(
        r#"
        INSERT INTO device_readings (
            device_serial_number, temperature, carbon_monoxide, humidity,
            health, recorded_date_time_utc
        ) VALUES ($1, 20.0, 1.0, 40.0, 'needs_filter', NOW())
        "#,
    )
    .bind(&serial)
    .execute(store.pool())
    .await;
    assert!(reading.is_err());

    let alert = sqlx::query(
        r#"
        INSERT INTO alerts (
            alert_id, device_serial_number, alert_type, alert_state, created_date_time_utc,
            reported_date_time_utc, last_reported_date_time_utc, message
        ) VALUES ($1, $2, 'OutOfRangeTemp', 'Snoozed', NOW(), NOW(), NOW(), 'x')
        "#,
    )
    .bind(uuid::Uuid::new_v4())
    .bind(&serial)
    .execute(store.pool())
    .await;
    assert!(alert.is_err());
}

#[tokio::test]
#[ignore]
async fn test_commit_keeps_alert_state_set_after_selection() {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let store = PgReadingStore::new(make_pool(&url, 2).await.unwrap());
    let serial = format!("it-{}", uuid::Uuid::new_v4());
    seed(&store, &serial, &[120.0]).await;

    let processor = monitor::processor::Processor::new(Default::default());
    let mut devices = store.devices_with_unprocessed_readings(100_000).await.unwrap();
    devices.retain(|d| d.serial_number == serial);
    processor.handle(&mut devices[0], Utc::now());
    store.commit(&devices, &CancellationToken::new()).await.unwrap();

    seed(&store, &serial, &[125.0]).await;
    let mut devices = store.devices_with_unprocessed_readings(100_000).await.unwrap();
    devices.retain(|d| d.serial_number == serial);
    sqlx::query("UPDATE alerts SET alert_state = 'Resolved' WHERE device_serial_number = $1")
        .bind(&serial)
        .execute(store.pool())
        .await
        .unwrap();
    processor.handle(&mut devices[0], Utc::now());
    store.commit(&devices, &CancellationToken::new()).await.unwrap();

    let reports = compute_alert_reports(&store, &serial, None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].alert_state, monitor::model::AlertState::Resolved);
}
