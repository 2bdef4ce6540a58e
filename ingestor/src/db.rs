use crate::errors::{Error, Result};
use crate::metrics::DB_FAILURES_TOTAL;
use crate::model::{Entry, KindRecord, PersistMode, SensorGroup};
use crate::pipeline::KindStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Executor, Postgres};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MAX_ATTEMPTS: u32 = 5;

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Retries `op` with exponential backoff while it fails with a transient
/// database error.
async fn with_retry<F, Fut>(what: &str, mut op: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut attempts = 0;

    loop {
        attempts += 1;
        match op().await {
            Ok(()) => return Ok(()),
            Err(Error::Database(db_err))
                if attempts < MAX_ATTEMPTS && is_transient_error(&db_err) =>
            {
                let wait_ms = 100 * 2_u64.pow(attempts - 1).min(32);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {}ms: {}",
                    what, attempts, MAX_ATTEMPTS, wait_ms, db_err
                );
                DB_FAILURES_TOTAL.inc();
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
            Err(e) => {
                error!("{} failed permanently after {} attempts: {}", what, attempts, e);
                return Err(e);
            }
        }
    }
}

/// Appends a batch of entries to the raw archive.
pub async fn insert_archive_batch(pool: &PgPool, batch: &[Entry]) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }

    with_retry("Archive insert", move || insert_archive_inner(pool, batch)).await
}

async fn insert_archive_inner(pool: &PgPool, batch: &[Entry]) -> Result<()> {
    let timestamps: Vec<_> = batch.iter().map(|e| e.timestamp).collect();
    let device_ids: Vec<&str> = batch.iter().map(|e| e.device_id.as_str()).collect();
    let device_types: Vec<&str> = batch.iter().map(|e| e.device_type.as_str()).collect();
    let sequences: Vec<Option<i64>> = batch.iter().map(|e| e.sequence).collect();
    let payloads: Vec<&str> = batch.iter().map(|e| e.raw_payload.as_str()).collect();
    let decoded = batch
        .iter()
        .map(|e| serde_json::to_string(&e.decoded))
        .collect::<std::result::Result<Vec<String>, _>>()?;
    let groups: Vec<&str> = batch.iter().map(|e| e.sensor_group.as_str()).collect();
    let received: Vec<_> = batch.iter().map(|e| e.received_at).collect();

    let query = r#"
        INSERT INTO sigfox_raw
            (timestamp, device_id, device_type, sequence, raw_payload, decoded, sensor_group, received_at)
        SELECT t.ts, t.device_id, t.device_type, t.sequence, t.raw_payload, t.decoded::jsonb, t.sensor_group, t.received_at
        FROM UNNEST($1::timestamptz[], $2::text[], $3::text[], $4::int8[], $5::text[], $6::text[], $7::text[], $8::timestamptz[])
            AS t(ts, device_id, device_type, sequence, raw_payload, decoded, sensor_group, received_at)
        "#;

    sqlx::query(query)
        .bind(&timestamps)
        .bind(&device_ids)
        .bind(&device_types)
        .bind(&sequences)
        .bind(&payloads)
        .bind(&decoded)
        .bind(&groups)
        .bind(&received)
        .execute(pool)
        .await?;

    Ok(())
}

fn table_for(group: SensorGroup) -> Option<&'static str> {
    match group {
        SensorGroup::PowerTemp => Some("pwr_temp"),
        SensorGroup::PulseMeter => Some("pulse_detector"),
        SensorGroup::WaterDetector => Some("water_detector"),
        SensorGroup::Magnetic => Some("magnetic"),
        SensorGroup::TankLevel => Some("tank_level"),
        SensorGroup::Unassigned => None,
    }
}

fn columns_for(group: SensorGroup) -> Option<&'static str> {
    match group {
        SensorGroup::PowerTemp => Some("device_id, sequence, temp_celsius, received_at"),
        SensorGroup::PulseMeter => {
            Some("device_id, sequence, pulse_count, leak_detected, received_at")
        }
        SensorGroup::WaterDetector => Some("device_id, sequence, water_detected, received_at"),
        SensorGroup::Magnetic => Some("device_id, sequence, status, received_at"),
        SensorGroup::TankLevel => Some("device_id, level_percentage, battery_volts, received_at"),
        SensorGroup::Unassigned => None,
    }
}

async fn insert_record<'e, E>(executor: E, record: &KindRecord) -> Result<u64>
where
    E: Executor<'e, Database = Postgres>,
{
    let result = match record {
        KindRecord::PowerTemp {
            device_id,
            sequence,
            temp_celsius,
            received_at,
        } => {
            sqlx::query(
                "INSERT INTO pwr_temp (device_id, sequence, temp_celsius, received_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (device_id, sequence, received_at) DO NOTHING",
            )
            .bind(device_id)
            .bind(sequence)
            .bind(temp_celsius)
            .bind(received_at)
            .execute(executor)
            .await?
        }
        KindRecord::PulseMeter {
            device_id,
            sequence,
            pulse_count,
            leak_detected,
            received_at,
        } => {
            sqlx::query(
                "INSERT INTO pulse_detector (device_id, sequence, pulse_count, leak_detected, received_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (device_id, sequence, received_at) DO NOTHING",
            )
            .bind(device_id)
            .bind(sequence)
            .bind(pulse_count)
            .bind(leak_detected)
            .bind(received_at)
            .execute(executor)
            .await?
        }
        KindRecord::WaterDetector {
            device_id,
            sequence,
            water_detected,
            received_at,
        } => {
            sqlx::query(
                "INSERT INTO water_detector (device_id, sequence, water_detected, received_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (device_id, sequence, received_at) DO NOTHING",
            )
            .bind(device_id)
            .bind(sequence)
            .bind(water_detected)
            .bind(received_at)
            .execute(executor)
            .await?
        }
        KindRecord::Magnetic {
            device_id,
            sequence,
            status,
            received_at,
        } => {
            sqlx::query(
                "INSERT INTO magnetic (device_id, sequence, status, received_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (device_id, sequence, received_at) DO NOTHING",
            )
            .bind(device_id)
            .bind(sequence)
            .bind(status)
            .bind(received_at)
            .execute(executor)
            .await?
        }
        KindRecord::TankLevel {
            device_id,
            level_percentage,
            battery_volts,
            received_at,
        } => {
            sqlx::query(
                "INSERT INTO tank_level (device_id, level_percentage, battery_volts, received_at)
                 VALUES ($1, $2, $3, $4)
                 ON CONFLICT (device_id, received_at) DO NOTHING",
            )
            .bind(device_id)
            .bind(level_percentage)
            .bind(battery_volts)
            .bind(received_at)
            .execute(executor)
            .await?
        }
    };

    Ok(result.rows_affected())
}

/// Whether a reading received at `incoming` may replace the stored one.
/// Equal times are a redelivery and replace in place.
fn supersedes(stored: Option<DateTime<Utc>>, incoming: DateTime<Utc>) -> bool {
    stored.map_or(true, |stored| incoming >= stored)
}

/// Curated per-kind tables in Postgres.
#[derive(Debug, Clone)]
pub struct PgKindStore {
    pool: PgPool,
    mode: PersistMode,
}

impl PgKindStore {
    pub fn new(pool: PgPool, mode: PersistMode) -> Self {
        Self { pool, mode }
    }

    async fn write(&self, record: &KindRecord) -> Result<()> {
        match self.mode {
            PersistMode::Append => {
                let inserted = insert_record(&self.pool, record).await?;
                if inserted == 0 {
                    debug!(
                        device_id = record.device_id(),
                        sensor_group = %record.group(),
                        "Duplicate reading ignored"
                    );
                }
            }
            PersistMode::Latest => {
                let Some(table) = table_for(record.group()) else {
                    return Ok(());
                };
                let mut tx = self.pool.begin().await?;

                // Serializes latest-mode writers for one device until commit.
                sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                    .bind(format!("{}:{}", table, record.device_id()))
                    .execute(&mut *tx)
                    .await?;

                let stored: Option<DateTime<Utc>> = sqlx::query_scalar(&format!(
                    "SELECT max(received_at) FROM {} WHERE device_id = $1",
                    table
                ))
                .bind(record.device_id())
                .fetch_one(&mut *tx)
                .await?;

                if !supersedes(stored, record.received_at()) {
                    debug!(
                        device_id = record.device_id(),
                        sensor_group = %record.group(),
                        "Older reading ignored in latest mode"
                    );
                    tx.commit().await?;
                    return Ok(());
                }

                sqlx::query(&format!("DELETE FROM {} WHERE device_id = $1", table))
                    .bind(record.device_id())
                    .execute(&mut *tx)
                    .await?;
                insert_record(&mut *tx, record).await?;
                tx.commit().await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KindStore for PgKindStore {
    async fn persist_kind(&self, entry: &Entry) -> Result<()> {
        let Some(record) = KindRecord::from_entry(entry) else {
            return Ok(());
        };

        let record = &record;
        with_retry("Curated insert", move || self.write(record)).await
    }
}

/// Most recent curated rows for a device, newest first.
pub async fn fetch_recent_readings(
    pool: &PgPool,
    group: SensorGroup,
    device_id: &str,
    limit: usize,
) -> Result<Vec<serde_json::Value>> {
    let (Some(table), Some(columns)) = (table_for(group), columns_for(group)) else {
        return Ok(Vec::new());
    };

    let query = format!(
        "SELECT row_to_json(t) FROM (
             SELECT {} FROM {}
             WHERE device_id = $1
             ORDER BY received_at DESC
             LIMIT $2
         ) t",
        columns, table
    );

    let rows: Vec<Json<serde_json::Value>> = sqlx::query_scalar(&query)
        .bind(device_id)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|Json(row)| row).collect())
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // Check if it's a connection-related error
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" // too_many_connections
            })
        }
        _ => false,
    }
}
