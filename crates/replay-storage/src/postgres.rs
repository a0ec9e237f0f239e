use replay_protocol::{SensorEvent, SensorHash, TimestampMicros};
use sensor_registry::SensorRegistry;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::contract::{EventStream, RangeResult, StorageAdapter};
use crate::error::StorageError;

/// Above this many sensors, queries bind the set as a single array and join
/// against it with `UNNEST` rather than expanding an inline `IN (...)` list.
/// This is the `sqlx`-idiomatic stand-in for materialising a temporary
/// per-query table: binding one array avoids both a session-scoped temp
/// table and any backend parameter-count ceiling.
const INLINE_SENSOR_THRESHOLD: usize = 32;

/// Batches of at most this many events are pushed onto the stream channel
/// per window slice, bounding per-message memory independent of `window`.
const STREAM_CHUNK_SIZE: usize = 2_000;

pub async fn connect(database_url: &str) -> Result<PgPool, StorageError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(StorageError::Database)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Storage adapter over a single `main_history` table, keyed by the
/// registry's canonical sensor hash.
pub struct PostgresStorage<R> {
    pool: PgPool,
    registry: R,
}

impl<R: SensorRegistry> PostgresStorage<R> {
    pub fn new(pool: PgPool, registry: R) -> Self {
        Self { pool, registry }
    }

    fn check_sensors(&self, sensors: &[SensorHash]) -> Result<(), StorageError> {
        if sensors.is_empty() {
            return Err(StorageError::EmptySensorSet);
        }
        for &sensor in sensors {
            if !self.registry.contains(sensor) {
                return Err(StorageError::UnknownSensor(sensor));
            }
        }
        Ok(())
    }

    async fn fetch_latest_before(
        &self,
        sensors: &[SensorHash],
        before: TimestampMicros,
    ) -> Result<Vec<SensorEvent>, sqlx::Error> {
        let rows = if sensors.len() <= INLINE_SENSOR_THRESHOLD {
            let placeholders: Vec<String> = (1..=sensors.len()).map(|i| format!("${i}")).collect();
            let sql = format!(
                "SELECT DISTINCT ON (sensor_hash) sensor_hash, ts_micros, value \
                 FROM main_history \
                 WHERE ts_micros < ${} AND sensor_hash IN ({}) \
                 ORDER BY sensor_hash, ts_micros DESC",
                sensors.len() + 1,
                placeholders.join(", "),
            );
            let mut query = sqlx::query(&sql);
            for &sensor in sensors {
                query = query.bind(sensor);
            }
            query.bind(before).fetch_all(&self.pool).await?
        } else {
            sqlx::query(
                "SELECT DISTINCT ON (m.sensor_hash) m.sensor_hash, m.ts_micros, m.value \
                 FROM main_history m \
                 JOIN UNNEST($1::bigint[]) AS wanted(sensor_hash) \
                   ON m.sensor_hash = wanted.sensor_hash \
                 WHERE m.ts_micros < $2 \
                 ORDER BY m.sensor_hash, m.ts_micros DESC",
            )
            .bind(sensors)
            .bind(before)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows
            .into_iter()
            .map(|row| SensorEvent {
                sensor: row.get("sensor_hash"),
                timestamp: row.get("ts_micros"),
                value: row.get("value"),
            })
            .collect())
    }

    async fn fetch_window(
        &self,
        sensors: &[SensorHash],
        from: TimestampMicros,
        to: TimestampMicros,
    ) -> Result<Vec<SensorEvent>, sqlx::Error> {
        let rows = if sensors.len() <= INLINE_SENSOR_THRESHOLD {
            let placeholders: Vec<String> = (1..=sensors.len()).map(|i| format!("${i}")).collect();
            let sql = format!(
                "SELECT sensor_hash, ts_micros, value FROM main_history \
                 WHERE ts_micros >= ${} AND ts_micros < ${} AND sensor_hash IN ({}) \
                 ORDER BY ts_micros ASC",
                sensors.len() + 1,
                sensors.len() + 2,
                placeholders.join(", "),
            );
            let mut query = sqlx::query(&sql);
            for &sensor in sensors {
                query = query.bind(sensor);
            }
            query.bind(from).bind(to).fetch_all(&self.pool).await?
        } else {
            sqlx::query(
                "SELECT m.sensor_hash, m.ts_micros, m.value FROM main_history m \
                 JOIN UNNEST($1::bigint[]) AS wanted(sensor_hash) \
                   ON m.sensor_hash = wanted.sensor_hash \
                 WHERE m.ts_micros >= $2 AND m.ts_micros < $3 \
                 ORDER BY m.ts_micros ASC",
            )
            .bind(sensors)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows
            .into_iter()
            .map(|row| SensorEvent {
                sensor: row.get("sensor_hash"),
                timestamp: row.get("ts_micros"),
                value: row.get("value"),
            })
            .collect())
    }
}

impl<R: SensorRegistry + Clone + Send + Sync + 'static> StorageAdapter for PostgresStorage<R> {
    async fn warmup(
        &self,
        sensors: &[SensorHash],
        from: TimestampMicros,
        cancel: &CancellationToken,
    ) -> Result<Vec<SensorEvent>, StorageError> {
        self.check_sensors(sensors)?;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(StorageError::Cancelled),
            result = self.fetch_latest_before(sensors, from) => Ok(result?),
        }
    }

    async fn stream(
        &self,
        sensors: &[SensorHash],
        from: TimestampMicros,
        to: TimestampMicros,
        window: i64,
        cancel: &CancellationToken,
    ) -> Result<EventStream, StorageError> {
        self.check_sensors(sensors)?;
        if window <= 0 {
            return Err(StorageError::EmptySensorSet);
        }

        let (data_tx, data_rx) = mpsc::channel(4);
        let (error_tx, error_rx) = oneshot::channel();
        let pool = self.pool.clone();
        let registry = self.registry.clone();
        let sensors = sensors.to_vec();
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let adapter = PostgresStorage {
                pool,
                registry,
            };
            let mut cursor = from;
            while cursor < to {
                let slice_end = (cursor + window).min(to);
                let events = tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        debug!("storage stream cancelled mid-window");
                        return;
                    }
                    result = adapter.fetch_window(&sensors, cursor, slice_end) => result,
                };
                match events {
                    Ok(events) => {
                        for chunk in events.chunks(STREAM_CHUNK_SIZE) {
                            if cancel.is_cancelled() {
                                return;
                            }
                            if data_tx.send(chunk.to_vec()).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "storage window query failed");
                        let _ = error_tx.send(StorageError::Database(err));
                        return;
                    }
                }
                cursor = slice_end;
            }
        });

        Ok(EventStream {
            data: data_rx,
            errors: error_rx,
        })
    }

    async fn range(
        &self,
        sensors: &[SensorHash],
        from: Option<TimestampMicros>,
        to: Option<TimestampMicros>,
        cancel: &CancellationToken,
    ) -> Result<RangeResult, StorageError> {
        self.check_sensors(sensors)?;

        let query_fut = async {
            let sql = "SELECT MIN(ts_micros) AS min_ts, MAX(ts_micros) AS max_ts, \
                       COUNT(DISTINCT sensor_hash) AS known_count \
                       FROM main_history \
                       WHERE sensor_hash = ANY($1::bigint[]) \
                         AND ($2::bigint IS NULL OR ts_micros >= $2) \
                         AND ($3::bigint IS NULL OR ts_micros < $3)";
            sqlx::query(sql)
                .bind(sensors)
                .bind(from)
                .bind(to)
                .fetch_one(&self.pool)
                .await
        };

        let row = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(StorageError::Cancelled),
            result = query_fut => result?,
        };

        let min_ts: Option<i64> = row.get("min_ts");
        let max_ts: Option<i64> = row.get("max_ts");
        let known_count: i64 = row.get("known_count");

        Ok(RangeResult {
            min: min_ts.unwrap_or(0),
            max: max_ts.unwrap_or(0),
            known_count: known_count as u64,
            unknown_count: 0,
        })
    }
}
