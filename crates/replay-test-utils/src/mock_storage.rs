//! An in-memory [`StorageAdapter`] fixture for engine and control-plane
//! tests: no database, deterministic batching, and an optional injected
//! failure so cancellation/error paths can be exercised without a real
//! Postgres instance.

use std::sync::Mutex;

use replay_protocol::{SensorEvent, SensorHash, TimestampMicros};
use replay_storage::{EventStream, RangeResult, StorageAdapter, StorageError};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Events are expected sorted by timestamp ascending — the same invariant
/// the real Postgres adapter upholds for its cursor reads.
pub struct MockStorage {
    events: Vec<SensorEvent>,
    /// Maximum events per `stream` batch; small values exercise the
    /// engine's multi-batch coalescing path in a unit test without a real
    /// windowed query.
    batch_size: usize,
    fail_stream_after: Mutex<Option<usize>>,
}

impl MockStorage {
    #[must_use]
    pub fn new(mut events: Vec<SensorEvent>, batch_size: usize) -> Self {
        events.sort_by_key(|e| e.timestamp);
        Self {
            events,
            batch_size: batch_size.max(1),
            fail_stream_after: Mutex::new(None),
        }
    }

    /// Fail the stream with [`StorageError::Cancelled`] after `batches`
    /// data batches have been sent, instead of closing cleanly.
    #[must_use]
    pub fn failing_after(mut self, batches: usize) -> Self {
        self.fail_stream_after = Mutex::new(Some(batches));
        self
    }
}

impl StorageAdapter for MockStorage {
    async fn warmup(
        &self,
        sensors: &[SensorHash],
        from: TimestampMicros,
        _cancel: &CancellationToken,
    ) -> Result<Vec<SensorEvent>, StorageError> {
        let mut latest: std::collections::HashMap<SensorHash, SensorEvent> = std::collections::HashMap::new();
        for event in &self.events {
            if event.timestamp >= from || !sensors.contains(&event.sensor) {
                continue;
            }
            latest
                .entry(event.sensor)
                .and_modify(|cur| {
                    if event.timestamp > cur.timestamp {
                        *cur = *event;
                    }
                })
                .or_insert(*event);
        }
        Ok(latest.into_values().collect())
    }

    async fn stream(
        &self,
        sensors: &[SensorHash],
        from: TimestampMicros,
        to: TimestampMicros,
        _window: i64,
        cancel: &CancellationToken,
    ) -> Result<EventStream, StorageError> {
        let matching: Vec<SensorEvent> = self
            .events
            .iter()
            .copied()
            .filter(|e| e.timestamp >= from && e.timestamp < to && sensors.contains(&e.sensor))
            .collect();

        let (data_tx, data_rx) = mpsc::channel(8);
        let (err_tx, err_rx) = oneshot::channel();
        let fail_after = *self.fail_stream_after.lock().unwrap();
        let batch_size = self.batch_size;
        let cancel = cancel.clone();

        tokio::spawn(async move {
            let mut sent = 0usize;
            for chunk in matching.chunks(batch_size) {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    result = data_tx.send(chunk.to_vec()) => {
                        if result.is_err() {
                            return;
                        }
                    }
                }
                sent += 1;
                if Some(sent) == fail_after {
                    let _ = err_tx.send(StorageError::Cancelled);
                    return;
                }
            }
        });

        Ok(EventStream {
            data: data_rx,
            errors: err_rx,
        })
    }

    async fn range(
        &self,
        sensors: &[SensorHash],
        from: Option<TimestampMicros>,
        to: Option<TimestampMicros>,
        _cancel: &CancellationToken,
    ) -> Result<RangeResult, StorageError> {
        if sensors.is_empty() {
            return Err(StorageError::EmptySensorSet);
        }
        let matching: Vec<&SensorEvent> = self
            .events
            .iter()
            .filter(|e| {
                sensors.contains(&e.sensor)
                    && from.is_none_or(|f| e.timestamp >= f)
                    && to.is_none_or(|t| e.timestamp < t)
            })
            .collect();
        let min = matching.iter().map(|e| e.timestamp).min().unwrap_or(0);
        let max = matching.iter().map(|e| e.timestamp).max().unwrap_or(0);
        Ok(RangeResult {
            min,
            max,
            known_count: matching.len() as u64,
            unknown_count: 0,
        })
    }
}
