//! Shared test doubles for the replay engine and control plane: an
//! in-memory [`replay_storage::StorageAdapter`] and a recording
//! [`replay_sink::OutputSink`], so integration tests exercise real engine
//! and control-plane code without a live Postgres instance or HTTP sink.

pub mod mock_sink;
pub mod mock_storage;

pub use mock_sink::RecordingSink;
pub use mock_storage::MockStorage;

#[cfg(test)]
mod tests {
    use super::*;
    use replay_protocol::SensorEvent;
    use replay_storage::StorageAdapter;
    use tokio_util::sync::CancellationToken;

    fn event(sensor: i64, timestamp: i64, value: f64) -> SensorEvent {
        SensorEvent { sensor, timestamp, value }
    }

    #[tokio::test]
    async fn warmup_returns_latest_event_strictly_before_from() {
        let storage = MockStorage::new(
            vec![event(1, 100, 1.0), event(1, 200, 2.0), event(1, 300, 3.0)],
            16,
        );
        let cancel = CancellationToken::new();
        let warm = storage.warmup(&[1], 250, &cancel).await.unwrap();
        assert_eq!(warm.len(), 1);
        assert_eq!(warm[0].timestamp, 200);
    }

    #[tokio::test]
    async fn stream_batches_respect_the_configured_size() {
        let events = (0..10).map(|i| event(1, i * 10, i as f64)).collect();
        let storage = MockStorage::new(events, 3);
        let cancel = CancellationToken::new();
        let mut stream = storage.stream(&[1], 0, 1000, 60, &cancel).await.unwrap();
        let mut batch_count = 0;
        while let Some(batch) = stream.data.recv().await {
            assert!(batch.len() <= 3);
            batch_count += 1;
        }
        assert_eq!(batch_count, 4);
    }

    #[tokio::test]
    async fn recording_sink_captures_payloads_in_order() {
        let sink = RecordingSink::new();
        let cancel = CancellationToken::new();
        for step_id in 0u64..3 {
            let payload = replay_protocol::StepPayload {
                step_id,
                step_ts: step_id as i64 * 1_000_000,
                batch_id: 1,
                batch_total: 1,
                updates: vec![],
            };
            sink.send(&payload, &cancel).await.unwrap();
        }
        let received = sink.received();
        assert_eq!(received.len(), 3);
        assert_eq!(received[2].step_id, 2);
    }
}
