use replay_protocol::{SensorHash, SensorEvent, TimestampMicros};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::StorageError;

/// Result of a `range`/`range_with_unknown` query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeResult {
    pub min: TimestampMicros,
    pub max: TimestampMicros,
    pub known_count: u64,
    /// Requested sensors present in the store but absent from the registry.
    /// Adapters that cannot compute this return 0 — see `range_with_unknown`
    /// in the storage contract.
    pub unknown_count: u64,
}

/// The two halves of a `stream` call: a bounded channel of event batches and
/// a one-shot terminal-error channel. The error channel fires at most once;
/// the data channel closes on exhaustion or on cancellation regardless of
/// whether an error was also reported.
pub struct EventStream {
    pub data: mpsc::Receiver<Vec<SensorEvent>>,
    pub errors: oneshot::Receiver<StorageError>,
}

/// Pluggable historical event source.
///
/// Resolved by static configuration at startup — an enum of known adapter
/// kinds dispatching to concrete constructors (see [`crate::StorageBackend`])
/// rather than dynamic trait-object dispatch, since the set of backends is
/// fixed per deployment.
pub trait StorageAdapter {
    /// For each sensor with any event strictly before `from`, return the
    /// latest such event. Sensors with no prior event are omitted. Ordering
    /// of the returned vector is unspecified.
    async fn warmup(
        &self,
        sensors: &[SensorHash],
        from: TimestampMicros,
        cancel: &CancellationToken,
    ) -> Result<Vec<SensorEvent>, StorageError>;

    /// Open a lazy, windowed stream over the half-open interval
    /// `[from, to)`. Events in batch k all have timestamp ≤ every event in
    /// batch k+1; within a batch, events are sorted by timestamp
    /// non-decreasing. An empty window slice yields no batch.
    async fn stream(
        &self,
        sensors: &[SensorHash],
        from: TimestampMicros,
        to: TimestampMicros,
        window: i64,
        cancel: &CancellationToken,
    ) -> Result<EventStream, StorageError>;

    /// Min/max event timestamp and contribution counts across `sensors`,
    /// optionally bounded by `from`/`to`. `unknown_count` is the number of
    /// requested sensors present in the store but not mapped by the
    /// registry; adapters that cannot compute it return 0.
    async fn range(
        &self,
        sensors: &[SensorHash],
        from: Option<TimestampMicros>,
        to: Option<TimestampMicros>,
        cancel: &CancellationToken,
    ) -> Result<RangeResult, StorageError>;
}
