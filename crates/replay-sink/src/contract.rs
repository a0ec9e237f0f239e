use replay_protocol::StepPayload;
use tokio_util::sync::CancellationToken;

use crate::error::SinkError;

/// Receiver of per-tick delta batches.
///
/// `send` returns only once the sink has taken responsibility for the
/// batch: a synchronous adapter has fully delivered it; a pooled adapter has
/// enqueued it (or failed fast if its queue is full). The engine relies on
/// sub-batches of one step arriving in `batch_id` order before any sub-batch
/// of the next step — implementations that reorder internally must
/// preserve this at the point `send` returns.
pub trait OutputSink {
    async fn send(
        &self,
        payload: &StepPayload,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError>;
}

/// Maps a sensor identity to the query-string parameter name the HTTP sink
/// uses for it.
pub trait ParamNamer: Send + Sync {
    fn param_name(&self, sensor: replay_protocol::SensorHash) -> String;
}

/// Canonical formatter: `id<hash>`, e.g. `id42`.
pub struct HashParamNamer;

impl ParamNamer for HashParamNamer {
    fn param_name(&self, sensor: replay_protocol::SensorHash) -> String {
        format!("id{sensor}")
    }
}

/// Name-mode formatter: looks the sensor up in the registry, falling back to
/// the hash form if the registry has no entry (it always should, since the
/// engine only ever carries registered sensors, but a sink must not panic on
/// a stale registry).
pub struct NameParamNamer<R> {
    pub registry: R,
}

impl<R: sensor_registry::SensorRegistry> ParamNamer for NameParamNamer<R> {
    fn param_name(&self, sensor: replay_protocol::SensorHash) -> String {
        match self.registry.hash_to_name(sensor) {
            Some(name) => name.to_owned(),
            None => format!("id{sensor}"),
        }
    }
}
