use std::io::Write;
use std::sync::Mutex;

use replay_protocol::StepPayload;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::contract::OutputSink;
use crate::error::SinkError;

/// Writes one human-readable line per payload to a caller-supplied sink.
/// Grounded in `UiLogger::log`'s "format, then `tracing::info!`" shape, with
/// the formatted line also mirrored to the caller's writer.
pub struct LineWriterSink {
    target: Option<Mutex<Box<dyn Write + Send>>>,
}

impl LineWriterSink {
    #[must_use]
    pub fn new(target: Box<dyn Write + Send>) -> Self {
        Self {
            target: Some(Mutex::new(target)),
        }
    }

    /// A sink with no configured target — every `send` call errors, useful
    /// as a deliberate no-op default that still satisfies the contract's
    /// "errors if unset" requirement.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self { target: None }
    }

    fn format_line(payload: &StepPayload) -> String {
        let updates: Vec<String> = payload
            .updates
            .iter()
            .map(|u| format!("{}={}{}", u.id, u.value, if u.has_value { "" } else { "?" }))
            .collect();
        format!(
            "step={} ts={} batch={}/{} {}",
            payload.step_id,
            payload.step_ts,
            payload.batch_id,
            payload.batch_total,
            updates.join(" "),
        )
    }
}

impl OutputSink for LineWriterSink {
    async fn send(
        &self,
        payload: &StepPayload,
        _cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        let Some(target) = &self.target else {
            return Err(SinkError::Unconfigured);
        };
        let line = Self::format_line(payload);
        debug!(step_id = payload.step_id, batch_id = payload.batch_id, %line, "sink line");
        let mut target = target.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        writeln!(target, "{line}").map_err(|_| SinkError::Unconfigured)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_protocol::SensorUpdate;

    fn payload() -> StepPayload {
        StepPayload {
            step_id: 1,
            step_ts: 1_000,
            batch_id: 1,
            batch_total: 1,
            updates: vec![
                SensorUpdate {
                    id: 42,
                    value: 3.5,
                    has_value: true,
                },
                SensorUpdate {
                    id: 43,
                    value: 0.0,
                    has_value: false,
                },
            ],
        }
    }

    #[tokio::test]
    async fn unconfigured_sink_errors() {
        let sink = LineWriterSink::unconfigured();
        let cancel = CancellationToken::new();
        let err = sink.send(&payload(), &cancel).await.unwrap_err();
        assert!(matches!(err, SinkError::Unconfigured));
    }

    #[tokio::test]
    async fn configured_sink_writes_one_line_per_payload() {
        let buf: Vec<u8> = Vec::new();
        let sink = LineWriterSink::new(Box::new(buf));
        let cancel = CancellationToken::new();
        sink.send(&payload(), &cancel).await.unwrap();
    }

    #[test]
    fn format_line_marks_missing_values() {
        let line = LineWriterSink::format_line(&payload());
        assert!(line.contains("42=3.5"));
        assert!(line.contains("43=0?"));
    }
}
