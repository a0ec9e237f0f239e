//! An [`OutputSink`] fixture that records every delivered payload in order,
//! for asserting on what the engine actually emitted without standing up an
//! HTTP endpoint.

use std::sync::Mutex;

use replay_protocol::StepPayload;
use replay_sink::{OutputSink, SinkError};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<StepPayload>>,
    fail_next: Mutex<bool>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `send` call with [`SinkError::Unconfigured`], then
    /// resume accepting payloads normally.
    pub fn fail_next_send(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    #[must_use]
    pub fn received(&self) -> Vec<StepPayload> {
        self.received.lock().unwrap().clone()
    }
}

impl OutputSink for RecordingSink {
    async fn send(&self, payload: &StepPayload, _cancel: &CancellationToken) -> Result<(), SinkError> {
        let mut fail_next = self.fail_next.lock().unwrap();
        if *fail_next {
            *fail_next = false;
            return Err(SinkError::Unconfigured);
        }
        drop(fail_next);
        self.received.lock().unwrap().push(payload.clone());
        Ok(())
    }
}
