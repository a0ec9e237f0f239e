// replay-protocol: wire types shared between the replay engine, the
// control plane, and WebSocket/HTTP clients.
//
// All WebSocket messages use a top-level `type` field for discriminated
// deserialization. HTTP request/response bodies are plain JSON structs
// consumed directly by axum's `Json` extractor.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sensor identity and events
// ---------------------------------------------------------------------------

/// Stable 64-bit identifier for a sensor, as produced by the registry hash
/// function. Identity, not display — `SensorName` is a separate attribute.
pub type SensorHash = i64;

/// Microsecond-precision virtual/event timestamp, counted from the Unix
/// epoch. Kept as a plain integer rather than a calendar type at the wire
/// boundary so storage adapters never have to round-trip through string
/// parsing.
pub type TimestampMicros = i64;

/// A single (sensor, timestamp, value) reading as produced by storage and
/// consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorEvent {
    pub sensor: SensorHash,
    pub timestamp: TimestampMicros,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Step emission
// ---------------------------------------------------------------------------

/// One sensor's value as carried in a `StepPayload` or WS `updates` message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorUpdate {
    pub id: SensorHash,
    pub value: f64,
    pub has_value: bool,
}

/// One sub-batch of a tick's emission.
///
/// `batch_id` is 1-based; all sub-batches of one step share `step_id` and
/// `step_ts`. `batch_total` is the same value across every sub-batch of a
/// step, letting a sink detect a short/truncated delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPayload {
    pub step_id: u64,
    pub step_ts: TimestampMicros,
    pub batch_id: u32,
    pub batch_total: u32,
    pub updates: Vec<SensorUpdate>,
}

// ---------------------------------------------------------------------------
// Control-plane HTTP request/response bodies
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/engine/start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartParams {
    /// Sensor hashes to replay. The engine sorts these ascending on intake.
    pub sensors: Vec<SensorHash>,
    pub from: TimestampMicros,
    pub to: TimestampMicros,
    pub step_micros: i64,
    pub window_micros: i64,
    pub speed: f64,
    pub batch_size: u32,
    #[serde(default)]
    pub save_output: bool,
    #[serde(default)]
    pub cache_logging: bool,
}

/// Body of `POST /api/v1/engine/seek`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeekRequest {
    pub t: TimestampMicros,
}

/// Direction for `POST /api/v1/engine/step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepDirection {
    Forward,
    Backward,
}

/// Body of `POST /api/v1/engine/step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRequest {
    pub direction: StepDirection,
    pub count: u32,
}

/// Body of `GET /api/v1/engine/range`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeRequest {
    pub sensors: Vec<SensorHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<TimestampMicros>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<TimestampMicros>,
}

/// Response to `GET /api/v1/engine/range`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeResponse {
    pub min: TimestampMicros,
    pub max: TimestampMicros,
    pub known_count: u64,
    pub unknown_count: u64,
}

/// Replay task phase, mirrored 1:1 with the engine's internal state
/// machine (see `replay-engine::Phase`) so status responses never need a
/// translation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Running,
    Paused,
    Done,
    Error,
}

/// One of the frozen error kinds from the error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputError,
    ResolveError,
    StorageError,
    SinkError,
    StateError,
    CancelError,
    FatalError,
}

/// Engine error surfaced to an HTTP/WS client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Response to `GET /api/v1/engine/status` and embedded in every mutating
/// endpoint's response so a caller always learns the resulting phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub phase: Phase,
    pub step_id: u64,
    pub step_ts: TimestampMicros,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,
    pub has_controller: bool,
    pub control_timeout_secs: u64,
}

/// Response to `POST /api/v1/session/claim`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub session_token: String,
    pub control_timeout_secs: u64,
}

/// Frozen HTTP error envelope used by all non-2xx control-plane responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
}

// ---------------------------------------------------------------------------
// WebSocket state streamer (/ws/state)
// ---------------------------------------------------------------------------

/// One sensor entry in a `snapshot` message — carries display attributes
/// alongside value so a fresh subscriber never needs a second round trip
/// to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub id: SensorHash,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textname: Option<String>,
}

/// Engine metadata attached to `snapshot` and `meta` messages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineMeta {
    pub has_controller: bool,
    pub control_timeout_secs: u64,
}

/// One sensor entry in an `updates` message. Distinct from `SnapshotEntry`
/// because updates are keyed by dirty sensors only and rarely carry display
/// attributes (those were already sent in the last `snapshot`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub id: SensorHash,
    pub value: f64,
    pub has_value: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textname: Option<String>,
}

/// All `/ws/state` server-to-client message kinds.
///
/// Serializes/deserializes using the `type` field as a tag:
///
/// ```json
/// { "type": "snapshot", "sensors": [...], "meta": {...} }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum WsStateMessage {
    Snapshot {
        sensors: Vec<SnapshotEntry>,
        meta: EngineMeta,
    },
    Updates {
        step_id: u64,
        step_ts: TimestampMicros,
        step_unix: i64,
        updates: Vec<UpdateEntry>,
    },
    Reset,
    Meta {
        meta: EngineMeta,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_state_message_tags_on_type_field() {
        let msg = WsStateMessage::Updates {
            step_id: 42,
            step_ts: 1_000_000,
            step_unix: 1,
            updates: vec![UpdateEntry {
                id: 100,
                value: 1.0,
                has_value: true,
                name: None,
                textname: None,
            }],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "updates");
        assert_eq!(json["step_id"], 42);
        assert!(json["updates"][0].get("name").is_none());
    }

    #[test]
    fn snapshot_message_round_trips() {
        let msg = WsStateMessage::Snapshot {
            sensors: vec![SnapshotEntry {
                id: 7,
                value: 3.5,
                name: Some("pump-1".to_owned()),
                textname: None,
            }],
            meta: EngineMeta {
                has_controller: true,
                control_timeout_secs: 300,
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: WsStateMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn reset_message_has_no_payload_fields() {
        let json = serde_json::to_value(WsStateMessage::Reset).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "reset" }));
    }

    #[test]
    fn http_error_envelope_omits_phase_when_absent() {
        let env = HttpErrorEnvelope {
            kind: ErrorKind::InputError,
            message: "empty sensor set".to_owned(),
            phase: None,
        };
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("phase").is_none());
    }

    #[test]
    fn step_payload_batch_fields_round_trip() {
        let payload = StepPayload {
            step_id: 1,
            step_ts: 0,
            batch_id: 1,
            batch_total: 3,
            updates: vec![SensorUpdate {
                id: 100,
                value: 1.0,
                has_value: true,
            }],
        };
        let json = serde_json::to_string(&payload).unwrap();
        let parsed: StepPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, payload);
    }
}
