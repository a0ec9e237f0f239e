use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use replay_protocol::{ErrorKind, HttpErrorEnvelope, Phase};

pub type HttpResponse = Response;
pub type HttpResult<T = ()> = Result<T, HttpResponse>;

fn json_error(status: StatusCode, kind: ErrorKind, message: impl Into<String>, phase: Option<Phase>) -> HttpResponse {
    (
        status,
        Json(HttpErrorEnvelope {
            kind,
            message: message.into(),
            phase,
        }),
    )
        .into_response()
}

pub fn internal_error(err: impl std::fmt::Display) -> HttpResponse {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::FatalError, err.to_string(), None)
}

pub fn bad_request(kind: ErrorKind, message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::BAD_REQUEST, kind, message, None)
}

pub fn unauthorized(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::UNAUTHORIZED, ErrorKind::StateError, message, None)
}

/// A rejected phase transition — 409, carrying the current phase so the
/// caller never has to poll status separately to find out why.
pub fn conflict(message: impl Into<String>, phase: Phase) -> HttpResponse {
    json_error(StatusCode::CONFLICT, ErrorKind::StateError, message, Some(phase))
}

pub fn from_engine_error(err: &replay_engine::EngineError) -> HttpResponse {
    let status = match err.kind() {
        ErrorKind::InputError | ErrorKind::ResolveError => StatusCode::BAD_REQUEST,
        ErrorKind::StateError => StatusCode::CONFLICT,
        ErrorKind::CancelError => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::StorageError | ErrorKind::SinkError | ErrorKind::FatalError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let phase = match err {
        replay_engine::EngineError::State { phase, .. } => Some(*phase),
        _ => None,
    };
    json_error(status, err.kind(), err.to_string(), phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn conflict_carries_the_current_phase() {
        let response = conflict("cannot pause while idle", Phase::Idle);
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: HttpErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.kind, ErrorKind::StateError);
        assert_eq!(parsed.phase, Some(Phase::Idle));
    }

    #[tokio::test]
    async fn bad_request_omits_phase() {
        let response = bad_request(ErrorKind::InputError, "empty sensor set");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: HttpErrorEnvelope = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.kind, ErrorKind::InputError);
        assert!(parsed.phase.is_none());
    }
}
