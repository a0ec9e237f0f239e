use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use replay_protocol::{
    ClaimResponse, ErrorKind, RangeRequest, RangeResponse, SeekRequest, StatusResponse,
    StepRequest,
};
use replay_storage::StorageAdapter;
use tokio_util::sync::CancellationToken;

use crate::http::response::{bad_request, conflict, from_engine_error, internal_error, unauthorized};
use crate::session::SessionError;
use crate::state::AppState;

const SESSION_HEADER: &str = "x-session-token";

fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

async fn require_session(state: &AppState, headers: &HeaderMap) -> Result<(), impl IntoResponse> {
    let Some(token) = session_token(headers) else {
        return Err(unauthorized("missing X-Session-Token header"));
    };
    match state.sessions.touch(token).await {
        Ok(()) => Ok(()),
        Err(SessionError::NoController) => Err(unauthorized("no active controller")),
        Err(SessionError::TokenMismatch) => Err(unauthorized("session token does not match the active controller")),
        Err(SessionError::AlreadyClaimed) => Err(unauthorized("session token does not match the active controller")),
    }
}

async fn current_status(state: &AppState) -> StatusResponse {
    let status = state.engine.status().await;
    StatusResponse {
        phase: status.phase,
        step_id: status.step_id,
        step_ts: status.step_ts,
        last_error: status.last_error,
        has_controller: state.sessions.has_controller().await,
        control_timeout_secs: state.sessions.control_timeout_secs(),
    }
}

pub async fn claim(State(state): State<AppState>) -> impl IntoResponse {
    match state.sessions.claim().await {
        Ok(token) => Json(ClaimResponse {
            session_token: token,
            control_timeout_secs: state.sessions.control_timeout_secs(),
        })
        .into_response(),
        Err(SessionError::AlreadyClaimed) => conflict(
            "a controller is already active",
            state.engine.status().await.phase,
        )
        .into_response(),
        Err(_) => internal_error("unexpected session error").into_response(),
    }
}

pub async fn start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<replay_protocol::StartParams>,
) -> impl IntoResponse {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp.into_response();
    }
    match state.engine.start(params).await {
        Ok(()) => Json(current_status(&state).await).into_response(),
        Err(err) => from_engine_error(&err).into_response(),
    }
}

pub async fn pause(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp.into_response();
    }
    match state.engine.pause().await {
        Ok(()) => Json(current_status(&state).await).into_response(),
        Err(err) => from_engine_error(&err).into_response(),
    }
}

pub async fn resume(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp.into_response();
    }
    match state.engine.resume().await {
        Ok(()) => Json(current_status(&state).await).into_response(),
        Err(err) => from_engine_error(&err).into_response(),
    }
}

pub async fn stop(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp.into_response();
    }
    match state.engine.stop().await {
        Ok(()) => Json(current_status(&state).await).into_response(),
        Err(err) => from_engine_error(&err).into_response(),
    }
}

pub async fn seek(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SeekRequest>,
) -> impl IntoResponse {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp.into_response();
    }
    match state.engine.seek(req.t).await {
        Ok(()) => Json(current_status(&state).await).into_response(),
        Err(err) => from_engine_error(&err).into_response(),
    }
}

pub async fn step(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<StepRequest>,
) -> impl IntoResponse {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp.into_response();
    }
    match state.engine.step(req.direction, req.count).await {
        Ok(_payloads) => Json(current_status(&state).await).into_response(),
        Err(err) => from_engine_error(&err).into_response(),
    }
}

pub async fn apply(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(resp) = require_session(&state, &headers).await {
        return resp.into_response();
    }
    match state.engine.apply().await {
        Ok(_payloads) => Json(current_status(&state).await).into_response(),
        Err(err) => from_engine_error(&err).into_response(),
    }
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(current_status(&state).await)
}

pub async fn range(
    State(state): State<AppState>,
    Json(req): Json<RangeRequest>,
) -> impl IntoResponse {
    if req.sensors.is_empty() {
        return bad_request(ErrorKind::InputError, "empty sensor set").into_response();
    }
    let cancel = CancellationToken::new();
    match state
        .range_storage
        .range(&req.sensors, req.from, req.to, &cancel)
        .await
    {
        Ok(result) => Json(RangeResponse {
            min: result.min,
            max: result.max,
            known_count: result.known_count,
            unknown_count: result.unknown_count,
        })
        .into_response(),
        Err(err) => internal_error(err).into_response(),
    }
}
