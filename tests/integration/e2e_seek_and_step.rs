//! Exercises seek, forward/backward stepping, and `apply` idempotence
//! against an in-memory storage/sink pair.

use std::time::Duration;

use replay_engine::{EngineHandle, EngineRuntimeConfig};
use replay_protocol::{Phase, SensorEvent, StartParams, StepDirection};
use replay_test_utils::{MockStorage, RecordingSink};

fn event(sensor: i64, timestamp: i64, value: f64) -> SensorEvent {
    SensorEvent { sensor, timestamp, value }
}

fn start_params(sensors: Vec<i64>, from: i64, to: i64, step_micros: i64) -> StartParams {
    StartParams {
        sensors,
        from,
        to,
        step_micros,
        window_micros: 10_000,
        speed: 1_000.0,
        batch_size: 64,
        save_output: false,
        cache_logging: false,
    }
}

async fn wait_for_phase(engine: &EngineHandle, phase: Phase) {
    for _ in 0..200 {
        if engine.status().await.phase == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("engine never reached phase {phase:?}");
}

fn storage_and_sink() -> (MockStorage, RecordingSink) {
    let events = vec![
        event(1, 0, 1.0),
        event(1, 1_000, 2.0),
        event(1, 2_000, 3.0),
        event(1, 3_000, 4.0),
        event(1, 4_000, 5.0),
    ];
    (MockStorage::new(events, 16), RecordingSink::new())
}

#[tokio::test]
async fn seek_backward_restores_state_without_emitting_intermediate_ticks() {
    let (storage, sink) = storage_and_sink();
    let engine = EngineHandle::spawn(storage, sink, EngineRuntimeConfig::default(), None);

    engine.start(start_params(vec![1], 0, 5_000, 1_000)).await.unwrap();
    wait_for_phase(&engine, Phase::Done).await;
    let done_step_id = engine.status().await.step_id;

    engine.seek(1_500).await.unwrap();
    let status = engine.status().await;
    assert_eq!(status.step_ts, 1_500);
    assert!(status.step_id <= done_step_id, "seeking backward must not invent new steps");

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn seek_outside_the_configured_range_is_rejected() {
    let (storage, sink) = storage_and_sink();
    let engine = EngineHandle::spawn(storage, sink, EngineRuntimeConfig::default(), None);

    engine.start(start_params(vec![1], 0, 5_000, 1_000)).await.unwrap();
    wait_for_phase(&engine, Phase::Done).await;

    let result = engine.seek(-1).await;
    assert!(result.is_err());
    let result = engine.seek(50_000).await;
    assert!(result.is_err());

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn step_backward_then_forward_returns_to_the_same_clock() {
    let (storage, sink) = storage_and_sink();
    let engine = EngineHandle::spawn(storage, sink, EngineRuntimeConfig::default(), None);

    engine.start(start_params(vec![1], 0, 5_000, 1_000)).await.unwrap();
    wait_for_phase(&engine, Phase::Done).await;
    let forward_ts = engine.status().await.step_ts;

    engine.step(StepDirection::Backward, 2).await.unwrap();
    let back_ts = engine.status().await.step_ts;
    assert!(back_ts < forward_ts);

    engine.step(StepDirection::Forward, 2).await.unwrap();
    let returned_ts = engine.status().await.step_ts;
    assert_eq!(returned_ts, forward_ts);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn apply_reuses_the_current_step_id_and_emits_every_known_sensor() {
    let (storage, sink) = storage_and_sink();
    let engine = EngineHandle::spawn(storage, sink, EngineRuntimeConfig::default(), None);

    engine.start(start_params(vec![1], 0, 5_000, 1_000)).await.unwrap();
    wait_for_phase(&engine, Phase::Done).await;
    let before = engine.status().await;

    let payloads = engine.apply().await.unwrap();
    assert!(!payloads.is_empty());
    for payload in &payloads {
        assert_eq!(payload.step_id, before.step_id, "apply must not mint a new step_id");
        assert_eq!(payload.step_ts, before.step_ts);
    }

    let after = engine.status().await;
    assert_eq!(after.step_id, before.step_id, "apply is idempotent with respect to step_id");

    engine.stop().await.unwrap();
}
