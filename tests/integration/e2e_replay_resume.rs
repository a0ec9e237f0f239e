//! End-to-end engine tests: start, pause/resume, stop, and restart against
//! an in-memory storage/sink pair, with no live Postgres required.

use std::time::Duration;

use replay_engine::{EngineHandle, EngineRuntimeConfig};
use replay_protocol::{Phase, SensorEvent, StartParams};
use replay_test_utils::{MockStorage, RecordingSink};

fn event(sensor: i64, timestamp: i64, value: f64) -> SensorEvent {
    SensorEvent { sensor, timestamp, value }
}

fn start_params(sensors: Vec<i64>, from: i64, to: i64) -> StartParams {
    StartParams {
        sensors,
        from,
        to,
        step_micros: 1_000,
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

#[tokio::test]
async fn replay_runs_to_completion_and_emits_every_sensor_update() {
    let events = vec![
        event(1, 1_000, 1.0),
        event(1, 2_000, 2.0),
        event(2, 1_500, 9.0),
    ];
    let storage = MockStorage::new(events, 16);
    let sink = RecordingSink::new();
    let engine = EngineHandle::spawn(storage, sink, EngineRuntimeConfig::default(), None);

    engine.start(start_params(vec![1, 2], 0, 3_000)).await.unwrap();
    wait_for_phase(&engine, Phase::Done).await;

    let status = engine.status().await;
    assert_eq!(status.phase, Phase::Done);
    assert!(status.step_id >= 2, "expected at least one step per event timestamp bucket");
}

#[tokio::test]
async fn pause_halts_emission_and_resume_continues_from_the_same_clock() {
    let events = vec![event(1, 500, 1.0), event(1, 1_500, 2.0), event(1, 2_500, 3.0)];
    let storage = MockStorage::new(events, 16);
    let sink = RecordingSink::new();
    let engine = EngineHandle::spawn(storage, sink, EngineRuntimeConfig::default(), None);

    engine.start(start_params(vec![1], 0, 3_000)).await.unwrap();
    engine.pause().await.unwrap();
    let paused_status = engine.status().await;
    assert_eq!(paused_status.phase, Phase::Paused);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let still_paused = engine.status().await;
    assert_eq!(still_paused.step_ts, paused_status.step_ts, "a paused engine must not advance its clock");

    engine.resume().await.unwrap();
    wait_for_phase(&engine, Phase::Done).await;
}

#[tokio::test]
async fn stop_returns_to_idle_and_a_fresh_start_replays_from_scratch() {
    let events = vec![event(1, 100, 1.0), event(1, 1_100, 2.0)];
    let storage = MockStorage::new(events, 16);
    let sink = RecordingSink::new();
    let engine = EngineHandle::spawn(storage, sink, EngineRuntimeConfig::default(), None);

    engine.start(start_params(vec![1], 0, 2_000)).await.unwrap();
    engine.stop().await.unwrap();
    let status = engine.status().await;
    assert_eq!(status.phase, Phase::Idle);
    assert_eq!(status.step_id, 0);

    engine.start(start_params(vec![1], 0, 2_000)).await.unwrap();
    wait_for_phase(&engine, Phase::Done).await;
}

#[tokio::test]
async fn starting_while_already_running_is_rejected() {
    let events = vec![event(1, 100, 1.0), event(1, 5_000, 2.0)];
    let storage = MockStorage::new(events, 16);
    let sink = RecordingSink::new();
    let engine = EngineHandle::spawn(storage, sink, EngineRuntimeConfig::default(), None);

    engine.start(start_params(vec![1], 0, 10_000)).await.unwrap();
    let second = engine.start(start_params(vec![1], 0, 10_000)).await;
    assert!(second.is_err());
    engine.stop().await.unwrap();
}
