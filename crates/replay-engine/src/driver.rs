//! The tick loop: the single task that owns `EngineState`, drives the
//! virtual clock, and answers every control-plane command.
//!
//! Commands arrive over an `mpsc` channel with a `oneshot` reply, modeled on
//! the teacher's forwarder-command-proxy pattern. Stop is special: the
//! caller cancels a shared `CancellationToken` *before* the `Stop` command
//! is even sent, so a tick blocked on a storage read aborts immediately
//! instead of waiting for this task to reach its next command-check point.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use replay_protocol::{
    ErrorKind, LastError, Phase, SensorEvent, SensorHash, SensorUpdate, StartParams,
    StepDirection, StepPayload, TimestampMicros,
};
use replay_sink::OutputSink;
use replay_storage::{EventStream, StorageAdapter};
use replay_ui_log::UiLogger;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::SnapshotCache;
use crate::error::EngineError;
use crate::state::{EngineState, SensorSlot, StateSnapshot};

/// Commands accepted by the tick loop, one variant per control-plane
/// operation. Every mutating operation carries a `oneshot` reply; status
/// reads go through the same channel so they observe a consistent,
/// non-torn view of engine state (the tick loop is the only writer).
pub enum Command {
    Start {
        params: StartParams,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Pause {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Step {
        direction: StepDirection,
        count: u32,
        reply: oneshot::Sender<Result<Vec<StepPayload>, EngineError>>,
    },
    Seek {
        t: TimestampMicros,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Apply {
        reply: oneshot::Sender<Result<Vec<StepPayload>, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    WsSnapshot {
        reply: oneshot::Sender<Vec<(SensorHash, SensorSlot)>>,
    },
}

/// Everything a WS/SSE fan-out layer needs to know about a tick or a reset.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Step(StepPayload),
    /// Engine returned to idle (stop, reparam, or fatal error) — subscribers
    /// must drop their cached snapshot and wait for the next one.
    Reset,
}

#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub phase: Phase,
    pub step_id: u64,
    pub step_ts: TimestampMicros,
    pub last_error: Option<LastError>,
}

#[derive(Debug, Clone)]
pub struct EngineRuntimeConfig {
    /// Bound on the state-snapshot cache (see `SnapshotCache`). Default 64,
    /// matching "~64 snapshots cover the full range".
    pub snapshot_cache_capacity: usize,
    /// Depth of the command mailbox.
    pub command_buffer: usize,
    /// Depth of the event broadcast consumed by WS fan-out.
    pub event_buffer: usize,
}

impl Default for EngineRuntimeConfig {
    fn default() -> Self {
        Self {
            snapshot_cache_capacity: crate::cache::DEFAULT_CAPACITY,
            command_buffer: 32,
            event_buffer: 1024,
        }
    }
}

/// A cloneable handle to a running engine task. Every control-plane request
/// handler holds one; `subscribe()` hands WS fan-out its own broadcast
/// receiver.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<Command>,
    cancel_cell: Arc<Mutex<CancellationToken>>,
    events: broadcast::Sender<EngineEvent>,
}

impl EngineHandle {
    /// Spawn the tick-loop task and return a handle to it.
    pub fn spawn<S, O>(
        storage: S,
        sink: O,
        config: EngineRuntimeConfig,
        debug_log: Option<UiLogger<String>>,
    ) -> Self
    where
        S: StorageAdapter + Send + Sync + 'static,
        O: OutputSink + Send + Sync + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let cancel_cell = Arc::new(Mutex::new(CancellationToken::new()));

        let driver = Driver {
            storage,
            sink,
            cmd_rx,
            events: events.clone(),
            cancel_cell: Arc::clone(&cancel_cell),
            cache_capacity: config.snapshot_cache_capacity.max(1),
            debug_log,
            phase: Phase::Idle,
            step_id: 0,
            step_ts: 0,
            last_error: None,
            run: None,
        };
        tokio::spawn(driver.run());

        Self {
            cmd_tx,
            cancel_cell,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn send_cmd<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> T
    where
        T: EngineUnavailable,
    {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(build(tx)).await.is_err() {
            return T::unavailable();
        }
        rx.await.unwrap_or_else(|_| T::unavailable())
    }

    pub async fn start(&self, params: StartParams) -> Result<(), EngineError> {
        self.send_cmd(|reply| Command::Start { params, reply }).await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.send_cmd(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        self.send_cmd(|reply| Command::Resume { reply }).await
    }

    /// Cancels in-flight storage/sink work before the `Stop` command is even
    /// enqueued, so a tick blocked on a storage read aborts promptly.
    pub async fn stop(&self) -> Result<(), EngineError> {
        self.cancel_cell.lock().unwrap().cancel();
        self.send_cmd(|reply| Command::Stop { reply }).await
    }

    pub async fn step(
        &self,
        direction: StepDirection,
        count: u32,
    ) -> Result<Vec<StepPayload>, EngineError> {
        self.send_cmd(|reply| Command::Step {
            direction,
            count,
            reply,
        })
        .await
    }

    pub async fn seek(&self, t: TimestampMicros) -> Result<(), EngineError> {
        self.send_cmd(|reply| Command::Seek { t, reply }).await
    }

    pub async fn apply(&self) -> Result<Vec<StepPayload>, EngineError> {
        self.send_cmd(|reply| Command::Apply { reply }).await
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.send_cmd(|reply| Command::Status { reply }).await
    }

    pub async fn ws_snapshot(&self) -> Vec<(SensorHash, SensorSlot)> {
        self.send_cmd(|reply| Command::WsSnapshot { reply }).await
    }
}

/// Lets `send_cmd` manufacture a sensible value when the engine task has
/// already exited (should only happen during process shutdown).
trait EngineUnavailable {
    fn unavailable() -> Self;
}

impl EngineUnavailable for Result<(), EngineError> {
    fn unavailable() -> Self {
        Err(EngineError::Fatal("engine task is not running".to_owned()))
    }
}

impl EngineUnavailable for Result<Vec<StepPayload>, EngineError> {
    fn unavailable() -> Self {
        Err(EngineError::Fatal("engine task is not running".to_owned()))
    }
}

impl EngineUnavailable for StatusSnapshot {
    fn unavailable() -> Self {
        Self {
            phase: Phase::Error,
            step_id: 0,
            step_ts: 0,
            last_error: Some(LastError {
                kind: ErrorKind::FatalError,
                message: "engine task is not running".to_owned(),
            }),
        }
    }
}

impl EngineUnavailable for Vec<(SensorHash, SensorSlot)> {
    fn unavailable() -> Self {
        Vec::new()
    }
}

/// Per-run mutable context: everything that exists between `start()` and
/// the next `stop()`/reparameterisation.
struct RunContext {
    params: StartParams,
    state: EngineState,
    cache: SnapshotCache,
    stream: Option<EventStream>,
    pending: VecDeque<SensorEvent>,
    cancel: CancellationToken,
    virtual_now: TimestampMicros,
    checkpoint_interval: u64,
    ticks_since_checkpoint: u64,
}

struct Driver<S, O> {
    storage: S,
    sink: O,
    cmd_rx: mpsc::Receiver<Command>,
    events: broadcast::Sender<EngineEvent>,
    cancel_cell: Arc<Mutex<CancellationToken>>,
    cache_capacity: usize,
    debug_log: Option<UiLogger<String>>,
    phase: Phase,
    step_id: u64,
    step_ts: TimestampMicros,
    last_error: Option<LastError>,
    run: Option<RunContext>,
}

impl<S, O> Driver<S, O>
where
    S: StorageAdapter + Send + Sync + 'static,
    O: OutputSink + Send + Sync + 'static,
{
    async fn run(mut self) {
        loop {
            match self.phase {
                Phase::Running => self.run_tick_cycle().await,
                Phase::Idle | Phase::Paused | Phase::Done | Phase::Error => {
                    let Some(cmd) = self.cmd_rx.recv().await else {
                        info!("engine command channel closed, shutting down tick loop");
                        return;
                    };
                    self.dispatch(cmd).await;
                }
            }
        }
    }

    async fn dispatch(&mut self, cmd: Command) {
        match cmd {
            Command::Start { params, reply } => self.handle_start(params, reply).await,
            Command::Pause { reply } => {
                let res = if self.phase == Phase::Running {
                    self.phase = Phase::Paused;
                    Ok(())
                } else {
                    Err(EngineError::State {
                        action: "pause",
                        phase: self.phase,
                    })
                };
                let _ = reply.send(res);
            }
            Command::Resume { reply } => {
                let res = if self.phase == Phase::Paused {
                    self.phase = Phase::Running;
                    Ok(())
                } else {
                    Err(EngineError::State {
                        action: "resume",
                        phase: self.phase,
                    })
                };
                let _ = reply.send(res);
            }
            Command::Stop { reply } => {
                if self.run.take().is_some() {
                    debug!("stop: run context discarded, storage stream dropped");
                }
                self.phase = Phase::Idle;
                self.step_id = 0;
                self.step_ts = 0;
                self.last_error = None;
                let _ = self.events.send(EngineEvent::Reset);
                let _ = reply.send(Ok(()));
            }
            Command::Step {
                direction,
                count,
                reply,
            } => self.handle_step(direction, count, reply).await,
            Command::Seek { t, reply } => {
                let res = self.seek_to(t).await;
                let _ = reply.send(res);
            }
            Command::Apply { reply } => self.handle_apply(reply).await,
            Command::Status { reply } => {
                let _ = reply.send(StatusSnapshot {
                    phase: self.phase,
                    step_id: self.step_id,
                    step_ts: self.step_ts,
                    last_error: self.last_error.clone(),
                });
            }
            Command::WsSnapshot { reply } => {
                let entries = self
                    .run
                    .as_ref()
                    .map(|r| r.state.known_sensors().collect())
                    .unwrap_or_default();
                let _ = reply.send(entries);
            }
        }
    }

    async fn handle_start(
        &mut self,
        mut params: StartParams,
        reply: oneshot::Sender<Result<(), EngineError>>,
    ) {
        if !matches!(self.phase, Phase::Idle | Phase::Done | Phase::Error) {
            let _ = reply.send(Err(EngineError::State {
                action: "start",
                phase: self.phase,
            }));
            return;
        }
        if params.sensors.is_empty() {
            let _ = reply.send(Err(EngineError::Input("empty sensor set".to_owned())));
            return;
        }
        if params.from > params.to
            || params.step_micros <= 0
            || params.window_micros <= 0
            || params.speed <= 0.0
            || params.batch_size == 0
        {
            let _ = reply.send(Err(EngineError::Input(
                "invalid replay parameters".to_owned(),
            )));
            return;
        }
        params.sensors.sort_unstable();
        params.sensors.dedup();

        let run_cancel = CancellationToken::new();
        *self.cancel_cell.lock().unwrap() = run_cancel.clone();

        let warmup_events = match self
            .storage
            .warmup(&params.sensors, params.from, &run_cancel)
            .await
        {
            Ok(events) => events,
            Err(err) => {
                let _ = reply.send(Err(EngineError::Storage(err)));
                return;
            }
        };
        let mut state = EngineState::for_sensors(&params.sensors);
        for ev in warmup_events {
            state.seed(ev.sensor, ev.value);
        }

        let stream = if params.from < params.to {
            match self
                .storage
                .stream(
                    &params.sensors,
                    params.from,
                    params.to,
                    params.window_micros,
                    &run_cancel,
                )
                .await
            {
                Ok(stream) => Some(stream),
                Err(err) => {
                    let _ = reply.send(Err(EngineError::Storage(err)));
                    return;
                }
            }
        } else {
            None
        };

        let total_ticks = ((params.to - params.from) / params.step_micros).max(1) as u64;
        let checkpoint_interval = (total_ticks / 64).max(1);

        let mut cache = SnapshotCache::new(self.cache_capacity);
        if params.cache_logging {
            if let Some(logger) = &self.debug_log {
                cache = cache.with_debug_log(logger.clone());
            }
        }
        cache.insert(StateSnapshot {
            step_id: 0,
            step_ts: params.from,
            state: state.clone(),
        });

        self.run = Some(RunContext {
            virtual_now: params.from,
            params,
            state,
            cache,
            stream,
            pending: VecDeque::new(),
            cancel: run_cancel,
            checkpoint_interval,
            ticks_since_checkpoint: 0,
        });
        self.step_id = 0;
        self.step_ts = self.run.as_ref().unwrap().virtual_now;
        self.last_error = None;
        self.phase = if self.run.as_ref().unwrap().virtual_now >= self.run.as_ref().unwrap().params.to {
            Phase::Done
        } else {
            Phase::Running
        };

        let _ = reply.send(Ok(()));
    }

    /// One full tick of the auto-play loop: execute, broadcast, then wait
    /// for either the next command or the wall-clock sleep — whichever
    /// comes first — before advancing the virtual clock.
    async fn run_tick_cycle(&mut self) {
        let tick_started = Instant::now();
        match self.execute_tick().await {
            Ok(payloads) => {
                for payload in &payloads {
                    let _ = self.events.send(EngineEvent::Step(payload.clone()));
                }
            }
            Err(EngineError::Cancel) => {
                if let Some(cmd) = self.cmd_rx.recv().await {
                    self.dispatch(cmd).await;
                }
                return;
            }
            Err(err) => {
                self.note_error(&err);
                return;
            }
        }

        let (speed, step_micros) = {
            let run = self.run.as_ref().unwrap();
            (run.params.speed, run.params.step_micros)
        };
        let target = Duration::from_secs_f64((step_micros as f64 / 1_000_000.0) / speed);
        let sleep_for = target.saturating_sub(tick_started.elapsed());

        tokio::select! {
            biased;
            Some(cmd) = self.cmd_rx.recv() => { self.dispatch(cmd).await; }
            () = tokio::time::sleep(sleep_for) => {}
        }

        self.advance_clock_or_finish();
    }

    /// Advances the virtual clock past the tick that was just completed,
    /// taking a checkpoint first if this tick lands on the interval. A
    /// no-op once the run has ended (stopped, done, or errored).
    fn advance_clock_or_finish(&mut self) {
        if matches!(self.phase, Phase::Done | Phase::Error) {
            return;
        }
        let step_id = self.step_id;
        let step_ts = self.step_ts;
        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.ticks_since_checkpoint += 1;
        if run.ticks_since_checkpoint >= run.checkpoint_interval {
            run.ticks_since_checkpoint = 0;
            run.cache.insert(StateSnapshot {
                step_id,
                step_ts: run.virtual_now,
                state: run.state.clone(),
            });
        }
        run.virtual_now += run.params.step_micros;
        if run.virtual_now >= run.params.to {
            self.phase = Phase::Done;
            run.cancel.cancel();
            info!(step_id, "replay reached the end of its range");
        }
    }

    /// Merges coalesced events into state, builds and emits sub-batches,
    /// and reports the tick's payloads (empty if nothing was dirty — an
    /// empty tick is never emitted, matching the "empty payload is not
    /// emitted" boundary case).
    async fn execute_tick(&mut self) -> Result<Vec<StepPayload>, EngineError> {
        let virtual_now = self.run.as_ref().unwrap().virtual_now;
        let updates = self.collect_tick_updates(virtual_now).await?;

        let run = self.run.as_mut().unwrap();
        for (sensor, value) in &updates {
            run.state.apply(*sensor, *value);
        }
        let dirty = run.state.dirty_sensors();
        if dirty.is_empty() {
            return Ok(Vec::new());
        }

        self.step_id += 1;
        self.step_ts = virtual_now;
        let run = self.run.as_ref().unwrap();
        let payloads = build_step_payloads(
            self.step_id,
            self.step_ts,
            &dirty,
            &run.state,
            run.params.batch_size,
        );

        for payload in &payloads {
            let run = self.run.as_ref().unwrap();
            if let Err(err) = self.sink.send(payload, &run.cancel).await {
                warn!(step_id = payload.step_id, batch_id = payload.batch_id, error = %err, "output sink rejected batch");
                self.run.as_mut().unwrap().state.clear_dirty();
                return Err(EngineError::Sink(err));
            }
        }
        self.run.as_mut().unwrap().state.clear_dirty();
        Ok(payloads)
    }

    /// Reads from the carry-over buffer and the storage channel until the
    /// head event is strictly after `virtual_now`, coalescing to the latest
    /// value per sensor. Relies on the storage contract's cross-batch
    /// monotonicity: once one event beyond `virtual_now` is seen, every
    /// subsequent event (same batch or later) is too, so it is safe to stop
    /// pulling more windows.
    async fn collect_tick_updates(
        &mut self,
        virtual_now: TimestampMicros,
    ) -> Result<HashMap<SensorHash, f64>, EngineError> {
        let mut updates = HashMap::new();
        loop {
            let run = self.run.as_mut().unwrap();
            while let Some(front) = run.pending.front() {
                if front.timestamp > virtual_now {
                    break;
                }
                let ev = run.pending.pop_front().unwrap();
                updates.insert(ev.sensor, ev.value);
            }
            if run.pending.front().is_some_and(|ev| ev.timestamp > virtual_now) {
                break;
            }
            if run.stream.is_none() {
                break;
            }

            let cancel = run.cancel.clone();
            let batch = {
                let run = self.run.as_mut().unwrap();
                let stream = run.stream.as_mut().unwrap();
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(EngineError::Cancel),
                    batch = stream.data.recv() => batch,
                }
            };

            match batch {
                Some(events) => {
                    let run = self.run.as_mut().unwrap();
                    for ev in events {
                        if ev.timestamp <= virtual_now {
                            updates.insert(ev.sensor, ev.value);
                        } else {
                            run.pending.push_back(ev);
                        }
                    }
                }
                None => {
                    let run = self.run.as_mut().unwrap();
                    if let Ok(err) = run.stream.as_mut().unwrap().errors.try_recv() {
                        return Err(EngineError::Storage(err));
                    }
                    run.stream = None;
                    break;
                }
            }
        }
        Ok(updates)
    }

    async fn handle_apply(&mut self, reply: oneshot::Sender<Result<Vec<StepPayload>, EngineError>>) {
        if self.run.is_none() || !matches!(self.phase, Phase::Running | Phase::Paused | Phase::Done) {
            let _ = reply.send(Err(EngineError::State {
                action: "apply",
                phase: self.phase,
            }));
            return;
        }
        self.run.as_mut().unwrap().state.mark_all_dirty();
        let dirty = self.run.as_ref().unwrap().state.dirty_sensors();
        if dirty.is_empty() {
            let _ = reply.send(Ok(Vec::new()));
            return;
        }
        let payloads = {
            let run = self.run.as_ref().unwrap();
            build_step_payloads(self.step_id, self.step_ts, &dirty, &run.state, run.params.batch_size)
        };
        for payload in &payloads {
            let cancel = self.run.as_ref().unwrap().cancel.clone();
            if let Err(err) = self.sink.send(payload, &cancel).await {
                self.run.as_mut().unwrap().state.clear_dirty();
                let _ = reply.send(Err(EngineError::Sink(err)));
                return;
            }
            let _ = self.events.send(EngineEvent::Step(payload.clone()));
        }
        self.run.as_mut().unwrap().state.clear_dirty();
        let _ = reply.send(Ok(payloads));
    }

    async fn handle_step(
        &mut self,
        direction: StepDirection,
        count: u32,
        reply: oneshot::Sender<Result<Vec<StepPayload>, EngineError>>,
    ) {
        if self.run.is_none() || !matches!(self.phase, Phase::Running | Phase::Paused) {
            let _ = reply.send(Err(EngineError::State {
                action: "step",
                phase: self.phase,
            }));
            return;
        }
        match direction {
            StepDirection::Forward => {
                let mut emitted = Vec::new();
                for _ in 0..count {
                    if !matches!(self.phase, Phase::Running | Phase::Paused) {
                        break;
                    }
                    match self.execute_tick().await {
                        Ok(payloads) => {
                            for payload in &payloads {
                                let _ = self.events.send(EngineEvent::Step(payload.clone()));
                            }
                            emitted.extend(payloads);
                            self.advance_clock_or_finish();
                        }
                        Err(EngineError::Cancel) => {
                            let _ = reply.send(Err(EngineError::Cancel));
                            return;
                        }
                        Err(err) => {
                            self.note_error(&err);
                            let _ = reply.send(Err(err));
                            return;
                        }
                    }
                }
                let _ = reply.send(Ok(emitted));
            }
            StepDirection::Backward => {
                let target = {
                    let run = self.run.as_ref().unwrap();
                    (run.virtual_now - i64::from(count) * run.params.step_micros).max(run.params.from)
                };
                let res = self.seek_to(target).await;
                let _ = reply.send(res.map(|()| Vec::new()));
            }
        }
    }

    /// Shared primitive behind `seek()` and `stepBackward()`: restore from
    /// the nearest-earlier snapshot (or rerun warmup), reopen the storage
    /// stream from that point, and silently replay up to `target` with no
    /// emission.
    async fn seek_to(&mut self, target: TimestampMicros) -> Result<(), EngineError> {
        {
            let run = self.run.as_ref().ok_or(EngineError::State {
                action: "seek",
                phase: self.phase,
            })?;
            if target < run.params.from || target > run.params.to {
                return Err(EngineError::State {
                    action: "seek",
                    phase: self.phase,
                });
            }
        }

        let snapshot = self.run.as_ref().unwrap().cache.floor(target).cloned();
        let (mut state, restore_point, restored_step_id) = match snapshot {
            Some(snap) => (snap.state, snap.step_ts, snap.step_id),
            None => {
                let (sensors, from) = {
                    let run = self.run.as_ref().unwrap();
                    (run.params.sensors.clone(), run.params.from)
                };
                let cancel = self.run.as_ref().unwrap().cancel.clone();
                let events = self
                    .storage
                    .warmup(&sensors, from, &cancel)
                    .await
                    .map_err(EngineError::Storage)?;
                let mut state = EngineState::for_sensors(&sensors);
                for ev in events {
                    state.seed(ev.sensor, ev.value);
                }
                (state, from, 0)
            }
        };

        let (sensors, to, window) = {
            let run = self.run.as_ref().unwrap();
            (run.params.sensors.clone(), run.params.to, run.params.window_micros)
        };
        let cancel = self.run.as_ref().unwrap().cancel.clone();
        let new_stream = if restore_point < to {
            Some(
                self.storage
                    .stream(&sensors, restore_point, to, window, &cancel)
                    .await
                    .map_err(EngineError::Storage)?,
            )
        } else {
            None
        };

        {
            let run = self.run.as_mut().unwrap();
            run.pending.clear();
            run.stream = new_stream;
            run.virtual_now = restore_point;
        }
        self.step_id = restored_step_id;
        self.step_ts = restore_point;

        if restore_point < target {
            let updates = self.collect_tick_updates(target).await?;
            for (sensor, value) in updates {
                state.apply(sensor, value);
            }
            state.clear_dirty();
        }

        let run = self.run.as_mut().unwrap();
        run.state = state;
        run.virtual_now = target;
        self.step_ts = target;
        if let Some(logger) = &self.debug_log {
            logger.log(format!("seek restored to t={restore_point}, replayed silently to t={target}"));
        }
        Ok(())
    }

    fn note_error(&mut self, err: &EngineError) {
        let kind = err.kind();
        error!(error = %err, ?kind, "engine entering error state");
        self.last_error = Some(LastError {
            kind,
            message: err.to_string(),
        });
        self.phase = Phase::Error;
        if let Some(run) = self.run.as_ref() {
            run.cancel.cancel();
        }
        let _ = self.events.send(EngineEvent::Reset);
    }
}

/// Splits dirty sensors (already hash-ascending) into sub-batches of at
/// most `batch_size`, building one `StepPayload` per chunk with a shared
/// `step_id`/`step_ts` and a 1-based `batch_id`.
fn build_step_payloads(
    step_id: u64,
    step_ts: TimestampMicros,
    dirty: &[SensorHash],
    state: &EngineState,
    batch_size: u32,
) -> Vec<StepPayload> {
    let batch_size = batch_size.max(1) as usize;
    let chunks: Vec<&[SensorHash]> = dirty.chunks(batch_size).collect();
    let batch_total = chunks.len().max(1) as u32;
    chunks
        .into_iter()
        .enumerate()
        .map(|(idx, chunk)| {
            let updates = chunk
                .iter()
                .map(|&hash| {
                    let slot = state.slot(hash).expect("dirty sensor must be in state");
                    SensorUpdate {
                        id: hash,
                        value: slot.value,
                        has_value: slot.has_value,
                    }
                })
                .collect();
            StepPayload {
                step_id,
                step_ts,
                batch_id: (idx + 1) as u32,
                batch_total,
                updates,
            }
        })
        .collect()
}
