use std::sync::Arc;
use std::time::Duration;

use replay_engine::EngineHandle;
use replay_storage::PostgresStorage;
use replay_ui_log::UiLogger;
use sensor_registry::InMemorySensorRegistry;
use tokio::sync::broadcast;

use crate::session::SessionManager;

/// Default `wsBatchTime`: how long the `/ws/state` fan-out coalesces tick
/// emissions before flushing an `updates` message.
pub const DEFAULT_WS_BATCH: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    /// Separate handle onto the same backing store, used only for the
    /// read-only `range` passthrough so it never competes with the engine's
    /// own pool usage for a lock or a connection slot tied up by replay.
    pub range_storage: Arc<PostgresStorage<InMemorySensorRegistry>>,
    pub registry: InMemorySensorRegistry,
    pub sessions: Arc<SessionManager>,
    pub ws_batch: Duration,
    pub logger: Arc<UiLogger<String>>,
}

impl AppState {
    #[must_use]
    pub fn new(
        engine: EngineHandle,
        range_storage: PostgresStorage<InMemorySensorRegistry>,
        registry: InMemorySensorRegistry,
        control_timeout: Duration,
        ws_batch: Duration,
    ) -> Self {
        let (log_tx, _) = broadcast::channel(500);
        let logger = Arc::new(UiLogger::with_buffer(log_tx, |entry| entry, 500));
        Self {
            engine,
            range_storage: Arc::new(range_storage),
            registry,
            sessions: Arc::new(SessionManager::new(control_timeout)),
            ws_batch,
            logger,
        }
    }
}
