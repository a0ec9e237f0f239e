use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use replay_engine::{EngineHandle, EngineRuntimeConfig};
use replay_sink::{HashParamNamer, HttpQuerySink, LineWriterSink, NameParamNamer, OutputSink, WorkerPoolHttpQuerySink};
use replay_storage::{PostgresStorage, StorageAdapter};
use sensor_registry::{InMemorySensorRegistry, SensorRegistry};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputMode {
    /// Write one human-readable line per batch to stdout. Default — useful
    /// for smoke-testing a registry/range before pointing at a live sink.
    Line,
    /// Synchronous HTTP query sink, one request per batch.
    Http,
    /// Worker-pool HTTP query sink; `send` enqueues and returns immediately.
    HttpPool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ParamStyle {
    Hash,
    Name,
}

/// Replays historical sensor events on a virtual clock into a pluggable
/// output sink, with an HTTP control plane for starting, pausing, seeking,
/// and stepping the replay.
#[derive(Parser, Debug)]
#[command(name = "timemachine", version, about)]
struct Cli {
    /// Postgres connection string for the history store.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Path to the newline-delimited `name[,hash]` sensor registry file.
    #[arg(long, env = "REGISTRY_PATH")]
    registry: String,

    /// Comma-separated sensor names to replay. Defaults to every sensor in
    /// the registry.
    #[arg(long, value_delimiter = ',')]
    sensors: Vec<String>,

    /// Replay start, microseconds since the Unix epoch. Defaults to the
    /// earliest known event for the selected sensors.
    #[arg(long)]
    from: Option<i64>,

    /// Replay end, microseconds since the Unix epoch, exclusive. Defaults
    /// to the latest known event for the selected sensors.
    #[arg(long)]
    to: Option<i64>,

    /// Virtual-clock tick size, in microseconds.
    #[arg(long, default_value_t = 1_000_000)]
    step_micros: i64,

    /// Storage stream window size, in microseconds.
    #[arg(long, default_value_t = 60_000_000)]
    window_micros: i64,

    /// Playback speed multiplier (2.0 = twice real time).
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Maximum sensors per emitted sub-batch.
    #[arg(long, default_value_t = 64)]
    batch_size: u32,

    #[arg(long, value_enum, default_value_t = OutputMode::Line)]
    output_mode: OutputMode,

    /// HTTP endpoint for `--output-mode http`/`http-pool`.
    #[arg(long)]
    http_endpoint: Option<String>,

    /// `supplier=` value sent with every HTTP sink request.
    #[arg(long, default_value = "timemachine")]
    http_supplier: String,

    #[arg(long, value_enum, default_value_t = ParamStyle::Hash)]
    param_style: ParamStyle,

    /// Worker count for `--output-mode http-pool`.
    #[arg(long, default_value_t = 4)]
    worker_count: usize,

    /// Per-worker queue depth for `--output-mode http-pool`.
    #[arg(long, default_value_t = 64)]
    worker_queue_depth: usize,

    /// Address the control-plane HTTP/WS server listens on.
    #[arg(long, default_value = "0.0.0.0:8088")]
    bind_addr: SocketAddr,

    /// Idle timeout before a claimed control session is reclaimable.
    #[arg(long, default_value_t = 300)]
    session_timeout_secs: u64,

    /// `/ws/state` update-coalescing window, in milliseconds.
    #[arg(long, default_value_t = 100)]
    ws_batch_millis: u64,

    /// Log every snapshot-cache hit/miss and seek restore to the UI logger.
    #[arg(long)]
    cache_logging: bool,

    /// Print the min/max timestamp and event counts for the selected sensor
    /// set, then exit without starting the server.
    #[arg(long)]
    print_range: bool,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cli.log_level.clone()))
        .init();

    let registry_source =
        fs::read_to_string(&cli.registry).with_context(|| format!("reading registry file {}", cli.registry))?;
    let registry = InMemorySensorRegistry::parse(&registry_source).context("parsing sensor registry")?;

    let sensors = resolve_sensors(&cli.sensors, &registry)?;

    let pool = replay_storage::postgres::connect(&cli.database_url)
        .await
        .context("connecting to the history store")?;
    replay_storage::postgres::run_migrations(&pool)
        .await
        .context("running storage migrations")?;

    if cli.print_range {
        let storage = PostgresStorage::new(pool, registry);
        let cancel = CancellationToken::new();
        let result = storage
            .range(&sensors, cli.from, cli.to, &cancel)
            .await
            .context("querying available range")?;
        println!(
            "min={} max={} known_count={} unknown_count={}",
            result.min, result.max, result.known_count, result.unknown_count
        );
        return Ok(());
    }

    let range_storage = PostgresStorage::new(pool.clone(), registry.clone());
    let replay_storage_adapter = PostgresStorage::new(pool, registry.clone());

    let sink = build_sink(&cli, &registry)?;

    let (from, to) = resolve_window(&cli, &range_storage, &sensors).await?;

    let engine = EngineHandle::spawn(replay_storage_adapter, sink, EngineRuntimeConfig::default(), None);

    let start_params = replay_protocol::StartParams {
        sensors: sensors.clone(),
        from,
        to,
        step_micros: cli.step_micros,
        window_micros: cli.window_micros,
        speed: cli.speed,
        batch_size: cli.batch_size,
        save_output: !matches!(cli.output_mode, OutputMode::Line),
        cache_logging: cli.cache_logging,
    };
    engine
        .start(start_params)
        .await
        .context("starting the replay engine with the resolved CLI parameters")?;

    let state = control_plane::AppState::new(
        engine,
        range_storage,
        registry,
        Duration::from_secs(cli.session_timeout_secs),
        Duration::from_millis(cli.ws_batch_millis),
    );

    info!(
        sensors = sensors.len(),
        from,
        to,
        "replay started, control plane ready"
    );

    let router = control_plane::build_router(state);
    let listener = tokio::net::TcpListener::bind(cli.bind_addr)
        .await
        .with_context(|| format!("binding {}", cli.bind_addr))?;
    info!(addr = %cli.bind_addr, "control plane listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("control plane server error")?;
    info!("shut down gracefully");
    Ok(())
}

fn resolve_sensors(names: &[String], registry: &InMemorySensorRegistry) -> Result<Vec<i64>> {
    if names.is_empty() {
        return Ok(registry.all_hashes());
    }
    names
        .iter()
        .map(|name| {
            registry
                .name_to_hash(name)
                .with_context(|| format!("sensor {name:?} is not present in the registry"))
        })
        .collect()
}

async fn resolve_window(
    cli: &Cli,
    storage: &PostgresStorage<InMemorySensorRegistry>,
    sensors: &[i64],
) -> Result<(i64, i64)> {
    if let (Some(from), Some(to)) = (cli.from, cli.to) {
        return Ok((from, to));
    }
    let cancel = CancellationToken::new();
    let range = storage
        .range(sensors, cli.from, cli.to, &cancel)
        .await
        .context("resolving default replay window from storage range")?;
    Ok((cli.from.unwrap_or(range.min), cli.to.unwrap_or(range.max)))
}

fn build_sink(cli: &Cli, registry: &InMemorySensorRegistry) -> Result<SinkKind> {
    match cli.output_mode {
        OutputMode::Line => Ok(SinkKind::Line(LineWriterSink::new(Box::new(std::io::stdout())))),
        OutputMode::Http => {
            let endpoint = cli
                .http_endpoint
                .clone()
                .context("--http-endpoint is required for --output-mode http")?;
            Ok(match cli.param_style {
                ParamStyle::Hash => SinkKind::Http(HttpQuerySink::new(endpoint, cli.http_supplier.clone(), HashParamNamer)),
                ParamStyle::Name => SinkKind::HttpNamed(HttpQuerySink::new(
                    endpoint,
                    cli.http_supplier.clone(),
                    NameParamNamer { registry: registry.clone() },
                )),
            })
        }
        OutputMode::HttpPool => {
            let endpoint = cli
                .http_endpoint
                .clone()
                .context("--http-endpoint is required for --output-mode http-pool")?;
            Ok(match cli.param_style {
                ParamStyle::Hash => SinkKind::Pool(WorkerPoolHttpQuerySink::start(
                    cli.worker_count,
                    cli.worker_queue_depth,
                    endpoint,
                    cli.http_supplier.clone(),
                    HashParamNamer,
                )),
                ParamStyle::Name => SinkKind::PoolNamed(WorkerPoolHttpQuerySink::start(
                    cli.worker_count,
                    cli.worker_queue_depth,
                    endpoint,
                    cli.http_supplier.clone(),
                    NameParamNamer { registry: registry.clone() },
                )),
            })
        }
    }
}

/// Erases the concrete sink type chosen at the CLI boundary so a single
/// generic `O: OutputSink` satisfies [`EngineHandle::spawn`].
enum SinkKind {
    Line(LineWriterSink),
    Http(HttpQuerySink<HashParamNamer>),
    HttpNamed(HttpQuerySink<NameParamNamer<InMemorySensorRegistry>>),
    Pool(WorkerPoolHttpQuerySink),
    PoolNamed(WorkerPoolHttpQuerySink),
}

impl OutputSink for SinkKind {
    async fn send(
        &self,
        payload: &replay_protocol::StepPayload,
        cancel: &CancellationToken,
    ) -> Result<(), replay_sink::SinkError> {
        match self {
            Self::Line(sink) => sink.send(payload, cancel).await,
            Self::Http(sink) => sink.send(payload, cancel).await,
            Self::HttpNamed(sink) => sink.send(payload, cancel).await,
            Self::Pool(sink) => sink.send(payload, cancel).await,
            Self::PoolNamed(sink) => sink.send(payload, cancel).await,
        }
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
