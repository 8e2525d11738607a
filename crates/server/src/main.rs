use std::{error::Error, sync::Arc, time::Duration};

use axum::Router;
use cache::{Cache, MemoryCache, RedisCache};
use database::{DatabaseConnectionInfo, MemoryStore, PgStore, Store};
use realtime::{monitor::MemoryMonitor, RealtimeState};
use routing::{GraphHandle, RoutePlanner};
use simulation::{SimulationConfig, SimulationEngine, COVERAGE_INTERVAL_SECS, TICK_INTERVAL};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

mod config;
mod demo;
mod plan;

use config::AppConfig;

/// Grace given to in-flight work at shutdown before the process exits.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::from_env();
    if let Err(why) = run(config).await {
        error!("fatal: {why}");
        std::process::exit(1);
    }
}

/// Resolves the store and cache backends from the environment and enters
/// the generic serve loop with the concrete pairing.
async fn run(config: AppConfig) -> Result<(), Box<dyn Error>> {
    let database = DatabaseConnectionInfo::from_env();
    let redis_url = config.redis_url.clone();

    match (database, redis_url) {
        (Some(info), Some(url)) => {
            let store = Arc::new(PgStore::connect(info).await?);
            let cache = Arc::new(RedisCache::connect(&url).await?);
            serve(config, store, cache).await
        }
        (Some(info), None) => {
            warn!("REDIS_URL not set, using the in-memory cache");
            let store = Arc::new(PgStore::connect(info).await?);
            serve(config, store, Arc::new(MemoryCache::new())).await
        }
        (None, Some(url)) => {
            warn!("DATABASE_* not set, using the in-memory store");
            let cache = Arc::new(RedisCache::connect(&url).await?);
            serve(config, Arc::new(MemoryStore::new()), cache).await
        }
        (None, None) => {
            warn!("DATABASE_* and REDIS_URL not set, running fully in-memory");
            serve(
                config,
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryCache::new()),
            )
            .await
        }
    }
}

async fn serve<S: Store, C: Cache>(
    config: AppConfig,
    store: Arc<S>,
    cache: Arc<C>,
) -> Result<(), Box<dyn Error>> {
    // routes first, then graph, then everything that reads them
    demo::seed_if_empty(&store).await?;
    routing::rebuild_and_persist(store.as_ref()).await?;
    let graph = Arc::new(GraphHandle::new());
    graph.reload(store.as_ref()).await?;

    let shutdown = CancellationToken::new();
    let state = RealtimeState::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        &config.jwt_secret,
        shutdown.clone(),
    );
    let planner = Arc::new(RoutePlanner::new(Arc::clone(&graph), Arc::clone(&cache)));
    let engine = SimulationEngine::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        Arc::clone(&state.hub),
        Arc::clone(&state.hybrid),
        SimulationConfig {
            target_buses: config.simulation_target_buses,
            seed: None,
        },
    );
    engine.spawn_fleet().await?;

    let monitor = Arc::new(MemoryMonitor::new());
    register_gauges(&monitor, &state);

    let tasks = spawn_background_tasks(
        shutdown.clone(),
        Arc::clone(&engine),
        Arc::clone(&state),
        Arc::clone(&monitor),
    );

    let router = Router::new()
        .merge(realtime::routes(Arc::clone(&state)))
        .nest(
            "/api",
            plan::routes(plan::PlanState {
                store: Arc::clone(&store),
                planner: Arc::clone(&planner),
            }),
        )
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("listening on {}", config.bind_addr);

    let server_shutdown = shutdown.clone();
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {},
                _ = server_shutdown.cancelled() => {},
            }
        })
        .await?;

    // shutdown: stop the loops, cancel grace timers, drain briefly
    info!("shutting down");
    shutdown.cancel();
    state.hybrid.drain_grace_timers();
    let drain = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_DRAIN, drain).await.is_err() {
        warn!("background tasks did not stop within 10s, exiting anyway");
    }
    Ok(())
}

fn register_gauges<S: Store, C: Cache>(
    monitor: &Arc<MemoryMonitor>,
    state: &Arc<RealtimeState<S, C>>,
) {
    let hybrid = Arc::clone(&state.hybrid);
    monitor.register("owned_buses", move || hybrid.tracked_buses());
    let drivers = Arc::clone(&state.drivers);
    monitor.register("tracked_drivers", move || drivers.tracked_drivers());
    let safety = Arc::clone(&state.safety);
    monitor.register("safety_records", move || safety.tracked_drivers());
    let notifier = Arc::clone(&state.notifier);
    monitor.register("ratelimit_fallback", move || notifier.fallback_len());
    let hub = Arc::clone(&state.hub);
    monitor.register("driver_sockets", move || hub.connected_drivers());
}

fn spawn_background_tasks<S: Store, C: Cache>(
    shutdown: CancellationToken,
    engine: Arc<SimulationEngine<S, C>>,
    state: Arc<RealtimeState<S, C>>,
    monitor: Arc<MemoryMonitor>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut tasks = Vec::new();

    // simulation tick, 3s
    let token = shutdown.clone();
    let tick_engine = Arc::clone(&engine);
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => tick_engine.tick().await,
            }
        }
    }));

    // idle detection, 60s
    let token = shutdown.clone();
    let drivers = Arc::clone(&state.drivers);
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(
            realtime::IDLE_CHECK_INTERVAL_SECS,
        ));
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    let idled = drivers.idle_sweep().await;
                    if !idled.is_empty() {
                        info!("idle detector moved {} drivers to IDLE", idled.len());
                    }
                }
            }
        }
    }));

    // memory monitor, 30s
    let token = shutdown.clone();
    let monitor_task = Arc::clone(&monitor);
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(
            realtime::MONITOR_INTERVAL_SECS,
        ));
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => monitor_task.tick(),
            }
        }
    }));

    // coverage watchdog, 5min
    let token = shutdown.clone();
    let coverage_engine = Arc::clone(&engine);
    tasks.push(tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(COVERAGE_INTERVAL_SECS));
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => coverage_engine.coverage_sweep().await,
            }
        }
    }));

    // rate-limit fallback sweep, 60s
    let token = shutdown;
    let notifier = Arc::clone(&state.notifier);
    tasks.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => notifier.sweep_fallback(),
            }
        }
    }));

    tasks
}
