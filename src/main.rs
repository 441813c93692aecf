use mimalloc::MiMalloc;
use solar_fleet::config::CONFIG;
use solar_fleet::db::CredentialsStorage;
use solar_fleet::fleet::Fleet;
use solar_fleet::fleet_api::{FleetApiClient, FleetApiService};
use solar_fleet::relay::logger::LocalLoggerApi;
use solar_fleet::relay::{BackendRelay, resolve_installation_id};
use solar_fleet::router::{AppState, fleet_router};
use solar_fleet::service::scheduler::Scheduler;
use solar_fleet::service::token_manager::TokenManager;
use solar_fleet::types::job::JobContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cfg = &*CONFIG;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.basic.loglevel.clone()));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    info!(
        database_url = %cfg.basic.database_url,
        listen_addr = %cfg.basic.listen_addr,
        loglevel = %cfg.basic.loglevel,
        use_proxy = cfg.fleet_api.use_proxy,
        cars = cfg.cars.len()
    );
    if cfg.fleet_api.client_id.is_empty() {
        warn!("fleet_api.client_id is empty; token refresh will be rejected");
    }

    let storage = CredentialsStorage::connect(&cfg.basic.database_url).await?;
    for seed in &cfg.cars {
        storage.upsert_car(seed).await?;
    }
    let fleet = Arc::new(Fleet::load(&storage).await?);

    let http = reqwest::Client::builder()
        .user_agent(concat!("solar-fleet/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(cfg.fleet_api.request_timeout_secs))
        .build()?;

    let installation_id = resolve_installation_id(&storage, &cfg.backend).await?;
    info!(installation_id = %installation_id, "Using installation id");
    let relay = BackendRelay::new(http.clone(), &cfg.backend, installation_id);

    let tokens = Arc::new(TokenManager::new(
        storage.clone(),
        relay.clone(),
        http.clone(),
        cfg.fleet_api.clone(),
        fleet.clone(),
    ));
    let client = FleetApiClient::new(
        http.clone(),
        cfg.fleet_api.clone(),
        storage.clone(),
        tokens.clone(),
        relay,
        fleet.clone(),
    );
    let logger = LocalLoggerApi::new(http, cfg.local_logger.base_url.clone());
    let service = FleetApiService::new(
        client,
        storage,
        fleet,
        logger,
        &cfg.fleet_api,
        cfg.jobs.telemetry_concurrency,
    );

    let ctx = Arc::new(JobContext {
        tokens: tokens.clone(),
        service: service.clone(),
    });
    let scheduler = Scheduler::start(ctx, &cfg.jobs).await?;

    let state = AppState::new(service, tokens, cfg.basic.status_key.as_str());
    let app = fleet_router(state);

    let listener = TcpListener::bind(&cfg.basic.listen_addr).await?;
    info!("HTTP server listening on {}", cfg.basic.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    scheduler.stop().await;
    Ok(())
}
