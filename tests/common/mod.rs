#![allow(dead_code)]

use chrono::{DateTime, TimeDelta, Utc};
use solar_fleet::config::{CarSeed, Config};
use solar_fleet::db::{CredentialsStorage, NewToken};
use solar_fleet::fleet::Fleet;
use solar_fleet::fleet_api::region::Region;
use solar_fleet::fleet_api::{FleetApiClient, FleetApiService};
use solar_fleet::relay::BackendRelay;
use solar_fleet::relay::logger::LocalLoggerApi;
use solar_fleet::service::token_manager::TokenManager;
use std::sync::Arc;
use url::Url;
use wiremock::MockServer;

pub const INSTALLATION_ID: &str = "test-installation";

/// Everything wired against one mock server that stands in for the vendor
/// API, the token endpoint, the backend relay and the local logger.
pub struct Harness {
    pub server: MockServer,
    pub cfg: Config,
    pub storage: CredentialsStorage,
    pub fleet: Arc<Fleet>,
    pub tokens: Arc<TokenManager>,
    pub service: FleetApiService,
}

pub fn car_seed(id: i64, vin: &str) -> CarSeed {
    CarSeed {
        id,
        vin: Some(vin.to_string()),
        name: None,
        minimum_soc: 0,
        priority: 1,
        should_be_managed: true,
    }
}

pub fn test_config(server: &MockServer) -> Config {
    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    let mut cfg = Config::default();
    cfg.fleet_api.client_id = "client".to_string();
    cfg.fleet_api.token_url = base.join("oauth2/v3/token").unwrap();
    cfg.fleet_api.china_base_url = base.clone();
    cfg.fleet_api.regional_base_url_template = format!("{}", base);
    cfg.fleet_api.wake_settle_secs = 0;
    cfg.fleet_api.amp_resend_delay_secs = 0;
    cfg.backend.base_url = base.join("api/").unwrap();
    cfg.backend.installation_id = Some(INSTALLATION_ID.to_string());
    cfg.local_logger.base_url = Some(base.join("logger/").unwrap());
    cfg
}

impl Harness {
    pub async fn new(cars: &[CarSeed]) -> Self {
        Self::with_config(cars, |_, _| {}).await
    }

    /// `tweak` receives the config and the mock server's base URL.
    pub async fn with_config(cars: &[CarSeed], tweak: impl FnOnce(&mut Config, &Url)) -> Self {
        let server = MockServer::start().await;
        let mut cfg = test_config(&server);
        let base = Url::parse(&format!("{}/", server.uri())).unwrap();
        tweak(&mut cfg, &base);

        let storage = CredentialsStorage::in_memory().await.unwrap();
        for seed in cars {
            storage.upsert_car(seed).await.unwrap();
        }
        let fleet = Arc::new(Fleet::load(&storage).await.unwrap());
        let http = reqwest::Client::new();
        let relay = BackendRelay::new(http.clone(), &cfg.backend, INSTALLATION_ID);
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
            storage.clone(),
            fleet.clone(),
            logger,
            &cfg.fleet_api,
            cfg.jobs.telemetry_concurrency,
        );
        Self {
            server,
            cfg,
            storage,
            fleet,
            tokens,
            service,
        }
    }

    /// Store a China-region token, so vendor calls go to the mock server.
    pub async fn store_token(&self, expires_at: DateTime<Utc>) -> i64 {
        self.storage
            .replace_tokens(NewToken {
                access_token: "access".to_string(),
                refresh_token: "refresh".to_string(),
                id_token: None,
                expires_at,
                region: Region::China,
            })
            .await
            .unwrap()
    }

    pub async fn store_valid_token(&self) -> i64 {
        self.store_token(Utc::now() + TimeDelta::hours(8)).await
    }

    pub async fn config_rows(&self, key: &str) -> i64 {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM configurations WHERE key = ?")
            .bind(key)
            .fetch_one(self.storage.pool())
            .await
            .unwrap();
        row.0
    }
}

pub fn command_reply(result: bool, reason: &str) -> serde_json::Value {
    serde_json::json!({ "response": { "result": result, "reason": reason } })
}
