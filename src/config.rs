use crate::error::FleetError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

pub const DEFAULT_TOKEN_URL: &str = "https://auth.tesla.com/oauth2/v3/token";
pub const DEFAULT_CHINA_BASE_URL: &str = "https://fleet-api.prd.cn.vn.cloud.tesla.cn/";
pub const DEFAULT_REGIONAL_BASE_URL_TEMPLATE: &str =
    "https://fleet-api.prd.{region}.vn.cloud.tesla.com/";

/// Process-wide configuration, resolved once on first access.
pub static CONFIG: LazyLock<Config> = LazyLock::new(|| {
    Config::load().unwrap_or_else(|e| panic!("failed to load configuration: {e}"))
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub basic: BasicConfig,
    pub fleet_api: FleetApiConfig,
    pub backend: BackendConfig,
    pub local_logger: LocalLoggerConfig,
    pub jobs: JobsConfig,
    pub cars: Vec<CarSeed>,
}

impl Config {
    /// Defaults, then `config.toml`, then `SOLAR_FLEET_*` environment variables.
    pub fn load() -> Result<Self, FleetError> {
        let cfg = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("SOLAR_FLEET_").split("__"))
            .extract()?;
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicConfig {
    pub database_url: String,
    pub loglevel: String,
    pub listen_addr: String,
    /// Shared key for the status surface.
    pub status_key: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://solar-fleet.sqlite".to_string(),
            loglevel: "info".to_string(),
            listen_addr: "0.0.0.0:8000".to_string(),
            status_key: "solar-fleet".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetApiConfig {
    pub client_id: String,
    pub token_url: Url,
    pub china_base_url: Url,
    /// `{region}` is replaced by the region code (`eu`, `na`).
    pub regional_base_url_template: String,
    pub use_proxy: bool,
    pub proxy_base_url: Option<Url>,
    pub request_timeout_secs: u64,
    /// Mirror every vendor response to the backend error reporter.
    pub report_responses: bool,
    pub max_unauthorized_count: i64,
    pub token_request_wait_minutes: i64,
    pub wake_settle_secs: u64,
    pub amp_resend_delay_secs: u64,
    pub refresh_per_minute: u32,
}

impl Default for FleetApiConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            token_url: Url::parse(DEFAULT_TOKEN_URL).expect("static token url"),
            china_base_url: Url::parse(DEFAULT_CHINA_BASE_URL).expect("static china url"),
            regional_base_url_template: DEFAULT_REGIONAL_BASE_URL_TEMPLATE.to_string(),
            use_proxy: false,
            proxy_base_url: None,
            request_timeout_secs: 30,
            report_responses: false,
            max_unauthorized_count: 5,
            token_request_wait_minutes: 20,
            wake_settle_secs: 20,
            amp_resend_delay_secs: 3,
            refresh_per_minute: 10,
        }
    }
}

impl FleetApiConfig {
    pub fn wake_settle(&self) -> Duration {
        Duration::from_secs(self.wake_settle_secs)
    }

    pub fn amp_resend_delay(&self) -> Duration {
        Duration::from_secs(self.amp_resend_delay_secs)
    }

    pub fn token_request_wait(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::minutes(self.token_request_wait_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: Url,
    /// Overrides the persisted installation id when set.
    pub installation_id: Option<String>,
    pub probe_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://www.teslasolarcharger.de/api/")
                .expect("static backend url"),
            installation_id: None,
            probe_timeout_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalLoggerConfig {
    /// Base URL of the local logger API; resume calls are skipped when unset.
    pub base_url: Option<Url>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub telemetry_secs: u64,
    pub token_refresh_secs: u64,
    pub charge_control_secs: u64,
    pub housekeeping_secs: u64,
    pub telemetry_concurrency: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            telemetry_secs: 30,
            token_refresh_secs: 60,
            charge_control_secs: 30,
            housekeeping_secs: 300,
            telemetry_concurrency: 2,
        }
    }
}

/// Static car definition merged into the `cars` table on start-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarSeed {
    pub id: i64,
    pub vin: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub minimum_soc: i64,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub should_be_managed: bool,
}

fn default_priority() -> i64 {
    1
}

fn default_true() -> bool {
    true
}
