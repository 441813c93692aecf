//! Clients of the operator's backend relay and of the local vehicle logger.

pub mod logger;

use crate::config::BackendConfig;
use crate::db::models::ConfigKey;
use crate::db::sqlite::CredentialsStorage;
use crate::error::FleetError;
use crate::types::token::{DeliveredToken, ErrorInformation, ValueResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Backend relay: token delivery, rate-allowance probe and error reporting.
#[derive(Clone)]
pub struct BackendRelay {
    http: reqwest::Client,
    base_url: Url,
    installation_id: Arc<str>,
    probe_timeout: Duration,
}

impl BackendRelay {
    pub fn new(http: reqwest::Client, cfg: &BackendConfig, installation_id: impl Into<Arc<str>>) -> Self {
        Self {
            http,
            base_url: cfg.base_url.clone(),
            installation_id: installation_id.into(),
            probe_timeout: Duration::from_secs(cfg.probe_timeout_secs),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, FleetError> {
        let mut url = self.base_url.join(path)?;
        url.query_pairs_mut()
            .append_pair("installationId", &self.installation_id);
        Ok(url)
    }

    /// Fetch the token bundle prepared for this installation.
    pub async fn deliver_auth_token(&self) -> Result<DeliveredToken, FleetError> {
        let url = self.endpoint("Tsc/DeliverAuthToken")?;
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            error!(
                %status,
                body = %body,
                "Error getting token from backend relay"
            );
            return Err(FleetError::UpstreamStatus(status));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Whether unrestricted vendor API usage is permitted right now.
    /// Non-success replies surface as `UpstreamStatus`.
    pub async fn allow_unlimited_fleet_api_access(&self) -> Result<bool, FleetError> {
        let url = self.endpoint("Tsc/AllowUnlimitedFleetApiAccess")?;
        let resp = self
            .http
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FleetError::UpstreamStatus(status));
        }
        let value: ValueResponse<bool> = resp.json().await?;
        Ok(value.value)
    }

    /// Fire-and-forget diagnostic report; failures are only logged.
    pub async fn post_error_information(&self, source: &str, method_name: &str, message: &str) {
        let url = match self.base_url.join("Tsc/NotifyError") {
            Ok(url) => url,
            Err(e) => {
                warn!("Invalid error report URL: {}", e);
                return;
            }
        };
        let body = ErrorInformation {
            installation_id: &self.installation_id,
            source,
            method_name,
            message,
        };
        match self.http.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(source, method_name, "Error information posted");
            }
            Ok(resp) => warn!(
                status = %resp.status(),
                source,
                method_name,
                "Posting error information was rejected"
            ),
            Err(e) => warn!(source, method_name, "Could not post error information: {}", e),
        }
    }
}

/// Configured installation id, else the persisted one, else a new persisted UUID.
pub async fn resolve_installation_id(
    storage: &CredentialsStorage,
    cfg: &BackendConfig,
) -> Result<String, FleetError> {
    if let Some(id) = cfg.installation_id.as_ref().filter(|id| !id.is_empty()) {
        return Ok(id.clone());
    }
    if let Some(id) = storage.get_config(ConfigKey::InstallationId).await? {
        return Ok(id);
    }
    let id = uuid::Uuid::new_v4().to_string();
    storage.set_config(ConfigKey::InstallationId, &id).await?;
    info!(installation_id = %id, "Generated new installation id");
    Ok(id)
}
