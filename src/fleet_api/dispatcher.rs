use crate::config::FleetApiConfig;
use crate::db::models::ConfigKey;
use crate::db::sqlite::CredentialsStorage;
use crate::error::FleetError;
use crate::fleet::Fleet;
use crate::fleet_api::commands::{FleetCommand, ResponseKind};
use crate::fleet_api::region::fleet_api_base_url;
use crate::relay::BackendRelay;
use crate::service::classifier::FailureHandler;
use crate::service::token_manager::TokenManager;
use crate::types::vehicle_api::FleetResponse;
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};
use url::Url;

const UNSIGNED_COMMANDS_HARDLOCKED: &str = "unsigned_cmds_hardlocked";

/// Sends one vendor request with the current credential and routes every
/// failure to its handler. Non-success replies never escape as errors.
#[derive(Clone)]
pub struct FleetApiClient {
    http: reqwest::Client,
    cfg: FleetApiConfig,
    storage: CredentialsStorage,
    tokens: Arc<TokenManager>,
    relay: BackendRelay,
    fleet: Arc<Fleet>,
    failures: FailureHandler,
}

impl FleetApiClient {
    pub fn new(
        http: reqwest::Client,
        cfg: FleetApiConfig,
        storage: CredentialsStorage,
        tokens: Arc<TokenManager>,
        relay: BackendRelay,
        fleet: Arc<Fleet>,
    ) -> Self {
        let failures = FailureHandler::new(storage.clone(), fleet.clone());
        Self {
            http,
            cfg,
            storage,
            tokens,
            relay,
            fleet,
            failures,
        }
    }

    pub fn relay(&self) -> &BackendRelay {
        &self.relay
    }

    /// `Ok(None)` means the vendor answered with a non-success status that was
    /// already classified and handled.
    pub async fn send(
        &self,
        vin: &str,
        command: &FleetCommand,
        method: Method,
        body: Option<serde_json::Value>,
    ) -> Result<Option<FleetResponse>, FleetError> {
        let token = self.tokens.current_token().await?;
        let base = fleet_api_base_url(&self.cfg, token.region()?, command.needs_proxy)?;
        let url = vehicle_url(&base, vin, command.path)?;

        let total = self.fleet.record_api_request();
        debug!(vin = %vin, path = command.path, api_requests = total, "Sending fleet API request");

        let mut request = self
            .http
            .request(method, url.clone())
            .bearer_auth(&token.access_token)
            .timeout(Duration::from_secs(self.cfg.request_timeout_secs));
        if let Some(body) = body.as_ref() {
            request = request.json(body);
        }
        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        trace!(vin = %vin, %status, body = %text, "Fleet API response");

        if self.cfg.report_responses {
            self.report(&format!(
                "Response for {} with status {}: {}",
                url.path(),
                status,
                text
            ))
            .await;
        }

        if !status.is_success() {
            error!(
                vin = %vin,
                path = command.path,
                %status,
                response = %text,
                "Sending command to fleet API was not successful"
            );
            self.report(&format!(
                "Command {} for {} failed with status {}: {}",
                command.path, vin, status, text
            ))
            .await;
            self.failures
                .handle(status, &text, Some(token.id), Some(vin))
                .await?;
            return Ok(None);
        }

        let parsed = match FleetResponse::parse(command.kind, &text) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(vin = %vin, path = command.path, "Could not deserialize fleet API response: {}", e);
                self.report(&format!(
                    "Could not deserialize response of {}: {}",
                    command.path, text
                ))
                .await;
                return Err(e.into());
            }
        };

        let rejected = match parsed.command_result() {
            Some(result) if command.kind == ResponseKind::Command && !result.result => {
                Some(result)
            }
            _ => None,
        };
        if let Some(result) = rejected {
            warn!(
                vin = %vin,
                path = command.path,
                reason = %result.reason,
                "Command was rejected by the vehicle"
            );
            self.report(&format!(
                "Command {} for {} returned result false: {}",
                command.path, vin, result.reason
            ))
            .await;
            self.handle_unsigned_command(&result.reason).await?;
        }

        Ok(Some(parsed))
    }

    /// A hard-locked vehicle only accepts signed commands: switch to the proxy
    /// and persist the flag the first time.
    async fn handle_unsigned_command(&self, reason: &str) -> Result<(), FleetError> {
        if reason != UNSIGNED_COMMANDS_HARDLOCKED {
            return Ok(());
        }
        error!("Vehicle requires signed commands; the fleet API proxy is needed");
        let inserted = self
            .storage
            .insert_config_if_absent(ConfigKey::FleetApiProxyNeeded, "true")
            .await?;
        if inserted {
            warn!("Persisted that the fleet API proxy is needed");
        }
        self.fleet.mark_proxy_required();
        Ok(())
    }

    async fn report(&self, message: &str) {
        self.relay
            .post_error_information("FleetApiClient", "send", message)
            .await;
    }
}

fn vehicle_url(base: &Url, vin: &str, path: &str) -> Result<Url, FleetError> {
    Ok(base.join(&format!("api/1/vehicles/{vin}/{path}"))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet_api::commands::{SET_CHARGING_AMPS, VEHICLE, VEHICLE_DATA};

    #[test]
    fn vehicle_urls_keep_query_and_base_path() {
        let base = Url::parse("https://localhost:4443/proxy/").unwrap();
        assert_eq!(
            vehicle_url(&base, "VIN1", SET_CHARGING_AMPS.path).unwrap().as_str(),
            "https://localhost:4443/proxy/api/1/vehicles/VIN1/command/set_charging_amps"
        );
        assert_eq!(
            vehicle_url(&base, "VIN1", VEHICLE.path).unwrap().as_str(),
            "https://localhost:4443/proxy/api/1/vehicles/VIN1/"
        );
        let data = vehicle_url(&base, "VIN1", VEHICLE_DATA.path).unwrap();
        assert_eq!(data.path(), "/proxy/api/1/vehicles/VIN1/vehicle_data");
        assert_eq!(
            data.query(),
            Some("endpoints=drive_state%3Blocation_data%3Bvehicle_state%3Bcharge_state%3Bclimate_state")
        );
    }
}
