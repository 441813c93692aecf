use crate::db::models::ConfigKey;
use crate::db::sqlite::CredentialsStorage;
use crate::error::FleetError;
use crate::fleet::Fleet;
use crate::fleet::car::FleetApiState;
use axum::http::StatusCode;
use std::sync::Arc;
use tracing::{error, warn};

const COMMAND_PROTOCOL_REQUIRED: &str = "vehicle command protocol required";
const KEY_NOT_PAIRED: &str = "public key has not been paired";

/// What a non-success vendor reply asks us to change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remediation {
    CountUnauthorized,
    MarkVehicleNotWorking { vin: String },
    RecordMissingScopes,
    LogOnly,
}

/// Map a non-success vendor reply to the remediation it calls for.
pub fn classify(status: StatusCode, body: &str, vin: Option<&str>) -> Remediation {
    let lowered = body.to_ascii_lowercase();
    match status {
        StatusCode::UNAUTHORIZED => Remediation::CountUnauthorized,
        StatusCode::FORBIDDEN if lowered.contains(COMMAND_PROTOCOL_REQUIRED) => match vin {
            Some(vin) => Remediation::MarkVehicleNotWorking {
                vin: vin.to_string(),
            },
            None => Remediation::LogOnly,
        },
        StatusCode::FORBIDDEN => Remediation::RecordMissingScopes,
        StatusCode::INTERNAL_SERVER_ERROR if lowered.contains(KEY_NOT_PAIRED) => match vin {
            Some(vin) => Remediation::MarkVehicleNotWorking {
                vin: vin.to_string(),
            },
            None => Remediation::LogOnly,
        },
        _ => Remediation::LogOnly,
    }
}

/// Applies remediations: durable write first, in-memory update second.
#[derive(Clone)]
pub struct FailureHandler {
    storage: CredentialsStorage,
    fleet: Arc<Fleet>,
}

impl FailureHandler {
    pub fn new(storage: CredentialsStorage, fleet: Arc<Fleet>) -> Self {
        Self { storage, fleet }
    }

    /// Classify and apply. `token_id` is the credential the call was made with.
    pub async fn handle(
        &self,
        status: StatusCode,
        body: &str,
        token_id: Option<i64>,
        vin: Option<&str>,
    ) -> Result<Remediation, FleetError> {
        let remediation = classify(status, body, vin);
        match &remediation {
            Remediation::CountUnauthorized => {
                let Some(id) = token_id else {
                    warn!("Unauthorized reply without associated token: {}", body);
                    return Ok(remediation);
                };
                let counter = self.storage.increment_unauthorized(id).await?;
                error!(
                    token_id = id,
                    unauthorized_counter = ?counter,
                    response = %body,
                    "Token or refresh token is invalid; the account password may have changed"
                );
            }
            Remediation::MarkVehicleNotWorking { vin } => {
                error!(
                    vin = %vin,
                    response = %body,
                    "Vehicle is not paired; add the public key to the vehicle"
                );
                self.mark_not_working(vin).await?;
            }
            Remediation::RecordMissingScopes => {
                error!(
                    response = %body,
                    "Not all scopes were granted, commands cannot be sent to the car"
                );
                self.storage
                    .set_config(ConfigKey::TokenMissingScopes, body)
                    .await?;
            }
            Remediation::LogOnly => {
                warn!(
                    %status,
                    response = %body,
                    "Status code is currently not handled"
                );
            }
        }
        Ok(remediation)
    }

    async fn mark_not_working(&self, vin: &str) -> Result<(), FleetError> {
        let Some(handle) = self.fleet.car_by_vin(vin).await else {
            warn!(vin = %vin, "No car with this VIN in the fleet");
            return Ok(());
        };
        let car_id = handle.read().await.id;
        self.storage
            .set_fleet_api_state(car_id, FleetApiState::NotWorking)
            .await?;
        handle.write().await.fleet_api_state = FleetApiState::NotWorking;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_always_counts() {
        assert_eq!(
            classify(StatusCode::UNAUTHORIZED, "", Some("VIN")),
            Remediation::CountUnauthorized
        );
        assert_eq!(
            classify(StatusCode::UNAUTHORIZED, "whatever", None),
            Remediation::CountUnauthorized
        );
    }

    #[test]
    fn forbidden_splits_on_command_protocol() {
        let body = r#"{"response":null,"error":"Tesla Vehicle Command Protocol required, please refer to the documentation here: ..."}"#;
        assert_eq!(
            classify(StatusCode::FORBIDDEN, body, Some("5YJ3")),
            Remediation::MarkVehicleNotWorking {
                vin: "5YJ3".to_string()
            }
        );
        assert_eq!(
            classify(StatusCode::FORBIDDEN, r#"{"error":"missing scopes"}"#, Some("5YJ3")),
            Remediation::RecordMissingScopes
        );
    }

    #[test]
    fn unpaired_key_on_server_error() {
        let body = "vehicle rejected request: your public key has not been paired with the vehicle";
        assert_eq!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, body, Some("V")),
            Remediation::MarkVehicleNotWorking {
                vin: "V".to_string()
            }
        );
        assert_eq!(
            classify(StatusCode::INTERNAL_SERVER_ERROR, "boom", Some("V")),
            Remediation::LogOnly
        );
    }

    #[test]
    fn other_statuses_only_log() {
        for status in [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::REQUEST_TIMEOUT,
            StatusCode::BAD_GATEWAY,
        ] {
            assert_eq!(classify(status, "", Some("V")), Remediation::LogOnly);
        }
    }

    #[tokio::test]
    async fn not_working_is_persisted_before_returning() {
        use crate::config::CarSeed;
        let storage = CredentialsStorage::in_memory().await.unwrap();
        storage
            .upsert_car(&CarSeed {
                id: 7,
                vin: Some("VIN7".to_string()),
                name: None,
                minimum_soc: 0,
                priority: 1,
                should_be_managed: true,
            })
            .await
            .unwrap();
        let fleet = Arc::new(Fleet::load(&storage).await.unwrap());
        let handler = FailureHandler::new(storage.clone(), fleet.clone());

        handler
            .handle(
                StatusCode::FORBIDDEN,
                "Tesla Vehicle Command Protocol required",
                None,
                Some("VIN7"),
            )
            .await
            .unwrap();

        let durable = storage.get_car(7).await.unwrap().unwrap();
        assert_eq!(durable.fleet_api_state, FleetApiState::NotWorking);
        let car = fleet.car(7).await.unwrap();
        assert_eq!(car.read().await.fleet_api_state, FleetApiState::NotWorking);
    }
}
