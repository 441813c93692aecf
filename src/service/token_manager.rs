use crate::config::FleetApiConfig;
use crate::db::models::{ConfigKey, DbToken, NewToken};
use crate::db::sqlite::CredentialsStorage;
use crate::error::{FleetError, IsRetryable};
use crate::fleet::{Fleet, RateAllowance};
use crate::fleet_api::endpoints::{FleetOauthEndpoints, RefreshReply};
use crate::relay::BackendRelay;
use crate::service::classifier::FailureHandler;
use crate::types::token::{DeliveredToken, region_from_access_token};
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, TimeDelta, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use oauth2::{ClientId, RefreshToken, TokenResponse};
use serde::Serialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Tokens expiring within this window are refreshed.
fn refresh_lookahead() -> TimeDelta {
    TimeDelta::minutes(2)
}

/// How long a positive rate-allowance answer is trusted.
fn allowance_cache() -> TimeDelta {
    TimeDelta::hours(1)
}

/// Upper bound for a token lifetime reported by the relay or the vendor.
fn max_token_lifetime() -> TimeDelta {
    TimeDelta::days(365)
}

/// `now + expires_in`, clamped to `[now, now + max_token_lifetime]`.
fn expiry_after(now: DateTime<Utc>, expires_in_secs: i64) -> DateTime<Utc> {
    let lifetime = TimeDelta::try_seconds(expires_in_secs)
        .unwrap_or(TimeDelta::MAX)
        .clamp(TimeDelta::zero(), max_token_lifetime());
    if lifetime == max_token_lifetime() {
        warn!(expires_in_secs, "Token lifetime out of range, clamped");
    }
    now.checked_add_signed(lifetime).unwrap_or(now)
}

fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// Health of the credential, as shown to the surrounding system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetApiTokenState {
    NotRequested,
    TokenRequestExpired,
    NotReceived,
    NoApiRequestsAllowed,
    MissingScopes,
    TokenUnauthorized,
    Expired,
    UpToDate,
}

/// Owns acquisition, refresh and invalidation of the vendor bearer token.
pub struct TokenManager {
    storage: CredentialsStorage,
    relay: BackendRelay,
    http: reqwest::Client,
    cfg: FleetApiConfig,
    fleet: Arc<Fleet>,
    failures: FailureHandler,
    limiter: DefaultDirectRateLimiter,
}

impl TokenManager {
    pub fn new(
        storage: CredentialsStorage,
        relay: BackendRelay,
        http: reqwest::Client,
        cfg: FleetApiConfig,
        fleet: Arc<Fleet>,
    ) -> Self {
        let per_minute = NonZeroU32::new(cfg.refresh_per_minute).unwrap_or(NonZeroU32::MIN);
        let failures = FailureHandler::new(storage.clone(), fleet.clone());
        Self {
            storage,
            relay,
            http,
            cfg,
            fleet,
            failures,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }

    /// Fetch a token from the backend relay when none is stored and one was
    /// requested recently. Every early exit is logged, never raised.
    pub async fn acquire_if_missing(&self, now: DateTime<Utc>) -> Result<(), FleetError> {
        if self.storage.latest_token().await?.is_some() {
            trace!("Token already present; nothing to acquire");
            return Ok(());
        }
        let Some(requested_at) = self.token_requested_at().await? else {
            error!("Token has not been requested. Fleet API currently not working");
            return Ok(());
        };
        if requested_at < now - self.cfg.token_request_wait() {
            error!(
                requested_at = %requested_at,
                "Last token request is too old. Request a new token."
            );
            return Ok(());
        }
        match self.relay.deliver_auth_token().await {
            Ok(delivered) => match self.add_new_token(delivered, now).await {
                Ok(id) => info!(token_id = id, "New token received from backend relay"),
                Err(e) => error!("Could not store token from backend relay: {}", e),
            },
            Err(e) => error!("Could not get token from backend relay: {}", e),
        }
        Ok(())
    }

    /// Persist a delivered token set, replacing every stored one.
    pub async fn add_new_token(
        &self,
        delivered: DeliveredToken,
        now: DateTime<Utc>,
    ) -> Result<i64, FleetError> {
        let region = delivered
            .region
            .or_else(|| region_from_access_token(&delivered.access_token))
            .ok_or_else(|| FleetError::UnknownRegion("<missing>".to_string()))?;
        let token = NewToken {
            access_token: delivered.access_token,
            refresh_token: delivered.refresh_token,
            id_token: delivered.id_token,
            expires_at: expiry_after(now, delivered.expires_in),
            region,
        };
        self.storage.replace_tokens(token).await
    }

    /// Record that a token was requested at the backend (starts the wait window).
    pub async fn mark_token_requested(&self, now: DateTime<Utc>) -> Result<(), FleetError> {
        self.storage
            .set_config(ConfigKey::FleetApiTokenRequested, &now.to_rfc3339())
            .await?;
        self.storage.delete_config(ConfigKey::TokenMissingScopes).await
    }

    /// Refresh every token expiring within the lookahead window.
    pub async fn refresh_if_needed(&self, now: DateTime<Utc>) -> Result<(), FleetError> {
        let tokens = self.storage.list_tokens().await?;
        if tokens.is_empty() {
            error!("No token found. Cannot refresh token.");
            return Ok(());
        }
        let due: Vec<DbToken> = tokens
            .into_iter()
            .filter(|t| t.expires_at < now + refresh_lookahead())
            .collect();
        if due.is_empty() {
            trace!("No token needs to be refreshed.");
            return Ok(());
        }
        if !self.fleet.rate_allowance().await.allowed {
            error!("Due to rate limitations fleet API requests are not allowed; skip token refresh");
            return Ok(());
        }

        for token in due {
            warn!(
                token_id = token.id,
                expires_at = %token.expires_at,
                "Token needs to be refreshed"
            );
            // Refreshing is how an unauthorized token recovers, so it gets twice the tolerance.
            if token.unauthorized_counter > self.cfg.max_unauthorized_count * 2 {
                error!(
                    token_id = token.id,
                    "Token has been unauthorized too often. Do not refresh token."
                );
                continue;
            }
            if let Err(e) = self.refresh_one(&token, now).await {
                warn!(token_id = token.id, "Token refresh failed: {}", e);
            }
        }
        Ok(())
    }

    async fn refresh_one(&self, token: &DbToken, now: DateTime<Utc>) -> Result<(), FleetError> {
        self.limiter.until_ready().await;
        let client_id = ClientId::new(self.cfg.client_id.clone());
        let refresh_token = RefreshToken::new(token.refresh_token.clone());

        let reply = (|| async {
            FleetOauthEndpoints::refresh_access_token(
                &self.http,
                &self.cfg.token_url,
                &client_id,
                &refresh_token,
            )
            .await
        })
        .retry(default_retry_policy())
        .when(|e: &FleetError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!("Token refresh retrying after error {}, sleeping {:?}", err, dur);
        })
        .await?;

        match reply {
            RefreshReply::Refreshed(resp) => {
                let expires_in = resp.expires_in().unwrap_or_default().as_secs();
                let expires_at = expiry_after(now, i64::try_from(expires_in).unwrap_or(i64::MAX));
                let refresh = resp
                    .refresh_token()
                    .map(|r| r.secret().clone())
                    .unwrap_or_else(|| token.refresh_token.clone());
                self.storage
                    .update_refreshed(
                        token.id,
                        resp.access_token().secret(),
                        &refresh,
                        resp.extra_fields().id_token.as_deref(),
                        expires_at,
                    )
                    .await?;
                info!(token_id = token.id, expires_at = %expires_at, "New token saved to database");
            }
            RefreshReply::Rejected { status, body } => {
                let message = format!(
                    "Refreshing token did result in non success status code. Response status code: {status} Response string: {body}"
                );
                error!("{}", message);
                self.relay
                    .post_error_information("TokenManager", "refresh_if_needed", &message)
                    .await;
                self.failures
                    .handle(status, &body, Some(token.id), None)
                    .await?;
            }
        }
        Ok(())
    }

    /// The token to use for the next vendor call.
    pub async fn current_token(&self) -> Result<DbToken, FleetError> {
        let token = self
            .storage
            .latest_token()
            .await?
            .ok_or(FleetError::NoToken)?;
        if token.unauthorized_counter > self.cfg.max_unauthorized_count {
            error!(
                token_id = token.id,
                counter = token.unauthorized_counter,
                "Token unauthorized counter is too high. Request a new token."
            );
            return Err(FleetError::TokenUnauthorized {
                counter: token.unauthorized_counter,
            });
        }
        Ok(token)
    }

    /// Re-check the relay's rate allowance unless a positive answer is fresh.
    /// Relay outages fail open; only an explicit `false` closes the gate.
    pub async fn refresh_access_allowed(&self, now: DateTime<Utc>) -> bool {
        let cached = self.fleet.rate_allowance().await;
        if cached.allowed
            && cached
                .last_checked
                .is_some_and(|checked| checked > now - allowance_cache())
        {
            return true;
        }
        let allowed = match self.relay.allow_unlimited_fleet_api_access().await {
            Ok(value) => value,
            Err(e) => {
                debug!("Rate allowance probe failed, assuming allowed: {}", e);
                true
            }
        };
        if !allowed {
            warn!("Backend relay denies unlimited fleet API access");
        }
        self.fleet
            .set_rate_allowance(RateAllowance {
                allowed,
                last_checked: Some(now),
            })
            .await;
        allowed
    }

    pub async fn token_state(&self, now: DateTime<Utc>) -> Result<FleetApiTokenState, FleetError> {
        if !self.fleet.rate_allowance().await.allowed {
            return Ok(FleetApiTokenState::NoApiRequestsAllowed);
        }
        if self.storage.has_config(ConfigKey::TokenMissingScopes).await? {
            return Ok(FleetApiTokenState::MissingScopes);
        }
        if let Some(token) = self.storage.latest_token().await? {
            if token.unauthorized_counter > self.cfg.max_unauthorized_count {
                return Ok(FleetApiTokenState::TokenUnauthorized);
            }
            return Ok(if token.expires_at < now {
                FleetApiTokenState::Expired
            } else {
                FleetApiTokenState::UpToDate
            });
        }
        let Some(requested_at) = self.token_requested_at().await? else {
            return Ok(FleetApiTokenState::NotRequested);
        };
        if requested_at < now - self.cfg.token_request_wait() {
            return Ok(FleetApiTokenState::TokenRequestExpired);
        }
        Ok(FleetApiTokenState::NotReceived)
    }

    async fn token_requested_at(&self) -> Result<Option<DateTime<Utc>>, FleetError> {
        let Some(raw) = self
            .storage
            .get_config(ConfigKey::FleetApiTokenRequested)
            .await?
        else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(dt) => Ok(Some(dt.with_timezone(&Utc))),
            Err(e) => {
                warn!(value = %raw, "Unreadable token request timestamp: {}", e);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_clamped_to_a_sane_range() {
        let now = Utc::now();
        assert_eq!(expiry_after(now, 28800), now + TimeDelta::hours(8));
        assert_eq!(expiry_after(now, 0), now);
        assert_eq!(expiry_after(now, -30), now);
        assert_eq!(expiry_after(now, 10_000_000_000_000), now + max_token_lifetime());
        assert_eq!(expiry_after(now, i64::MAX), now + max_token_lifetime());
    }
}
