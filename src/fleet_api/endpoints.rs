use crate::error::FleetError;
use crate::types::token::FleetTokenResponse;
use axum::http::StatusCode;
use oauth2::{ClientId, RefreshToken};
use tracing::info;
use url::Url;

/// Reply of the vendor token endpoint to a refresh-token grant.
#[derive(Debug)]
pub enum RefreshReply {
    Refreshed(FleetTokenResponse),
    Rejected { status: StatusCode, body: String },
}

/// Stateless vendor OAuth endpoints.
pub struct FleetOauthEndpoints;

impl FleetOauthEndpoints {
    /// Exchange a refresh token for a new token set. Non-success replies are
    /// returned, not raised, so the caller can classify them.
    pub async fn refresh_access_token(
        http_client: &reqwest::Client,
        token_url: &Url,
        client_id: &ClientId,
        refresh_token: &RefreshToken,
    ) -> Result<RefreshReply, FleetError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", client_id.as_str()),
            ("refresh_token", refresh_token.secret().as_str()),
        ];
        let resp = http_client
            .post(token_url.clone())
            .form(&params)
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Ok(RefreshReply::Rejected { status, body });
        }
        let token: FleetTokenResponse = serde_json::from_str(&body)?;
        info!("Access token refreshed successfully");
        Ok(RefreshReply::Refreshed(token))
    }
}
