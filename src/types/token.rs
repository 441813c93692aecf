use crate::fleet_api::region::Region;
use base64::Engine;
use oauth2::basic::BasicTokenType;
use oauth2::{ExtraTokenFields, StandardTokenResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Token bundle handed out by the backend relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveredToken {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    pub expires_in: i64,
    #[serde(default)]
    pub region: Option<Region>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FleetTokenField {
    #[serde(rename = "id_token")]
    pub id_token: Option<String>,
}
impl ExtraTokenFields for FleetTokenField {}

/// Reply of the vendor token endpoint for a refresh-token grant.
pub type FleetTokenResponse = StandardTokenResponse<FleetTokenField, BasicTokenType>;

/// `{"value": T}` wrapper used by the backend relay.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValueResponse<T> {
    pub value: T,
}

/// Body of a diagnostic report sent to the backend relay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInformation<'a> {
    pub installation_id: &'a str,
    pub source: &'a str,
    pub method_name: &'a str,
    pub message: &'a str,
}

/// Read the issuing region from the `ou_code` claim of a JWT access token.
pub fn region_from_access_token(access_token: &str) -> Option<Region> {
    let payload_b64 = access_token.split('.').nth(1)?;
    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64.trim_end_matches('='))
        .ok()?;
    let payload_json: Value = serde_json::from_slice(&decoded).ok()?;
    let ou_code = payload_json.get("ou_code").and_then(|v| v.as_str())?;
    Region::from_str(ou_code).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with(payload: &str) -> String {
        let enc = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        format!(
            "{}.{}.sig",
            enc.encode(r#"{"alg":"none"}"#),
            enc.encode(payload)
        )
    }

    #[test]
    fn region_is_read_from_ou_code() {
        let token = jwt_with(r#"{"sub":"abc","ou_code":"NA"}"#);
        assert_eq!(region_from_access_token(&token), Some(Region::NorthAmerica));
    }

    #[test]
    fn opaque_tokens_have_no_region() {
        assert_eq!(region_from_access_token("not-a-jwt"), None);
        let token = jwt_with(r#"{"sub":"abc"}"#);
        assert_eq!(region_from_access_token(&token), None);
    }

    #[test]
    fn delivered_token_uses_camel_case() {
        let t: DeliveredToken = serde_json::from_str(
            r#"{"accessToken":"a","refreshToken":"r","idToken":null,"expiresIn":28800,"region":"Emea"}"#,
        )
        .unwrap();
        assert_eq!(t.region, Some(Region::Emea));
        assert_eq!(t.expires_in, 28800);
    }
}
