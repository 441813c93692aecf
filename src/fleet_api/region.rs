use crate::config::FleetApiConfig;
use crate::error::FleetError;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use url::Url;

/// Vendor API region a token was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    China,
    Emea,
    NorthAmerica,
}

impl Region {
    pub fn as_str(self) -> &'static str {
        match self {
            Region::China => "china",
            Region::Emea => "emea",
            Region::NorthAmerica => "north_america",
        }
    }
}

impl FromStr for Region {
    type Err = FleetError;

    /// Accepts stored names, relay enum names and `ou_code` claims.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "china" | "cn" => Ok(Region::China),
            "emea" | "eu" => Ok(Region::Emea),
            "north_america" | "northamerica" | "na" => Ok(Region::NorthAmerica),
            other => Err(FleetError::UnknownRegion(other.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for Region {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Region::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// Base URL for a vendor call: the signing proxy when the command needs it and
/// proxy usage is enabled, the region endpoint otherwise.
pub fn fleet_api_base_url(
    cfg: &FleetApiConfig,
    region: Region,
    needs_proxy: bool,
) -> Result<Url, FleetError> {
    if needs_proxy && cfg.use_proxy {
        let proxy = cfg.proxy_base_url.clone().ok_or(FleetError::ProxyUrlMissing)?;
        return Ok(with_trailing_slash(proxy));
    }
    let url = match region {
        Region::China => cfg.china_base_url.clone(),
        Region::Emea => Url::parse(&cfg.regional_base_url_template.replace("{region}", "eu"))?,
        Region::NorthAmerica => {
            Url::parse(&cfg.regional_base_url_template.replace("{region}", "na"))?
        }
    };
    Ok(with_trailing_slash(url))
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
