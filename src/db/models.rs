use crate::error::FleetError;
use crate::fleet::car::FleetApiState;
use crate::fleet_api::region::Region;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbToken {
    pub id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub region: String,
    pub unauthorized_counter: i64,
}

impl DbToken {
    pub fn region(&self) -> Result<Region, FleetError> {
        Region::from_str(&self.region)
    }
}

/// A freshly delivered credential set, not yet persisted.
#[derive(Debug, Clone)]
pub struct NewToken {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub region: Region,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbCar {
    pub id: i64,
    pub vin: Option<String>,
    pub name: Option<String>,
    pub fleet_api_state: FleetApiState,
    pub minimum_soc: i64,
    pub priority: i64,
    pub should_be_managed: bool,
}

/// Keys of the `configurations` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    FleetApiProxyNeeded,
    TokenMissingScopes,
    FleetApiTokenRequested,
    InstallationId,
}

impl ConfigKey {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::FleetApiProxyNeeded => "FleetApiProxyNeeded",
            ConfigKey::TokenMissingScopes => "TokenMissingScopes",
            ConfigKey::FleetApiTokenRequested => "FleetApiTokenRequested",
            ConfigKey::InstallationId => "InstallationId",
        }
    }
}
