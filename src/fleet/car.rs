use crate::db::models::DbCar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connectivity/activity state of a car.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CarState {
    Online,
    Asleep,
    Offline,
    Driving,
    Charging,
    Updating,
    /// The local logger stopped polling the car so it can fall asleep. Set
    /// through `Fleet::mark_logging_suspended`.
    Suspended,
    Unknown,
}

/// Whether vendor commands reach the car (authorization health).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FleetApiState {
    #[default]
    Unknown,
    Ok,
    NotWorking,
}

impl FleetApiState {
    pub fn as_str(self) -> &'static str {
        match self {
            FleetApiState::Unknown => "unknown",
            FleetApiState::Ok => "ok",
            FleetApiState::NotWorking => "not_working",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "ok" => FleetApiState::Ok,
            "not_working" => FleetApiState::NotWorking,
            _ => FleetApiState::Unknown,
        }
    }
}

/// Runtime telemetry of a car, refreshed from the vendor API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CarRuntime {
    pub state: Option<CarState>,
    pub soc: Option<i64>,
    pub soc_limit: Option<i64>,
    pub charger_phases: Option<i64>,
    pub charger_voltage: Option<i64>,
    pub charger_actual_current: Option<i64>,
    pub charger_requested_current: Option<i64>,
    pub charger_pilot_current: Option<i64>,
    pub plugged_in: Option<bool>,
    pub climate_on: Option<bool>,
    pub time_until_full_charge: Option<Duration>,
    pub scheduled_charging_start_time: Option<DateTime<Utc>>,
    /// Current last confirmed by the vendor for a set-amps command.
    pub last_set_amps: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CarConfiguration {
    pub minimum_soc: i64,
    pub priority: i64,
    pub should_be_managed: bool,
}

/// Desired charging behaviour, written by the surrounding power distribution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChargeTarget {
    /// `None` leaves the charging session untouched.
    pub should_charge: Option<bool>,
    pub amps: Option<i64>,
    /// `None` leaves the schedule untouched, `Some(None)` disables it.
    #[serde(default, with = "double_option")]
    pub scheduled_start: Option<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Car {
    pub id: i64,
    pub vin: Option<String>,
    pub name: Option<String>,
    pub fleet_api_state: FleetApiState,
    pub runtime: CarRuntime,
    pub config: CarConfiguration,
    pub target: ChargeTarget,
}

impl From<DbCar> for Car {
    fn from(d: DbCar) -> Self {
        Car {
            id: d.id,
            vin: d.vin,
            name: d.name,
            fleet_api_state: d.fleet_api_state,
            runtime: CarRuntime::default(),
            config: CarConfiguration {
                minimum_soc: d.minimum_soc,
                priority: d.priority,
                should_be_managed: d.should_be_managed,
            },
            target: ChargeTarget::default(),
        }
    }
}

/// Distinguishes an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
