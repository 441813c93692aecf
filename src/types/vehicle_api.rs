use crate::fleet_api::commands::ResponseKind;
use serde::Deserialize;

/// Generic vendor envelope wrapper.
#[derive(Debug, Deserialize)]
pub struct FleetEnvelope<T> {
    pub response: T,
}

/// Reply of every `command/*` endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CommandResult {
    pub result: bool,
    #[serde(default)]
    pub reason: String,
}

/// Bare vehicle summary, returned by the vehicle endpoint and `wake_up`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VehicleSummary {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub vin: Option<String>,
    pub state: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehicleData {
    pub state: String,
    #[serde(default)]
    pub vin: Option<String>,
    pub charge_state: ChargeState,
    #[serde(default)]
    pub climate_state: ClimateState,
    #[serde(default)]
    pub drive_state: DriveState,
    #[serde(default)]
    pub vehicle_state: VehicleStateData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChargeState {
    pub battery_level: i64,
    pub charge_limit_soc: i64,
    #[serde(default)]
    pub charge_limit_soc_min: Option<i64>,
    #[serde(default)]
    pub charger_phases: Option<i64>,
    #[serde(default)]
    pub charger_voltage: Option<i64>,
    #[serde(default)]
    pub charger_actual_current: Option<i64>,
    pub charging_state: String,
    #[serde(default)]
    pub time_to_full_charge: f64,
    #[serde(default)]
    pub charge_current_request: Option<i64>,
    #[serde(default)]
    pub charger_pilot_current: Option<i64>,
    /// Epoch seconds.
    #[serde(default)]
    pub scheduled_charging_start_time: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClimateState {
    #[serde(default)]
    pub is_climate_on: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DriveState {
    #[serde(default)]
    pub shift_state: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VehicleStateData {
    #[serde(default)]
    pub vehicle_name: Option<String>,
    #[serde(default)]
    pub software_update: SoftwareUpdate,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SoftwareUpdate {
    #[serde(default)]
    pub status: String,
}

/// A successfully parsed vendor reply, one variant per response shape.
#[derive(Debug, Clone)]
pub enum FleetResponse {
    Command(CommandResult),
    Vehicle(VehicleSummary),
    VehicleData(Box<VehicleData>),
}

impl FleetResponse {
    /// Parse `body` according to the shape the command is known to return.
    pub fn parse(kind: ResponseKind, body: &str) -> Result<Self, serde_json::Error> {
        match kind {
            ResponseKind::Command => {
                let env: FleetEnvelope<CommandResult> = serde_json::from_str(body)?;
                Ok(FleetResponse::Command(env.response))
            }
            ResponseKind::Vehicle => {
                let env: FleetEnvelope<VehicleSummary> = serde_json::from_str(body)?;
                Ok(FleetResponse::Vehicle(env.response))
            }
            ResponseKind::VehicleData => {
                let env: FleetEnvelope<VehicleData> = serde_json::from_str(body)?;
                Ok(FleetResponse::VehicleData(Box::new(env.response)))
            }
        }
    }

    /// `Some(result)` for command replies.
    pub fn command_result(&self) -> Option<&CommandResult> {
        match self {
            FleetResponse::Command(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_command_success(&self) -> bool {
        self.command_result().is_some_and(|c| c.result)
    }
}
