//! Descriptors of the vendor vehicle endpoints in use.

/// How the `response` field of a vendor reply is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// `{"result": bool, "reason": string}`
    Command,
    /// Bare vehicle summary (also returned by `wake_up`).
    Vehicle,
    /// Full telemetry of `vehicle_data`.
    VehicleData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetCommand {
    /// Relative to `api/1/vehicles/{vin}/`.
    pub path: &'static str,
    /// Must be signed by the local proxy when proxy usage is enabled.
    pub needs_proxy: bool,
    pub kind: ResponseKind,
}

impl FleetCommand {
    const fn command(path: &'static str) -> Self {
        Self {
            path,
            needs_proxy: true,
            kind: ResponseKind::Command,
        }
    }
}

pub const CHARGE_START: FleetCommand = FleetCommand::command("command/charge_start");
pub const CHARGE_STOP: FleetCommand = FleetCommand::command("command/charge_stop");
pub const SET_CHARGING_AMPS: FleetCommand = FleetCommand::command("command/set_charging_amps");
pub const SET_SCHEDULED_CHARGING: FleetCommand =
    FleetCommand::command("command/set_scheduled_charging");
pub const SET_CHARGE_LIMIT: FleetCommand = FleetCommand::command("command/set_charge_limit");
pub const OPEN_CHARGE_PORT_DOOR: FleetCommand =
    FleetCommand::command("command/charge_port_door_open");

pub const WAKE_UP: FleetCommand = FleetCommand {
    path: "wake_up",
    needs_proxy: false,
    kind: ResponseKind::Vehicle,
};

pub const VEHICLE: FleetCommand = FleetCommand {
    path: "",
    needs_proxy: false,
    kind: ResponseKind::Vehicle,
};

pub const VEHICLE_DATA: FleetCommand = FleetCommand {
    path: "vehicle_data?endpoints=drive_state%3Blocation_data%3Bvehicle_state%3Bcharge_state%3Bclimate_state",
    needs_proxy: false,
    kind: ResponseKind::VehicleData,
};
