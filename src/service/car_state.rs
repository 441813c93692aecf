use crate::fleet::car::{Car, CarState};
use crate::types::vehicle_api::VehicleData;
use chrono::DateTime;
use std::time::Duration;
use tracing::warn;

/// Collapse the vendor signals into one state. First match wins.
pub fn determine_car_state(
    vendor_state: &str,
    shift_state: Option<&str>,
    software_update_status: &str,
    charging_state: &str,
) -> CarState {
    if vendor_state == "asleep" {
        return CarState::Asleep;
    }
    if vendor_state == "offline" {
        return CarState::Offline;
    }
    if matches!(shift_state, Some("R") | Some("D")) {
        return CarState::Driving;
    }
    if charging_state == "Charging" {
        return CarState::Charging;
    }
    if software_update_status == "installing" {
        return CarState::Updating;
    }
    if vendor_state == "online" {
        return CarState::Online;
    }
    warn!(
        vendor_state,
        shift_state = ?shift_state,
        software_update_status,
        charging_state,
        "Could not determine car state"
    );
    CarState::Unknown
}

/// What `apply_vehicle_data` changed beyond plain telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppliedTelemetry {
    pub state: Option<CarState>,
    /// New minimum SoC when it had to be lowered to the vendor charge limit.
    pub corrected_minimum_soc: Option<i64>,
}

/// Copy a full telemetry reply onto the car record.
pub fn apply_vehicle_data(car: &mut Car, data: &VehicleData) -> AppliedTelemetry {
    let charge = &data.charge_state;
    let runtime = &mut car.runtime;

    if let Some(name) = data.vehicle_state.vehicle_name.as_ref() {
        car.name = Some(name.clone());
    }
    runtime.soc = Some(charge.battery_level);
    runtime.soc_limit = Some(charge.charge_limit_soc);

    let mut corrected_minimum_soc = None;
    let settable_min = charge.charge_limit_soc_min.unwrap_or_default();
    if car.config.minimum_soc > charge.charge_limit_soc && charge.charge_limit_soc > settable_min {
        warn!(
            car_id = car.id,
            minimum_soc = car.config.minimum_soc,
            charge_limit = charge.charge_limit_soc,
            "Reduce minimum SoC as charge limit is lower"
        );
        car.config.minimum_soc = charge.charge_limit_soc;
        corrected_minimum_soc = Some(charge.charge_limit_soc);
    }

    runtime.charger_phases = charge.charger_phases;
    runtime.charger_voltage = charge.charger_voltage;
    runtime.charger_actual_current = charge.charger_actual_current;
    runtime.plugged_in = Some(charge.charging_state != "Disconnected");
    runtime.climate_on = Some(data.climate_state.is_climate_on);
    runtime.time_until_full_charge =
        Duration::try_from_secs_f64(charge.time_to_full_charge.max(0.0) * 3600.0).ok();

    let state = determine_car_state(
        &data.state,
        data.drive_state.shift_state.as_deref(),
        &data.vehicle_state.software_update.status,
        &charge.charging_state,
    );
    runtime.state = Some(state);
    runtime.healthy = true;
    runtime.charger_requested_current = charge.charge_current_request;
    runtime.charger_pilot_current = charge.charger_pilot_current;
    runtime.scheduled_charging_start_time = charge
        .scheduled_charging_start_time
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    runtime.latitude = data.drive_state.latitude;
    runtime.longitude = data.drive_state.longitude;

    AppliedTelemetry {
        state: Some(state),
        corrected_minimum_soc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::DbCar;
    use crate::fleet::car::FleetApiState;

    fn car(minimum_soc: i64) -> Car {
        Car::from(DbCar {
            id: 1,
            vin: Some("VIN1".to_string()),
            name: None,
            fleet_api_state: FleetApiState::Ok,
            minimum_soc,
            priority: 1,
            should_be_managed: true,
        })
    }

    fn vehicle_data(json: serde_json::Value) -> VehicleData {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn asleep_wins_over_every_other_signal() {
        for shift in [None, Some("D"), Some("R"), Some("P")] {
            for charging in ["Charging", "Stopped", "Disconnected"] {
                for update in ["installing", ""] {
                    assert_eq!(
                        determine_car_state("asleep", shift, update, charging),
                        CarState::Asleep
                    );
                }
            }
        }
    }

    #[test]
    fn precedence_follows_declared_order() {
        assert_eq!(
            determine_car_state("offline", Some("D"), "", "Charging"),
            CarState::Offline
        );
        assert_eq!(
            determine_car_state("online", Some("R"), "installing", "Charging"),
            CarState::Driving
        );
        assert_eq!(
            determine_car_state("online", Some("P"), "installing", "Charging"),
            CarState::Charging
        );
        assert_eq!(
            determine_car_state("online", None, "installing", "Stopped"),
            CarState::Updating
        );
        assert_eq!(
            determine_car_state("online", None, "", "Stopped"),
            CarState::Online
        );
        assert_eq!(
            determine_car_state("waking", None, "", "Stopped"),
            CarState::Unknown
        );
    }

    #[test]
    fn telemetry_is_copied_and_minimum_soc_corrected() {
        let mut car = car(80);
        let data = vehicle_data(serde_json::json!({
            "state": "online",
            "charge_state": {
                "battery_level": 55,
                "charge_limit_soc": 70,
                "charge_limit_soc_min": 50,
                "charger_phases": 3,
                "charger_voltage": 230,
                "charger_actual_current": 16,
                "charging_state": "Charging",
                "time_to_full_charge": 1.5,
                "charge_current_request": 16,
                "charger_pilot_current": 16,
                "scheduled_charging_start_time": 1714558500
            },
            "climate_state": { "is_climate_on": true },
            "drive_state": { "shift_state": null, "latitude": 48.1, "longitude": 11.5 },
            "vehicle_state": { "vehicle_name": "Model Y", "software_update": { "status": "" } }
        }));

        let applied = apply_vehicle_data(&mut car, &data);

        assert_eq!(applied.state, Some(CarState::Charging));
        assert_eq!(applied.corrected_minimum_soc, Some(70));
        assert_eq!(car.config.minimum_soc, 70);
        assert_eq!(car.name.as_deref(), Some("Model Y"));
        assert_eq!(car.runtime.soc, Some(55));
        assert_eq!(car.runtime.plugged_in, Some(true));
        assert_eq!(car.runtime.climate_on, Some(true));
        assert_eq!(
            car.runtime.time_until_full_charge,
            Some(Duration::from_secs(5400))
        );
        assert_eq!(
            car.runtime.scheduled_charging_start_time.map(|t| t.timestamp()),
            Some(1714558500)
        );
        assert!(car.runtime.healthy);
    }

    #[test]
    fn minimum_soc_kept_when_limit_is_at_settable_minimum() {
        let mut car = car(80);
        let data = vehicle_data(serde_json::json!({
            "state": "online",
            "charge_state": {
                "battery_level": 40,
                "charge_limit_soc": 50,
                "charge_limit_soc_min": 50,
                "charging_state": "Disconnected"
            }
        }));

        let applied = apply_vehicle_data(&mut car, &data);

        assert_eq!(applied.corrected_minimum_soc, None);
        assert_eq!(car.config.minimum_soc, 80);
        assert_eq!(car.runtime.plugged_in, Some(false));
        assert_eq!(car.runtime.state, Some(CarState::Online));
    }
}
