use crate::config::FleetApiConfig;
use crate::db::sqlite::CredentialsStorage;
use crate::error::FleetError;
use crate::fleet::car::{CarState, FleetApiState};
use crate::fleet::{CarHandle, Fleet};
use crate::fleet_api::commands::{
    CHARGE_START, CHARGE_STOP, OPEN_CHARGE_PORT_DOOR, SET_CHARGE_LIMIT, SET_CHARGING_AMPS,
    SET_SCHEDULED_CHARGING, VEHICLE, VEHICLE_DATA, WAKE_UP,
};
use crate::fleet_api::dispatcher::FleetApiClient;
use crate::relay::logger::LocalLoggerApi;
use crate::service::car_state::apply_vehicle_data;
use crate::service::schedule_planner::{plan_schedule_change, round_to_next_quarter_hour};
use crate::types::vehicle_api::FleetResponse;
use chrono::{DateTime, Local, Utc};
use futures::StreamExt;
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Requested current below this value is applied differently by the car.
const AMP_BOUNDARY: i64 = 5;

/// Vehicle-level operations on top of the dispatcher.
#[derive(Clone)]
pub struct FleetApiService {
    client: FleetApiClient,
    storage: CredentialsStorage,
    fleet: Arc<Fleet>,
    logger: LocalLoggerApi,
    wake_settle: Duration,
    amp_resend_delay: Duration,
    concurrency: usize,
}

impl FleetApiService {
    pub fn new(
        client: FleetApiClient,
        storage: CredentialsStorage,
        fleet: Arc<Fleet>,
        logger: LocalLoggerApi,
        cfg: &FleetApiConfig,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            storage,
            fleet,
            logger,
            wake_settle: cfg.wake_settle(),
            amp_resend_delay: cfg.amp_resend_delay(),
            concurrency: concurrency.max(1),
        }
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    async fn car(&self, car_id: i64) -> Result<CarHandle, FleetError> {
        self.fleet
            .car(car_id)
            .await
            .ok_or(FleetError::UnknownCar(car_id))
    }

    async fn vin(&self, handle: &CarHandle) -> Result<String, FleetError> {
        let car = handle.read().await;
        match car.vin.as_deref().filter(|v| !v.is_empty()) {
            Some(vin) => Ok(vin.to_string()),
            None => {
                error!(car_id = car.id, "Could not get VIN for car");
                Err(FleetError::MissingVin(car.id))
            }
        }
    }

    async fn report(&self, method_name: &str, message: &str) {
        self.client
            .relay()
            .post_error_information("FleetApiService", method_name, message)
            .await;
    }

    /// Wake a sleeping car, or ask the local logger to poll a suspended one again.
    pub async fn wake_up_car_if_needed(
        &self,
        car_id: i64,
        state: Option<CarState>,
    ) -> Result<(), FleetError> {
        match state {
            Some(CarState::Offline) | Some(CarState::Asleep) => {
                info!(car_id, "Wake up car");
                self.wake_up_car(car_id).await
            }
            Some(CarState::Suspended) => {
                info!(car_id, "Logging is suspended, resume logging");
                self.logger.resume_logging(car_id).await
            }
            _ => Ok(()),
        }
    }

    pub async fn wake_up_car(&self, car_id: i64) -> Result<(), FleetError> {
        trace!(car_id, "wake_up_car");
        let handle = self.car(car_id).await?;
        let vin = self.vin(&handle).await?;
        if self
            .client
            .send(&vin, &WAKE_UP, Method::POST, None)
            .await?
            .is_some()
        {
            handle.write().await.runtime.state = Some(CarState::Online);
        }
        if let Err(e) = self.logger.resume_logging(car_id).await {
            warn!(car_id, "Could not resume logging after wake up: {}", e);
        }
        tokio::time::sleep(self.wake_settle).await;
        Ok(())
    }

    /// Set the requested current. Crossing the 5 A line is sent twice.
    pub async fn set_amp(&self, car_id: i64, amps: i64) -> Result<(), FleetError> {
        trace!(car_id, amps, "set_amp");
        let handle = self.car(car_id).await?;
        let (requested, last_set) = {
            let car = handle.read().await;
            (
                car.runtime.charger_requested_current,
                car.runtime.last_set_amps,
            )
        };
        if requested == Some(amps) {
            debug!(car_id, amps, "Correct charging amp already set");
            return Ok(());
        }
        let vin = self.vin(&handle).await?;
        let body = json!({ "charging_amps": amps });
        let mut result = self
            .client
            .send(&vin, &SET_CHARGING_AMPS, Method::POST, Some(body.clone()))
            .await?;
        if crosses_amp_boundary(last_set, amps) {
            debug!(car_id, from = last_set, to = amps, "Double set amp to cross the 5A boundary");
            tokio::time::sleep(self.amp_resend_delay).await;
            result = self
                .client
                .send(&vin, &SET_CHARGING_AMPS, Method::POST, Some(body))
                .await?;
        }
        if result.as_ref().is_some_and(FleetResponse::is_command_success) {
            handle.write().await.runtime.last_set_amps = amps;
        }
        Ok(())
    }

    pub async fn start_charging(&self, car_id: i64, start_amps: i64) -> Result<(), FleetError> {
        trace!(car_id, start_amps, "start_charging");
        if start_amps == 0 {
            debug!(car_id, "Should start charging with 0 amp. Skipping charge start.");
            return Ok(());
        }
        let handle = self.car(car_id).await?;
        let state = handle.read().await.runtime.state;
        self.wake_up_car_if_needed(car_id, state).await?;
        let vin = self.vin(&handle).await?;
        self.set_amp(car_id, start_amps).await?;
        self.client
            .send(&vin, &CHARGE_START, Method::POST, None)
            .await?;
        Ok(())
    }

    pub async fn stop_charging(&self, car_id: i64) -> Result<(), FleetError> {
        trace!(car_id, "stop_charging");
        let handle = self.car(car_id).await?;
        let vin = self.vin(&handle).await?;
        self.client.send(&vin, &CHARGE_STOP, Method::POST, None).await?;
        Ok(())
    }

    /// Write the vendor charge schedule if the quantized start differs from
    /// what the car reports.
    pub async fn set_scheduled_charging(
        &self,
        car_id: i64,
        desired: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), FleetError> {
        trace!(car_id, ?desired, "set_scheduled_charging");
        let handle = self.car(car_id).await?;
        let vin = self.vin(&handle).await?;
        let (current, state) = {
            let car = handle.read().await;
            (
                car.runtime.scheduled_charging_start_time,
                car.runtime.state,
            )
        };
        let Some(change) = plan_schedule_change(desired, now, current, &Local) else {
            debug!(car_id, "No change in updating scheduled charging needed");
            return Ok(());
        };

        self.wake_up_car_if_needed(car_id, state).await?;
        let result = self
            .client
            .send(
                &vin,
                &SET_SCHEDULED_CHARGING,
                Method::POST,
                Some(change.to_body()),
            )
            .await?;

        let mut car = handle.write().await;
        if !change.enable {
            // The car does not always confirm a disable, so it is assumed.
            car.runtime.scheduled_charging_start_time = None;
        } else if result.as_ref().is_some_and(FleetResponse::is_command_success) {
            car.runtime.scheduled_charging_start_time = desired.map(round_to_next_quarter_hour);
        }
        Ok(())
    }

    pub async fn set_charge_limit(&self, car_id: i64, percent: i64) -> Result<(), FleetError> {
        trace!(car_id, percent, "set_charge_limit");
        let handle = self.car(car_id).await?;
        let vin = self.vin(&handle).await?;
        let state = handle.read().await.runtime.state;
        self.wake_up_car_if_needed(car_id, state).await?;
        self.client
            .send(
                &vin,
                &SET_CHARGE_LIMIT,
                Method::POST,
                Some(json!({ "percent": percent })),
            )
            .await?;
        Ok(())
    }

    pub async fn open_charge_port_door(&self, car_id: i64) -> Result<(), FleetError> {
        trace!(car_id, "open_charge_port_door");
        let handle = self.car(car_id).await?;
        let vin = self.vin(&handle).await?;
        self.client
            .send(&vin, &OPEN_CHARGE_PORT_DOOR, Method::POST, None)
            .await?;
        Ok(())
    }

    /// Probe command delivery by opening the charge port and record the outcome.
    /// Transport or precondition failures count as "not working" without
    /// persisting anything.
    pub async fn test_fleet_api_access(&self, car_id: i64) -> Result<bool, FleetError> {
        let handle = self.car(car_id).await?;
        let probe = async {
            let vin = self.vin(&handle).await?;
            let state = handle.read().await.runtime.state;
            self.wake_up_car_if_needed(car_id, state).await?;
            self.client
                .send(&vin, &OPEN_CHARGE_PORT_DOOR, Method::POST, None)
                .await
        };
        let response = match probe.await {
            Ok(response) => response,
            Err(e) => {
                error!(car_id, "Testing fleet API access was not successful: {}", e);
                return Ok(false);
            }
        };
        let success = response.as_ref().is_some_and(FleetResponse::is_command_success);
        let state = if success {
            FleetApiState::Ok
        } else {
            FleetApiState::NotWorking
        };
        self.storage.set_fleet_api_state(car_id, state).await?;
        handle.write().await.fleet_api_state = state;
        info!(car_id, state = state.as_str(), "Fleet API access tested");
        Ok(success)
    }

    /// Refresh telemetry of every managed car. Failures stay with their car.
    pub async fn refresh_car_data(&self) {
        let cars = self.fleet.managed_cars().await;
        futures::stream::iter(cars)
            .for_each_concurrent(self.concurrency, |handle| async move {
                let car_id = handle.read().await.id;
                if let Err(e) = self.refresh_one(&handle).await {
                    error!(car_id, "Could not get vehicle data for car: {}", e);
                    // The dispatcher already reported the unparsable body.
                    if matches!(e, FleetError::Json(_)) {
                        return;
                    }
                    self.report(
                        "refresh_car_data",
                        &format!("Error getting vehicle data for car {car_id}: {e}"),
                    )
                    .await;
                }
            })
            .await;
    }

    async fn refresh_one(&self, handle: &CarHandle) -> Result<(), FleetError> {
        let vin = self.vin(handle).await?;
        let car_id = handle.read().await.id;

        let Some(FleetResponse::Vehicle(vehicle)) =
            self.client.send(&vin, &VEHICLE, Method::GET, None).await?
        else {
            return Ok(());
        };
        trace!(car_id, state = %vehicle.state, "Got vehicle");
        let sleeping = match vehicle.state.as_str() {
            "asleep" => Some(CarState::Asleep),
            "offline" => Some(CarState::Offline),
            _ => None,
        };
        if let Some(state) = sleeping {
            handle.write().await.runtime.state = Some(state);
            debug!(car_id, state = %vehicle.state, "Do not call current vehicle data as car is not awake");
            return Ok(());
        }

        let Some(FleetResponse::VehicleData(data)) = self
            .client
            .send(&vin, &VEHICLE_DATA, Method::GET, None)
            .await?
        else {
            return Ok(());
        };
        let applied = {
            let mut car = handle.write().await;
            apply_vehicle_data(&mut car, &data)
        };
        if let Some(minimum_soc) = applied.corrected_minimum_soc {
            self.storage.set_minimum_soc(car_id, minimum_soc).await?;
        }
        if applied.state == Some(CarState::Unknown) {
            self.report(
                "refresh_car_data",
                &format!(
                    "Could not determine car state. State: {}, shift state: {:?}, software update: {}, charging state: {}",
                    data.state,
                    data.drive_state.shift_state,
                    data.vehicle_state.software_update.status,
                    data.charge_state.charging_state
                ),
            )
            .await;
        }
        Ok(())
    }

    /// Drive every managed car toward its charge target.
    pub async fn apply_charge_targets(&self, now: DateTime<Utc>) {
        let cars = self.fleet.managed_cars().await;
        futures::stream::iter(cars)
            .for_each_concurrent(self.concurrency, |handle| async move {
                let car_id = handle.read().await.id;
                if let Err(e) = self.apply_target(&handle, now).await {
                    error!(car_id, "Could not apply charge target: {}", e);
                }
            })
            .await;
    }

    async fn apply_target(&self, handle: &CarHandle, now: DateTime<Utc>) -> Result<(), FleetError> {
        let (car_id, target) = {
            let car = handle.read().await;
            (car.id, car.target.clone())
        };
        if let Some(scheduled_start) = target.scheduled_start
            && let Err(e) = self.set_scheduled_charging(car_id, scheduled_start, now).await
        {
            error!(car_id, "Could not set scheduled charging: {}", e);
        }
        // Re-read: a wake-up during the schedule change moves the car to online.
        let charging = handle.read().await.runtime.state == Some(CarState::Charging);
        match (target.should_charge, target.amps) {
            (Some(true), Some(amps)) if charging => self.set_amp(car_id, amps).await,
            (Some(true), amps) if !charging => {
                self.start_charging(car_id, amps.unwrap_or_default()).await
            }
            (Some(false), _) if charging => self.stop_charging(car_id).await,
            _ => Ok(()),
        }
    }
}

fn crosses_amp_boundary(last_set: i64, amps: i64) -> bool {
    (amps < AMP_BOUNDARY && last_set >= AMP_BOUNDARY)
        || (amps >= AMP_BOUNDARY && last_set < AMP_BOUNDARY)
}
