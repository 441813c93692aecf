//! Process-wide fleet snapshot: every car record plus shared counters.
//!
//! Created once at start-up and handed to every component as `Arc<Fleet>`.
//! Each car sits behind its own lock; no operation ever locks two cars.

pub mod car;

use crate::db::models::ConfigKey;
use crate::db::sqlite::CredentialsStorage;
use crate::error::FleetError;
use car::{Car, CarState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

pub type CarHandle = Arc<RwLock<Car>>;

/// Cached answer of the backend relay on unrestricted API usage.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateAllowance {
    pub allowed: bool,
    pub last_checked: Option<DateTime<Utc>>,
}

impl Default for RateAllowance {
    fn default() -> Self {
        Self {
            allowed: true,
            last_checked: None,
        }
    }
}

pub struct Fleet {
    cars: Vec<CarHandle>,
    api_requests: AtomicU64,
    proxy_required: AtomicBool,
    rate_allowance: RwLock<RateAllowance>,
}

impl Fleet {
    pub fn new(cars: Vec<Car>) -> Self {
        Self {
            cars: cars
                .into_iter()
                .map(|c| Arc::new(RwLock::new(c)))
                .collect(),
            api_requests: AtomicU64::new(0),
            proxy_required: AtomicBool::new(false),
            rate_allowance: RwLock::new(RateAllowance::default()),
        }
    }

    /// Build the snapshot from the durable car records and flags.
    pub async fn load(storage: &CredentialsStorage) -> Result<Self, FleetError> {
        let cars = storage.list_cars().await?;
        let fleet = Self::new(cars.into_iter().map(Car::from).collect());
        if storage.has_config(ConfigKey::FleetApiProxyNeeded).await? {
            fleet.proxy_required.store(true, Ordering::SeqCst);
        }
        Ok(fleet)
    }

    pub async fn car(&self, car_id: i64) -> Option<CarHandle> {
        for handle in &self.cars {
            if handle.read().await.id == car_id {
                return Some(handle.clone());
            }
        }
        None
    }

    pub async fn car_by_vin(&self, vin: &str) -> Option<CarHandle> {
        for handle in &self.cars {
            if handle.read().await.vin.as_deref() == Some(vin) {
                return Some(handle.clone());
            }
        }
        None
    }

    /// Cars the charging logic is allowed to act on.
    pub async fn managed_cars(&self) -> Vec<CarHandle> {
        let mut managed = Vec::with_capacity(self.cars.len());
        for handle in &self.cars {
            if handle.read().await.config.should_be_managed {
                managed.push(handle.clone());
            }
        }
        managed
    }

    /// Copy of every car record, for reporting.
    pub async fn snapshot(&self) -> Vec<Car> {
        let mut cars = Vec::with_capacity(self.cars.len());
        for handle in &self.cars {
            cars.push(handle.read().await.clone());
        }
        cars
    }

    /// The local logger stopped polling this car. Only an awake car moves to
    /// `Suspended`; returns whether the state changed.
    pub async fn mark_logging_suspended(&self, car_id: i64) -> Result<bool, FleetError> {
        let handle = self.car(car_id).await.ok_or(FleetError::UnknownCar(car_id))?;
        let mut car = handle.write().await;
        match car.runtime.state {
            Some(CarState::Asleep) | Some(CarState::Offline) => Ok(false),
            _ => {
                car.runtime.state = Some(CarState::Suspended);
                Ok(true)
            }
        }
    }

    /// Count one outbound vendor request. Returns the new total.
    pub fn record_api_request(&self) -> u64 {
        self.api_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn api_request_count(&self) -> u64 {
        self.api_requests.load(Ordering::Relaxed)
    }

    pub fn proxy_required(&self) -> bool {
        self.proxy_required.load(Ordering::SeqCst)
    }

    /// Returns the previous value.
    pub fn mark_proxy_required(&self) -> bool {
        self.proxy_required.swap(true, Ordering::SeqCst)
    }

    pub async fn rate_allowance(&self) -> RateAllowance {
        *self.rate_allowance.read().await
    }

    pub async fn set_rate_allowance(&self, allowance: RateAllowance) {
        *self.rate_allowance.write().await = allowance;
    }
}
