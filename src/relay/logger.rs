use crate::error::FleetError;
use tracing::{debug, info};
use url::Url;

/// Local vehicle logger; only its "resume logging" call is used.
#[derive(Clone)]
pub struct LocalLoggerApi {
    http: reqwest::Client,
    base_url: Option<Url>,
}

impl LocalLoggerApi {
    pub fn new(http: reqwest::Client, base_url: Option<Url>) -> Self {
        Self { http, base_url }
    }

    /// Ask the logger to poll the car again after it was suspended.
    pub async fn resume_logging(&self, car_id: i64) -> Result<(), FleetError> {
        let Some(base) = self.base_url.as_ref() else {
            debug!(car_id, "No local logger configured; skip resume logging");
            return Ok(());
        };
        let url = base.join(&format!("api/v1/cars/{car_id}/logging/resume"))?;
        let resp = self.http.put(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FleetError::UpstreamStatus(status));
        }
        info!(car_id, "Logging resumed");
        Ok(())
    }
}
