use crate::error::FleetError;
use crate::fleet_api::FleetApiService;
use crate::service::token_manager::TokenManager;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// The periodic jobs. Each one runs in its own actor, so a job never overlaps
/// with itself while different jobs may run at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Telemetry,
    TokenRefresh,
    ChargeControl,
    Housekeeping,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Telemetry,
        JobKind::TokenRefresh,
        JobKind::ChargeControl,
        JobKind::Housekeeping,
    ];

    pub fn name(self) -> &'static str {
        match self {
            JobKind::Telemetry => "TelemetryJob",
            JobKind::TokenRefresh => "TokenRefreshJob",
            JobKind::ChargeControl => "ChargeControlJob",
            JobKind::Housekeeping => "HousekeepingJob",
        }
    }

    pub async fn execute(self, ctx: &JobContext) -> Result<(), FleetError> {
        let now = Utc::now();
        match self {
            JobKind::Telemetry => ctx.service.refresh_car_data().await,
            JobKind::TokenRefresh => {
                ctx.tokens.refresh_access_allowed(now).await;
                ctx.tokens.refresh_if_needed(now).await?;
            }
            JobKind::ChargeControl => ctx.service.apply_charge_targets(now).await,
            JobKind::Housekeeping => {
                ctx.tokens.acquire_if_missing(now).await?;
                let token_state = ctx.tokens.token_state(now).await?;
                let fleet = ctx.service.fleet();
                info!(
                    api_requests = fleet.api_request_count(),
                    proxy_required = fleet.proxy_required(),
                    token_state = ?token_state,
                    "Fleet API status"
                );
            }
        }
        Ok(())
    }
}

/// Everything a job needs, shared by all job actors.
pub struct JobContext {
    pub tokens: Arc<TokenManager>,
    pub service: FleetApiService,
}
