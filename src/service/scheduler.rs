use crate::config::JobsConfig;
use crate::error::FleetError;
use crate::types::job::{JobContext, JobKind};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub enum JobMessage {
    /// Carries the instant the tick was emitted at.
    Tick(Instant),
    /// Number of completed runs.
    RunCount(RpcReplyPort<u64>),
}

struct JobState {
    kind: JobKind,
    ctx: Arc<JobContext>,
    period: Duration,
    last_finished: Option<Instant>,
    runs: u64,
    timer: Option<JoinHandle<()>>,
}

struct JobActor;

/// A tick emitted while the previous run was still going is stale.
fn is_stale(emitted_at: Instant, last_finished: Option<Instant>) -> bool {
    last_finished.is_some_and(|finished| emitted_at < finished)
}

#[ractor::async_trait]
impl Actor for JobActor {
    type Msg = JobMessage;
    type State = JobState;
    type Arguments = (JobKind, Duration, Arc<JobContext>);

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        arguments: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let (kind, period, ctx) = arguments;
        Ok(JobState {
            kind,
            ctx,
            period,
            last_finished: None,
            runs: 0,
            timer: None,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        // First run right away, then on the cadence.
        myself
            .cast(JobMessage::Tick(Instant::now()))
            .map_err(|e| ActorProcessingErr::from(format!("initial tick failed: {e}")))?;
        state.timer = Some(myself.send_interval(state.period, || {
            JobMessage::Tick(Instant::now())
        }));
        info!(job = state.kind.name(), period = ?state.period, "Job scheduled");
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        debug!(job = state.kind.name(), runs = state.runs, "Job stopped");
        Ok(())
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            JobMessage::Tick(emitted_at) => {
                if is_stale(emitted_at, state.last_finished) {
                    debug!(job = state.kind.name(), "Dropping tick queued during previous run");
                    return Ok(());
                }
                let started = Instant::now();
                if let Err(e) = state.kind.execute(&state.ctx).await {
                    error!(job = state.kind.name(), "Job failed: {}", e);
                }
                let finished = Instant::now();
                if finished - started > state.period {
                    warn!(
                        job = state.kind.name(),
                        elapsed = ?(finished - started),
                        "Job took longer than its period"
                    );
                }
                state.last_finished = Some(finished);
                state.runs += 1;
            }
            JobMessage::RunCount(reply) => {
                let _ = reply.send(state.runs);
            }
        }
        Ok(())
    }
}

/// Owns the job actors. Dropping it without `stop` leaves them running.
pub struct Scheduler {
    jobs: Vec<(JobKind, ActorRef<JobMessage>, JoinHandle<()>)>,
}

impl Scheduler {
    /// Spawn one actor per job with a non-zero period.
    pub async fn start(ctx: Arc<JobContext>, cfg: &JobsConfig) -> Result<Self, FleetError> {
        let mut jobs = Vec::with_capacity(JobKind::ALL.len());
        for kind in JobKind::ALL {
            let secs = match kind {
                JobKind::Telemetry => cfg.telemetry_secs,
                JobKind::TokenRefresh => cfg.token_refresh_secs,
                JobKind::ChargeControl => cfg.charge_control_secs,
                JobKind::Housekeeping => cfg.housekeeping_secs,
            };
            if secs == 0 {
                info!(job = kind.name(), "Job disabled");
                continue;
            }
            // Actor names are process-global; jobs stay unnamed.
            let (actor, handle) = Actor::spawn(
                None,
                JobActor,
                (kind, Duration::from_secs(secs), ctx.clone()),
            )
            .await
            .map_err(|e| FleetError::RactorError(format!("spawn {} failed: {e}", kind.name())))?;
            jobs.push((kind, actor, handle));
        }
        Ok(Self { jobs })
    }

    /// Completed runs of `kind`, `None` when the job is not running.
    pub async fn run_count(&self, kind: JobKind) -> Result<Option<u64>, FleetError> {
        let Some((_, actor, _)) = self.jobs.iter().find(|(k, _, _)| *k == kind) else {
            return Ok(None);
        };
        ractor::call!(actor, JobMessage::RunCount)
            .map(Some)
            .map_err(|e| FleetError::RactorError(format!("RunCount RPC failed: {e}")))
    }

    /// Stop every job after its current run and wait for it.
    pub async fn stop(self) {
        for (kind, actor, handle) in self.jobs {
            actor.stop(None);
            if let Err(e) = handle.await {
                warn!(job = kind.name(), "Job actor did not stop cleanly: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_emitted_before_last_finish_are_stale() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(5);
        assert!(!is_stale(t0, None));
        assert!(is_stale(t0, Some(t1)));
        assert!(!is_stale(t1, Some(t0)));
    }
}
