mod common;

use common::Harness;
use solar_fleet::config::JobsConfig;
use solar_fleet::service::scheduler::Scheduler;
use solar_fleet::types::job::{JobContext, JobKind};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn every_job_runs_once_on_start() {
    let h = Harness::new(&[]).await;
    let ctx = Arc::new(JobContext {
        tokens: h.tokens.clone(),
        service: h.service.clone(),
    });
    let cfg = JobsConfig {
        telemetry_secs: 3600,
        token_refresh_secs: 3600,
        charge_control_secs: 3600,
        housekeeping_secs: 3600,
        telemetry_concurrency: 1,
    };

    let scheduler = Scheduler::start(ctx, &cfg).await.unwrap();

    for kind in JobKind::ALL {
        // The immediate tick is queued ahead of this call.
        let runs = scheduler.run_count(kind).await.unwrap();
        assert_eq!(runs, Some(1), "{kind:?}");
    }
    scheduler.stop().await;
}

#[tokio::test]
async fn zero_period_disables_a_job() {
    let h = Harness::new(&[]).await;
    let ctx = Arc::new(JobContext {
        tokens: h.tokens.clone(),
        service: h.service.clone(),
    });
    let cfg = JobsConfig {
        telemetry_secs: 0,
        token_refresh_secs: 3600,
        charge_control_secs: 0,
        housekeeping_secs: 0,
        telemetry_concurrency: 1,
    };

    let scheduler = Scheduler::start(ctx, &cfg).await.unwrap();

    assert_eq!(scheduler.run_count(JobKind::Telemetry).await.unwrap(), None);
    assert_eq!(
        scheduler.run_count(JobKind::TokenRefresh).await.unwrap(),
        Some(1)
    );
    scheduler.stop().await;
}

#[tokio::test]
async fn failing_job_keeps_running_on_its_cadence() {
    let h = Harness::new(&[]).await;
    let ctx = Arc::new(JobContext {
        tokens: h.tokens.clone(),
        service: h.service.clone(),
    });
    let cfg = JobsConfig {
        telemetry_secs: 0,
        token_refresh_secs: 0,
        charge_control_secs: 0,
        housekeeping_secs: 1,
        telemetry_concurrency: 1,
    };
    // Every storage call fails from here on, so each housekeeping run errors.
    h.storage.pool().close().await;
    assert!(h.tokens.acquire_if_missing(chrono::Utc::now()).await.is_err());

    let scheduler = Scheduler::start(ctx, &cfg).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let runs = scheduler
        .run_count(JobKind::Housekeeping)
        .await
        .unwrap()
        .unwrap();
    assert!(runs >= 3, "runs = {runs}");
    scheduler.stop().await;
}
