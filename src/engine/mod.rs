//! Background scheduler plumbing.
//!
//! Every periodic job runs through [`run_periodic`]: a tokio interval raced
//! against the shared shutdown token, timing each tick into
//! `scheduler_tick_seconds`. A failing tick is logged and the loop carries on.

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::AppError;
use crate::observability::metrics::Metrics;
use crate::state::AppState;

pub async fn run_periodic<F, Fut, T>(
    task: &'static str,
    period: Duration,
    shutdown: CancellationToken,
    metrics: Arc<Metrics>,
    mut tick: F,
) where
    F: FnMut(DateTime<Utc>) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
    T: Debug,
{
    info!(task, period_secs = period.as_secs_f64(), "scheduler started");

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let started = Instant::now();
                let outcome = match tick(Utc::now()).await {
                    Ok(result) => {
                        debug!(task, ?result, "scheduler tick finished");
                        "ok"
                    }
                    Err(err) => {
                        error!(task, error = %err, "scheduler tick failed");
                        "error"
                    }
                };
                metrics
                    .scheduler_tick_seconds
                    .with_label_values(&[task, outcome])
                    .observe(started.elapsed().as_secs_f64());
            }
        }
    }

    info!(task, "scheduler stopped");
}

/// Starts the order and matching schedulers. They all stop once `shutdown`
/// is cancelled; await the handles to wait for them.
pub fn spawn_background_tasks(
    state: &AppState,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(state.orders.clone().run_timeout_monitor(shutdown.clone())),
        tokio::spawn(
            state
                .orders
                .clone()
                .run_schedule_incentive_ticker(shutdown.clone()),
        ),
        tokio::spawn(
            state
                .orders
                .clone()
                .run_schedule_expire_ticker(shutdown.clone()),
        ),
        tokio::spawn(state.matching.clone().run_scheduler(shutdown.clone())),
    ]
}
