//! Cron-driven trigger for the daily reset job

use crate::core::clock::Clock;
use crate::jobs::DailyReset;
use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },
    #[error("UTC offset of {0} hours is out of range")]
    InvalidOffset(i32),
}

/// `hours` east of UTC as a fixed offset
pub fn utc_offset(hours: i32) -> Result<FixedOffset, SchedulerError> {
    hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .ok_or(SchedulerError::InvalidOffset(hours))
}

/// Fires the daily reset at each cron tick, evaluated in the job's offset
pub struct ResetScheduler {
    job: Arc<DailyReset>,
    schedule: Schedule,
    cron_expr: String,
    clock: Arc<dyn Clock>,
    handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl ResetScheduler {
    /// # Arguments
    /// * `job` - reset job; its offset decides which timezone the cron runs in
    /// * `cron_expr` - six-field cron expression, e.g. `0 0 3 * * *`
    /// * `clock` - wall-clock source
    pub fn new(
        job: Arc<DailyReset>,
        cron_expr: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SchedulerError> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            reason: e.to_string(),
        })?;

        info!(cron = %cron_expr, offset = %job.offset(), "ResetScheduler: created");

        Ok(Self {
            job,
            schedule,
            cron_expr: cron_expr.to_string(),
            clock,
            handle: Arc::new(RwLock::new(None)),
        })
    }

    pub fn cron_expr(&self) -> &str {
        &self.cron_expr
    }

    /// First firing strictly after `after`
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_after(&self.schedule, self.job.offset(), after)
    }

    pub async fn start(&self) {
        let mut slot = self.handle.write().await;
        if slot.is_some() {
            warn!("ResetScheduler: already running");
            return;
        }

        let job = self.job.clone();
        let schedule = self.schedule.clone();
        let clock = self.clock.clone();

        let handle = tokio::spawn(async move {
            let offset = job.offset();
            let mut last_fire: Option<DateTime<Utc>> = None;

            loop {
                let now = clock.now();
                let from = last_fire.map_or(now, |last| last.max(now));
                let Some(next) = next_after(&schedule, offset, from) else {
                    warn!("ResetScheduler: schedule has no upcoming firings, stopping");
                    return;
                };

                loop {
                    let wait = clock.until(next);
                    if wait.is_zero() {
                        break;
                    }
                    tokio::time::sleep(wait).await;
                }

                info!(scheduled_for = %next, "ResetScheduler: tick");
                if let Err(e) = job.run(clock.now()).await {
                    error!(error = %e, "ResetScheduler: daily reset failed, next run unaffected");
                }
                last_fire = Some(next);
            }
        });

        *slot = Some(handle);
        info!("ResetScheduler: started");
    }

    pub async fn stop(&self) {
        let mut handle = self.handle.write().await;
        if let Some(h) = handle.take() {
            h.abort();
            info!("ResetScheduler: stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        let handle = self.handle.read().await;
        handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

fn next_after(
    schedule: &Schedule,
    offset: FixedOffset,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    schedule
        .after(&after.with_timezone(&offset))
        .next()
        .map(|at| at.with_timezone(&Utc))
}
