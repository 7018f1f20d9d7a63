// Optional in-process trigger: starts a run at each time of a cron schedule
// (local time). Runs share the roller's lock with the HTTP trigger.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::RollerConfig;
use crate::roller::WindowRoller;
use crate::warehouse::Warehouse;

/// Spawns the scheduler. Returns None when no schedule is configured.
pub fn spawn<W>(
    roller: Arc<WindowRoller<W>>,
    config: RollerConfig,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Option<tokio::task::JoinHandle<()>>
where
    W: Warehouse + 'static,
{
    let expr = config.schedule.clone()?;
    let Ok(schedule) = cron::Schedule::from_str(&expr) else {
        warn!(cron = %expr, "invalid roller.schedule; scheduled runs disabled");
        return None;
    };
    Some(tokio::spawn(async move {
        loop {
            let now = chrono::Local::now();
            let Some(next) = schedule.after(&now).next() else {
                info!(cron = %expr, "schedule has no upcoming times");
                break;
            };
            let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut shutdown_rx => {
                    tracing::debug!("Scheduler shutting down");
                    break;
                }
            }
            info!(scheduled_for = %next, "starting scheduled run");
            match roller
                .run(config.iterations, config.stride_days, config.pause_seconds)
                .await
            {
                Ok(report) => info!(
                    iterations = report.iterations,
                    final_window = %report.final_window,
                    "scheduled run complete"
                ),
                Err(e) => warn!(error = %e, "scheduled run failed"),
            }
        }
    }))
}
