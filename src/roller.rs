// Window roller: read window → shift → rebuild snapshot → rebuild daily and
// global KPIs → persist window → pause, for a bounded number of cycles.
// State only advances after all three rebuilds of a cycle succeed, so the
// persisted window always matches the materialized tables.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::error::{RunError, WarehouseError};
use crate::models::RollingWindow;
use crate::warehouse::Warehouse;

/// Outcome of a fully successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub iterations: u32,
    /// Window persisted before the first cycle.
    pub initial_window: RollingWindow,
    /// Window persisted by the last cycle.
    pub final_window: RollingWindow,
}

pub struct WindowRoller<W> {
    warehouse: W,
    // Serializes runs started from this process (HTTP trigger and scheduler).
    run_lock: Mutex<()>,
}

impl<W: Warehouse> WindowRoller<W> {
    pub fn new(warehouse: W) -> Self {
        Self {
            warehouse,
            run_lock: Mutex::new(()),
        }
    }

    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// Runs `iterations` cycles, each shifting the window by `stride_days`,
    /// pausing `pause_seconds` between cycles. Stops at the first failing
    /// cycle; earlier cycles are not rolled back.
    #[instrument(skip(self))]
    pub async fn run(
        &self,
        iterations: u32,
        stride_days: u32,
        pause_seconds: u64,
    ) -> Result<RunReport, RunError> {
        if iterations == 0 {
            return Err(RunError::InvalidParameters(
                "iterations must be > 0".into(),
            ));
        }
        if stride_days == 0 {
            return Err(RunError::InvalidParameters(
                "stride_days must be > 0".into(),
            ));
        }

        let _guard = self.run_lock.lock().await;
        let pause = Duration::from_secs(pause_seconds);
        let mut width: Option<i64> = None;
        let mut report: Option<RunReport> = None;

        for iteration in 0..iterations {
            let (previous, current) = self
                .run_cycle(stride_days, &mut width)
                .await
                .map_err(|source| RunError::Cycle { iteration, source })?;

            info!(
                iteration,
                start_date = %current.start_date(),
                end_date = %current.end_date(),
                "iteration complete"
            );

            report = Some(match report {
                None => RunReport {
                    iterations: 1,
                    initial_window: previous,
                    final_window: current,
                },
                Some(r) => RunReport {
                    iterations: r.iterations + 1,
                    final_window: current,
                    ..r
                },
            });

            if iteration + 1 < iterations && !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        report.ok_or_else(|| RunError::InvalidParameters("iterations must be > 0".into()))
    }

    /// One cycle. Returns the window read and the window persisted.
    async fn run_cycle(
        &self,
        stride_days: u32,
        width: &mut Option<i64>,
    ) -> Result<(RollingWindow, RollingWindow), WarehouseError> {
        let previous = self.warehouse.read_window().await?;
        match *width {
            Some(w) if w != previous.width_days() => {
                return Err(WarehouseError::StateCorrupt(format!(
                    "window {} is {} days wide, expected {}",
                    previous,
                    previous.width_days(),
                    w
                )));
            }
            Some(_) => {}
            None => *width = Some(previous.width_days()),
        }

        let next = previous.shifted(stride_days)?;
        self.warehouse.rebuild_snapshot(&next).await?;
        self.warehouse.rebuild_daily_kpis().await?;
        self.warehouse.rebuild_global_kpis().await?;
        self.warehouse.persist_window(&next).await?;
        Ok((previous, next))
    }
}
