// Domain models

mod kpi;
mod transaction;
mod window;

pub use kpi::{DailyKpi, GlobalKpi, KpiMetrics};
pub use transaction::{SnapshotTransaction, SourceTransaction};
pub use window::{RollingWindow, month_start};
