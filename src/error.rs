// Error taxonomy for the window roller and its warehouse collaborator.

use std::fmt;

use thiserror::Error;

/// Invalid or unshiftable window bounds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("window start {start} is after end {end}")]
    Inverted { start: String, end: String },
    #[error("window cannot be shifted by {stride_days} days without leaving the calendar range")]
    Overflow { stride_days: u32 },
    #[error("window end {end} is the last representable day; its timestamp range has no upper bound")]
    UnboundedEnd { end: String },
}

/// The warehouse operation a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    ReadState,
    RebuildSnapshot,
    RebuildDailyKpis,
    RebuildGlobalKpis,
    PersistState,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::ReadState => "read rolling state",
            Step::RebuildSnapshot => "rebuild snapshot table",
            Step::RebuildDailyKpis => "rebuild daily KPI table",
            Step::RebuildGlobalKpis => "rebuild global KPI table",
            Step::PersistState => "persist rolling state",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    /// No state row exists; it has to be seeded before the first run.
    #[error("rolling state table {table} has no row; seed it with an initial window")]
    StateMissing { table: String },
    #[error("rolling state is corrupt: {0}")]
    StateCorrupt(String),
    #[error("{step} failed: {source:#}")]
    Query {
        step: Step,
        #[source]
        source: anyhow::Error,
    },
}

impl WarehouseError {
    pub fn query(step: Step, source: impl Into<anyhow::Error>) -> Self {
        WarehouseError::Query {
            step,
            source: source.into(),
        }
    }

    /// Step that failed, if the failure came from executing a statement.
    pub fn step(&self) -> Option<Step> {
        match self {
            WarehouseError::Query { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl From<WindowError> for WarehouseError {
    fn from(e: WindowError) -> Self {
        WarehouseError::StateCorrupt(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid run parameters: {0}")]
    InvalidParameters(String),
    #[error("error at iteration {iteration}: {source}")]
    Cycle {
        iteration: u32,
        #[source]
        source: WarehouseError,
    },
}

impl RunError {
    /// 0-based index of the failing cycle.
    pub fn iteration(&self) -> Option<u32> {
        match self {
            RunError::Cycle { iteration, .. } => Some(*iteration),
            RunError::InvalidParameters(_) => None,
        }
    }
}
