// Warehouse collaborator: the only external dependency of the roller.
// Each operation returns once the warehouse has committed it; nothing spans
// more than one operation.

pub mod bigquery;
pub mod sql;
pub mod sqlite;

use std::future::Future;

use crate::config::{AppConfig, WarehouseConfig};
use crate::error::WarehouseError;
use crate::models::RollingWindow;

pub use bigquery::BigQueryWarehouse;
pub use sqlite::SqliteWarehouse;

pub trait Warehouse: Send + Sync {
    /// The single persisted window row.
    fn read_window(&self) -> impl Future<Output = Result<RollingWindow, WarehouseError>> + Send;

    /// Fully replace the snapshot table with source rows inside `window`.
    fn rebuild_snapshot(
        &self,
        window: &RollingWindow,
    ) -> impl Future<Output = Result<(), WarehouseError>> + Send;

    /// Fully replace the daily KPI table from the snapshot table.
    fn rebuild_daily_kpis(&self) -> impl Future<Output = Result<(), WarehouseError>> + Send;

    /// Fully replace the global KPI table from the snapshot table.
    fn rebuild_global_kpis(&self) -> impl Future<Output = Result<(), WarehouseError>> + Send;

    /// Overwrite the state row with `window`.
    fn persist_window(
        &self,
        window: &RollingWindow,
    ) -> impl Future<Output = Result<(), WarehouseError>> + Send;
}

/// Backend chosen by `[warehouse] backend`.
pub enum WarehouseBackend {
    BigQuery(BigQueryWarehouse),
    Sqlite(SqliteWarehouse),
}

impl WarehouseBackend {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        match &config.warehouse {
            WarehouseConfig::Bigquery(bq) => Ok(Self::BigQuery(
                BigQueryWarehouse::connect(bq, &config.tables).await?,
            )),
            WarehouseConfig::Sqlite(sq) => {
                let w = SqliteWarehouse::connect(&sq.path, config.tables.clone()).await?;
                w.init().await?;
                Ok(Self::Sqlite(w))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BigQuery(_) => "bigquery",
            Self::Sqlite(_) => "sqlite",
        }
    }
}

impl Warehouse for WarehouseBackend {
    async fn read_window(&self) -> Result<RollingWindow, WarehouseError> {
        match self {
            Self::BigQuery(w) => w.read_window().await,
            Self::Sqlite(w) => w.read_window().await,
        }
    }

    async fn rebuild_snapshot(&self, window: &RollingWindow) -> Result<(), WarehouseError> {
        match self {
            Self::BigQuery(w) => w.rebuild_snapshot(window).await,
            Self::Sqlite(w) => w.rebuild_snapshot(window).await,
        }
    }

    async fn rebuild_daily_kpis(&self) -> Result<(), WarehouseError> {
        match self {
            Self::BigQuery(w) => w.rebuild_daily_kpis().await,
            Self::Sqlite(w) => w.rebuild_daily_kpis().await,
        }
    }

    async fn rebuild_global_kpis(&self) -> Result<(), WarehouseError> {
        match self {
            Self::BigQuery(w) => w.rebuild_global_kpis().await,
            Self::Sqlite(w) => w.rebuild_global_kpis().await,
        }
    }

    async fn persist_window(&self, window: &RollingWindow) -> Result<(), WarehouseError> {
        match self {
            Self::BigQuery(w) => w.persist_window(window).await,
            Self::Sqlite(w) => w.persist_window(window).await,
        }
    }
}
