// Local SQLite warehouse with the same contract as BigQuery.
// Derived tables are dropped and recreated inside a transaction (full replace);
// KPIs are computed by crate::kpi from rows read back from the snapshot table.
// Address lists are stored as JSON text.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::{debug, instrument};

use super::Warehouse;
use crate::config::TablesConfig;
use crate::error::{Step, WarehouseError};
use crate::kpi;
use crate::models::{
    DailyKpi, GlobalKpi, KpiMetrics, RollingWindow, SnapshotTransaction, SourceTransaction,
    month_start,
};
use crate::snapshot;

/// Local stand-in for the public source dataset.
pub const SOURCE_TABLE: &str = "source_transactions";

const METRIC_COLUMNS_DDL: &str = "
    transaction_count INTEGER NOT NULL,
    volume REAL,
    mean_value REAL,
    median_value REAL,
    io_complexity REAL,
    velocity_proxy REAL,
    coinbase_ratio REAL,
    whale_volume REAL,
    whale_ratio REAL,
    active_addresses INTEGER NOT NULL";

const METRIC_COLUMNS: &str = "transaction_count, volume, mean_value, median_value, io_complexity, \
     velocity_proxy, coinbase_ratio, whale_volume, whale_ratio, active_addresses";

pub struct SqliteWarehouse {
    pool: SqlitePool,
    tables: TablesConfig,
}

impl SqliteWarehouse {
    /// Connect to SQLite at `path`, creating parent dir and DB if missing.
    pub async fn connect(path: &str, tables: TablesConfig) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new().connect_with(opts).await?;
        Ok(Self { pool, tables })
    }

    /// Creates the source and state tables if missing. The state row is not seeded.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {SOURCE_TABLE} (
                hash TEXT PRIMARY KEY,
                block_number INTEGER NOT NULL,
                block_timestamp INTEGER NOT NULL,
                block_timestamp_month TEXT NOT NULL,
                size INTEGER NOT NULL,
                virtual_size INTEGER NOT NULL,
                version INTEGER NOT NULL,
                input_count INTEGER NOT NULL,
                output_count INTEGER NOT NULL,
                fee REAL,
                is_coinbase INTEGER NOT NULL,
                input_value REAL,
                output_value REAL,
                inputs TEXT NOT NULL,
                outputs TEXT NOT NULL
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{SOURCE_TABLE}_month ON {SOURCE_TABLE}(block_timestamp_month, block_timestamp)"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (start_date TEXT, end_date TEXT)",
            self.tables.state
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replaces the state row with `window`.
    pub async fn seed_window(&self, window: &RollingWindow) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DELETE FROM {}", self.tables.state))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "INSERT INTO {} (start_date, end_date) VALUES ($1, $2)",
            self.tables.state
        ))
        .bind(window.start_date().to_string())
        .bind(window.end_date().to_string())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn insert_source_transactions(
        &self,
        transactions: &[SourceTransaction],
    ) -> anyhow::Result<()> {
        if transactions.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for t in transactions {
            let month = month_start(t.block_timestamp.date_naive());
            sqlx::query(&format!(
                "INSERT OR REPLACE INTO {SOURCE_TABLE} (hash, block_number, block_timestamp, block_timestamp_month, size, virtual_size, version, input_count, output_count, fee, is_coinbase, input_value, output_value, inputs, outputs)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
            ))
            .bind(&t.hash)
            .bind(t.block_number)
            .bind(t.block_timestamp.timestamp_millis())
            .bind(month.to_string())
            .bind(t.size)
            .bind(t.virtual_size)
            .bind(t.version)
            .bind(t.input_count)
            .bind(t.output_count)
            .bind(t.fee)
            .bind(t.is_coinbase)
            .bind(t.input_value)
            .bind(t.output_value)
            .bind(serde_json::to_string(&t.inputs)?)
            .bind(serde_json::to_string(&t.outputs)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Source rows matching the partition (month) and exact timestamp predicates.
    async fn source_rows_in(&self, window: &RollingWindow) -> anyhow::Result<Vec<SourceTransaction>> {
        let (m_start, m_end) = window.month_bounds();
        let (from, to) = window.timestamp_bounds()?;
        let rows = sqlx::query(&format!(
            "SELECT hash, block_number, block_timestamp, size, virtual_size, version, input_count, output_count, fee, is_coinbase, input_value, output_value, inputs, outputs
             FROM {SOURCE_TABLE}
             WHERE block_timestamp_month BETWEEN $1 AND $2
               AND block_timestamp >= $3 AND block_timestamp < $4"
        ))
        .bind(m_start.to_string())
        .bind(m_end.to_string())
        .bind(from.timestamp_millis())
        .bind(to.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let inputs: String = row.try_get("inputs")?;
            let outputs: String = row.try_get("outputs")?;
            out.push(SourceTransaction {
                hash: row.try_get("hash")?,
                block_number: row.try_get("block_number")?,
                block_timestamp: from_millis(row.try_get("block_timestamp")?)?,
                size: row.try_get("size")?,
                virtual_size: row.try_get("virtual_size")?,
                version: row.try_get("version")?,
                input_count: row.try_get("input_count")?,
                output_count: row.try_get("output_count")?,
                fee: row.try_get("fee")?,
                is_coinbase: row.try_get("is_coinbase")?,
                input_value: row.try_get("input_value")?,
                output_value: row.try_get("output_value")?,
                inputs: serde_json::from_str(&inputs)?,
                outputs: serde_json::from_str(&outputs)?,
            });
        }
        Ok(out)
    }

    async fn replace_snapshot(&self, rows: &[SnapshotTransaction]) -> anyhow::Result<()> {
        let table = &self.tables.snapshot;
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            r#"
            CREATE TABLE {table} (
                transaction_hash TEXT NOT NULL,
                block_number INTEGER NOT NULL,
                block_timestamp INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                virtual_size_bytes INTEGER NOT NULL,
                protocol_version INTEGER NOT NULL,
                input_count INTEGER NOT NULL,
                output_count INTEGER NOT NULL,
                fee REAL,
                is_coinbase INTEGER NOT NULL,
                input_value REAL,
                output_value REAL,
                input_addresses TEXT NOT NULL,
                output_addresses TEXT NOT NULL
            )
            "#
        ))
        .execute(&mut *tx)
        .await?;
        for r in rows {
            sqlx::query(&format!(
                "INSERT INTO {table} (transaction_hash, block_number, block_timestamp, size_bytes, virtual_size_bytes, protocol_version, input_count, output_count, fee, is_coinbase, input_value, output_value, input_addresses, output_addresses)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
            ))
            .bind(&r.transaction_hash)
            .bind(r.block_number)
            .bind(r.block_timestamp.timestamp_millis())
            .bind(r.size_bytes)
            .bind(r.virtual_size_bytes)
            .bind(r.protocol_version)
            .bind(r.input_count)
            .bind(r.output_count)
            .bind(r.fee)
            .bind(r.is_coinbase)
            .bind(r.input_value)
            .bind(r.output_value)
            .bind(serde_json::to_string(&r.input_addresses)?)
            .bind(serde_json::to_string(&r.output_addresses)?)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(&format!(
            "CREATE INDEX idx_{table}_block_timestamp ON {table}(block_timestamp)"
        ))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Current contents of the snapshot table, ordered by block timestamp then hash.
    pub async fn snapshot_rows(&self) -> anyhow::Result<Vec<SnapshotTransaction>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM {} ORDER BY block_timestamp ASC, transaction_hash ASC",
            self.tables.snapshot
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let input_addresses: String = row.try_get("input_addresses")?;
            let output_addresses: String = row.try_get("output_addresses")?;
            out.push(SnapshotTransaction {
                transaction_hash: row.try_get("transaction_hash")?,
                block_number: row.try_get("block_number")?,
                block_timestamp: from_millis(row.try_get("block_timestamp")?)?,
                size_bytes: row.try_get("size_bytes")?,
                virtual_size_bytes: row.try_get("virtual_size_bytes")?,
                protocol_version: row.try_get("protocol_version")?,
                input_count: row.try_get("input_count")?,
                output_count: row.try_get("output_count")?,
                fee: row.try_get("fee")?,
                is_coinbase: row.try_get("is_coinbase")?,
                input_value: row.try_get("input_value")?,
                output_value: row.try_get("output_value")?,
                input_addresses: serde_json::from_str(&input_addresses)?,
                output_addresses: serde_json::from_str(&output_addresses)?,
            });
        }
        Ok(out)
    }

    async fn replace_daily_kpis(&self, rows: &[DailyKpi]) -> anyhow::Result<()> {
        let table = &self.tables.daily_kpi;
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE {table} (day TEXT PRIMARY KEY, {METRIC_COLUMNS_DDL})"
        ))
        .execute(&mut *tx)
        .await?;
        for r in rows {
            bind_metrics(
                sqlx::query(&format!(
                    "INSERT INTO {table} (day, {METRIC_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
                ))
                .bind(r.day.to_string()),
                &r.metrics,
            )
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_global_kpi(&self, row: &GlobalKpi) -> anyhow::Result<()> {
        let table = &self.tables.global_kpi;
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("CREATE TABLE {table} ({METRIC_COLUMNS_DDL})"))
            .execute(&mut *tx)
            .await?;
        bind_metrics(
            sqlx::query(&format!(
                "INSERT INTO {table} ({METRIC_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
            )),
            &row.metrics,
        )
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Current contents of the daily KPI table, ascending by day.
    pub async fn daily_kpis(&self) -> anyhow::Result<Vec<DailyKpi>> {
        let rows = sqlx::query(&format!(
            "SELECT day, {METRIC_COLUMNS} FROM {} ORDER BY day ASC",
            self.tables.daily_kpi
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let day: String = row.try_get("day")?;
            out.push(DailyKpi {
                day: NaiveDate::parse_from_str(&day, "%Y-%m-%d")?,
                metrics: parse_metrics(&row)?,
            });
        }
        Ok(out)
    }

    /// The global KPI rows (one after a successful rebuild).
    pub async fn global_kpis(&self) -> anyhow::Result<Vec<GlobalKpi>> {
        let rows = sqlx::query(&format!(
            "SELECT {METRIC_COLUMNS} FROM {}",
            self.tables.global_kpi
        ))
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(GlobalKpi {
                metrics: parse_metrics(&row)?,
            });
        }
        Ok(out)
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_metrics<'q>(q: SqliteQuery<'q>, m: &KpiMetrics) -> SqliteQuery<'q> {
    q.bind(m.transaction_count)
        .bind(m.volume)
        .bind(m.mean_value)
        .bind(m.median_value)
        .bind(m.io_complexity)
        .bind(m.velocity_proxy)
        .bind(m.coinbase_ratio)
        .bind(m.whale_volume)
        .bind(m.whale_ratio)
        .bind(m.active_addresses)
}

fn parse_metrics(row: &SqliteRow) -> anyhow::Result<KpiMetrics> {
    Ok(KpiMetrics {
        transaction_count: row.try_get("transaction_count")?,
        volume: row.try_get("volume")?,
        mean_value: row.try_get("mean_value")?,
        median_value: row.try_get("median_value")?,
        io_complexity: row.try_get("io_complexity")?,
        velocity_proxy: row.try_get("velocity_proxy")?,
        coinbase_ratio: row.try_get("coinbase_ratio")?,
        whale_volume: row.try_get("whale_volume")?,
        whale_ratio: row.try_get("whale_ratio")?,
        active_addresses: row.try_get("active_addresses")?,
    })
}

fn from_millis(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow::anyhow!("timestamp {} out of range", ms))
}

fn parse_state_date(row: &SqliteRow, column: &str) -> Result<NaiveDate, WarehouseError> {
    let value: Option<String> = row.try_get(column).map_err(|e| {
        WarehouseError::StateCorrupt(format!("{} is not a text date: {}", column, e))
    })?;
    let value =
        value.ok_or_else(|| WarehouseError::StateCorrupt(format!("{} is NULL", column)))?;
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|e| {
        WarehouseError::StateCorrupt(format!("{} {:?} is not a date: {}", column, value, e))
    })
}

impl Warehouse for SqliteWarehouse {
    #[instrument(skip(self), fields(warehouse = "sqlite", operation = "read_window"))]
    async fn read_window(&self) -> Result<RollingWindow, WarehouseError> {
        let rows = sqlx::query(&format!(
            "SELECT start_date, end_date FROM {} LIMIT 2",
            self.tables.state
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| WarehouseError::query(Step::ReadState, e))?;
        match rows.as_slice() {
            [] => Err(WarehouseError::StateMissing {
                table: self.tables.state.clone(),
            }),
            [row] => {
                let start = parse_state_date(row, "start_date")?;
                let end = parse_state_date(row, "end_date")?;
                Ok(RollingWindow::new(start, end)?)
            }
            _ => Err(WarehouseError::StateCorrupt(format!(
                "{} holds more than one row",
                self.tables.state
            ))),
        }
    }

    #[instrument(skip(self), fields(warehouse = "sqlite", operation = "rebuild_snapshot", window = %window))]
    async fn rebuild_snapshot(&self, window: &RollingWindow) -> Result<(), WarehouseError> {
        let result = async {
            let source = self.source_rows_in(window).await?;
            let rows = snapshot::build_snapshot(window, &source);
            self.replace_snapshot(&rows).await?;
            Ok::<_, anyhow::Error>(rows.len())
        }
        .await;
        let n = result.map_err(|e| WarehouseError::query(Step::RebuildSnapshot, e))?;
        debug!(rows = n, "snapshot rebuilt");
        Ok(())
    }

    #[instrument(skip(self), fields(warehouse = "sqlite", operation = "rebuild_daily_kpis"))]
    async fn rebuild_daily_kpis(&self) -> Result<(), WarehouseError> {
        let result = async {
            let rows = self.snapshot_rows().await?;
            let daily = kpi::daily_kpis(&rows);
            self.replace_daily_kpis(&daily).await?;
            Ok::<_, anyhow::Error>(daily.len())
        }
        .await;
        let n = result.map_err(|e| WarehouseError::query(Step::RebuildDailyKpis, e))?;
        debug!(days = n, "daily KPIs rebuilt");
        Ok(())
    }

    #[instrument(skip(self), fields(warehouse = "sqlite", operation = "rebuild_global_kpis"))]
    async fn rebuild_global_kpis(&self) -> Result<(), WarehouseError> {
        let result: anyhow::Result<()> = async {
            let rows = self.snapshot_rows().await?;
            self.replace_global_kpi(&kpi::global_kpi(&rows)).await
        }
        .await;
        result.map_err(|e| WarehouseError::query(Step::RebuildGlobalKpis, e))
    }

    #[instrument(skip(self), fields(warehouse = "sqlite", operation = "persist_window", window = %window))]
    async fn persist_window(&self, window: &RollingWindow) -> Result<(), WarehouseError> {
        let r = sqlx::query(&format!(
            "UPDATE {} SET start_date = $1, end_date = $2",
            self.tables.state
        ))
        .bind(window.start_date().to_string())
        .bind(window.end_date().to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| WarehouseError::query(Step::PersistState, e))?;
        if r.rows_affected() == 0 {
            return Err(WarehouseError::StateMissing {
                table: self.tables.state.clone(),
            });
        }
        Ok(())
    }
}
