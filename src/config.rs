use std::str::FromStr;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub roller: RollerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Which warehouse the roller drives. Selected by `backend = "..."`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum WarehouseConfig {
    Bigquery(BigQueryConfig),
    Sqlite(SqliteConfig),
}

#[derive(Debug, Clone, Deserialize)]
pub struct BigQueryConfig {
    pub project_id: String,
    pub dataset: String,
    /// Fully qualified source table (`project.dataset.table`).
    #[serde(default = "default_source_table")]
    pub source_table: String,
    /// Service account key file. Application default credentials when unset.
    pub credentials_path: Option<String>,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_source_table() -> String {
    "bigquery-public-data.crypto_bitcoin_cash.transactions".into()
}

fn default_query_timeout_secs() -> u64 {
    600
}

fn default_poll_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqliteConfig {
    pub path: String,
}

/// Names of the tables the job reads and replaces, within the configured dataset.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    pub state: String,
    pub snapshot: String,
    pub daily_kpi: String,
    pub global_kpi: String,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            state: "rolling_state".into(),
            snapshot: "transactions_window".into(),
            daily_kpi: "kpi_daily".into(),
            global_kpi: "kpi_global".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RollerConfig {
    /// Cycles per run. Finite so a run always ends.
    pub iterations: u32,
    pub stride_days: u32,
    pub pause_seconds: u64,
    /// Optional cron expression (sec min hour dom month dow), local time.
    pub schedule: Option<String>,
}

impl Default for RollerConfig {
    fn default() -> Self {
        Self {
            iterations: 15,
            stride_days: 7,
            pause_seconds: 5,
            schedule: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {}", path, e))?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        match &self.warehouse {
            WarehouseConfig::Bigquery(bq) => {
                anyhow::ensure!(
                    is_identifier(&bq.project_id, &['-']),
                    "warehouse.project_id must be a non-empty project id, got {:?}",
                    bq.project_id
                );
                anyhow::ensure!(
                    is_identifier(&bq.dataset, &[]),
                    "warehouse.dataset must be a non-empty identifier, got {:?}",
                    bq.dataset
                );
                anyhow::ensure!(
                    is_identifier(&bq.source_table, &['-', '.']),
                    "warehouse.source_table must be a qualified table name, got {:?}",
                    bq.source_table
                );
                anyhow::ensure!(
                    bq.query_timeout_secs > 0,
                    "warehouse.query_timeout_secs must be > 0, got {}",
                    bq.query_timeout_secs
                );
                anyhow::ensure!(
                    bq.poll_interval_ms > 0,
                    "warehouse.poll_interval_ms must be > 0, got {}",
                    bq.poll_interval_ms
                );
            }
            WarehouseConfig::Sqlite(sq) => {
                anyhow::ensure!(!sq.path.is_empty(), "warehouse.path must be non-empty");
            }
        }
        for (key, name) in [
            ("tables.state", &self.tables.state),
            ("tables.snapshot", &self.tables.snapshot),
            ("tables.daily_kpi", &self.tables.daily_kpi),
            ("tables.global_kpi", &self.tables.global_kpi),
        ] {
            anyhow::ensure!(
                is_identifier(name, &[]),
                "{} must be a non-empty identifier, got {:?}",
                key,
                name
            );
        }
        anyhow::ensure!(
            self.roller.iterations > 0,
            "roller.iterations must be > 0, got {}",
            self.roller.iterations
        );
        anyhow::ensure!(
            self.roller.stride_days > 0,
            "roller.stride_days must be > 0, got {}",
            self.roller.stride_days
        );
        if let Some(ref expr) = self.roller.schedule {
            cron::Schedule::from_str(expr)
                .map_err(|e| anyhow::anyhow!("roller.schedule is not a valid cron expression: {}", e))?;
        }
        Ok(())
    }
}

/// ASCII letters, digits, `_`, plus `extra`. Names are interpolated into SQL.
fn is_identifier(s: &str, extra: &[char]) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || extra.contains(&c))
}
