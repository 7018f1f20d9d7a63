// Shared test helpers
#![allow(dead_code)]

use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rolling_kpi::config::TablesConfig;
use rolling_kpi::error::{Step, WarehouseError};
use rolling_kpi::models::{RollingWindow, SourceTransaction};
use rolling_kpi::warehouse::{SqliteWarehouse, Warehouse};
use tempfile::TempDir;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn window(start: NaiveDate, end: NaiveDate) -> RollingWindow {
    RollingWindow::new(start, end).unwrap()
}

pub fn ts(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

/// Source transaction with one input and one output address list; values in satoshis.
pub fn source_tx(
    hash: &str,
    at: DateTime<Utc>,
    input_sats: Option<f64>,
    output_sats: Option<f64>,
    inputs: &[&str],
    outputs: &[&str],
) -> SourceTransaction {
    SourceTransaction {
        hash: hash.to_string(),
        block_number: 670_000,
        block_timestamp: at,
        size: 250,
        virtual_size: 250,
        version: 2,
        input_count: inputs.len().max(1) as i64,
        output_count: outputs.len().max(1) as i64,
        fee: Some(226.0),
        is_coinbase: false,
        input_value: input_sats,
        output_value: output_sats,
        inputs: vec![inputs.iter().map(|a| Some(a.to_string())).collect()],
        outputs: vec![outputs.iter().map(|a| Some(a.to_string())).collect()],
    }
}

/// Fresh SQLite warehouse in a temp dir, initialized. Keep the TempDir alive.
pub async fn sqlite_warehouse() -> (TempDir, SqliteWarehouse) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("warehouse.db");
    let w = SqliteWarehouse::connect(path.to_str().unwrap(), TablesConfig::default())
        .await
        .unwrap();
    w.init().await.unwrap();
    (dir, w)
}

/// Transactions spread over January 2021: two per day at 00:00:00 and 23:59:59.
pub fn january_2021() -> Vec<SourceTransaction> {
    let mut out = Vec::new();
    for day in 1..=31u32 {
        out.push(source_tx(
            &format!("tx-{day:02}-a"),
            ts(2021, 1, day, 0, 0, 0),
            Some(1_000_000_000.0),
            Some(900_000_000.0),
            &["alice", "bob"],
            &["carol"],
        ));
        out.push(source_tx(
            &format!("tx-{day:02}-b"),
            ts(2021, 1, day, 23, 59, 59),
            Some(20_000_000_000.0),
            Some(15_000_000_000.0),
            &["carol"],
            &[format!("addr-{day}").as_str()],
        ));
    }
    out
}

/// In-memory warehouse: only the state row, rebuilds are no-ops.
pub struct MemoryWarehouse {
    pub state: Mutex<Option<RollingWindow>>,
    pub calls: Mutex<Vec<Step>>,
}

impl MemoryWarehouse {
    pub fn new(initial: Option<RollingWindow>) -> Self {
        Self {
            state: Mutex::new(initial),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Option<RollingWindow> {
        *self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Step> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, step: Step) {
        self.calls.lock().unwrap().push(step);
    }
}

impl Warehouse for MemoryWarehouse {
    async fn read_window(&self) -> Result<RollingWindow, WarehouseError> {
        self.record(Step::ReadState);
        self.current().ok_or_else(|| WarehouseError::StateMissing {
            table: "rolling_state".into(),
        })
    }

    async fn rebuild_snapshot(&self, _window: &RollingWindow) -> Result<(), WarehouseError> {
        self.record(Step::RebuildSnapshot);
        Ok(())
    }

    async fn rebuild_daily_kpis(&self) -> Result<(), WarehouseError> {
        self.record(Step::RebuildDailyKpis);
        Ok(())
    }

    async fn rebuild_global_kpis(&self) -> Result<(), WarehouseError> {
        self.record(Step::RebuildGlobalKpis);
        Ok(())
    }

    async fn persist_window(&self, window: &RollingWindow) -> Result<(), WarehouseError> {
        self.record(Step::PersistState);
        *self.state.lock().unwrap() = Some(*window);
        Ok(())
    }
}

/// Wraps a warehouse and fails the `nth` (0-based) call of `step`.
pub struct Faulty<W> {
    pub inner: W,
    step: Step,
    nth: usize,
    seen: Mutex<usize>,
}

impl<W> Faulty<W> {
    pub fn new(inner: W, step: Step, nth: usize) -> Self {
        Self {
            inner,
            step,
            nth,
            seen: Mutex::new(0),
        }
    }

    fn check(&self, step: Step) -> Result<(), WarehouseError> {
        if step != self.step {
            return Ok(());
        }
        let mut seen = self.seen.lock().unwrap();
        let n = *seen;
        *seen += 1;
        if n == self.nth {
            return Err(WarehouseError::query(
                step,
                anyhow::anyhow!("injected failure: quota exceeded"),
            ));
        }
        Ok(())
    }
}

impl<W: Warehouse> Warehouse for Faulty<W> {
    async fn read_window(&self) -> Result<RollingWindow, WarehouseError> {
        self.check(Step::ReadState)?;
        self.inner.read_window().await
    }

    async fn rebuild_snapshot(&self, window: &RollingWindow) -> Result<(), WarehouseError> {
        self.check(Step::RebuildSnapshot)?;
        self.inner.rebuild_snapshot(window).await
    }

    async fn rebuild_daily_kpis(&self) -> Result<(), WarehouseError> {
        self.check(Step::RebuildDailyKpis)?;
        self.inner.rebuild_daily_kpis().await
    }

    async fn rebuild_global_kpis(&self) -> Result<(), WarehouseError> {
        self.check(Step::RebuildGlobalKpis)?;
        self.inner.rebuild_global_kpis().await
    }

    async fn persist_window(&self, window: &RollingWindow) -> Result<(), WarehouseError> {
        self.check(Step::PersistState)?;
        self.inner.persist_window(window).await
    }
}
