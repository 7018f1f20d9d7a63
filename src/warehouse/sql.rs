// BigQuery statements for one roll cycle. Table names are validated
// identifiers (see config); dates are rendered as DATE literals.

use chrono::NaiveDate;

use crate::config::TablesConfig;
use crate::kpi::WHALE_THRESHOLD;
use crate::models::RollingWindow;

/// Backtick-quoted, fully qualified table references.
#[derive(Debug, Clone)]
pub struct TableRefs {
    pub source: String,
    pub state: String,
    pub snapshot: String,
    pub daily_kpi: String,
    pub global_kpi: String,
}

impl TableRefs {
    pub fn new(project_id: &str, dataset: &str, source_table: &str, tables: &TablesConfig) -> Self {
        let q = |t: &str| format!("`{}.{}.{}`", project_id, dataset, t);
        Self {
            source: format!("`{}`", source_table),
            state: q(&tables.state),
            snapshot: q(&tables.snapshot),
            daily_kpi: q(&tables.daily_kpi),
            global_kpi: q(&tables.global_kpi),
        }
    }
}

fn date_literal(d: NaiveDate) -> String {
    format!("DATE '{}'", d.format("%Y-%m-%d"))
}

/// LIMIT 2 so a duplicated state row is detected rather than silently picked.
pub fn read_state(t: &TableRefs) -> String {
    format!(
        "SELECT FORMAT_DATE('%F', start_date) AS start_date, FORMAT_DATE('%F', end_date) AS end_date FROM {} LIMIT 2",
        t.state
    )
}

/// Script rebuilding the snapshot table. The month predicate prunes
/// `block_timestamp_month` partitions and always covers the exact range.
pub fn rebuild_snapshot(t: &TableRefs, window: &RollingWindow) -> String {
    format!(
        r#"
DECLARE new_start DATE DEFAULT {start};
DECLARE new_end DATE DEFAULT {end};
DECLARE m_start DATE DEFAULT DATE_TRUNC(new_start, MONTH);
DECLARE m_end DATE DEFAULT DATE_TRUNC(new_end, MONTH);

CREATE OR REPLACE TABLE {snapshot}
PARTITION BY DATE(block_timestamp)
CLUSTER BY transaction_hash AS
SELECT
    t.hash AS transaction_hash,
    t.block_number AS block_number,
    t.block_timestamp AS block_timestamp,
    t.size AS size_bytes,
    t.virtual_size AS virtual_size_bytes,
    t.version AS protocol_version,
    t.input_count AS input_count,
    t.output_count AS output_count,
    t.fee AS fee,
    t.is_coinbase AS is_coinbase,
    SAFE_DIVIDE(t.input_value, 1e8) AS input_value,
    SAFE_DIVIDE(t.output_value, 1e8) AS output_value,
    ARRAY(SELECT DISTINCT addr FROM UNNEST(t.inputs) i CROSS JOIN UNNEST(i.addresses) addr WHERE addr IS NOT NULL) AS input_addresses,
    ARRAY(SELECT DISTINCT addr FROM UNNEST(t.outputs) o CROSS JOIN UNNEST(o.addresses) addr WHERE addr IS NOT NULL) AS output_addresses
FROM {source} t
WHERE t.block_timestamp_month BETWEEN m_start AND m_end
  AND t.block_timestamp >= TIMESTAMP(new_start)
  AND t.block_timestamp < TIMESTAMP(DATE_ADD(new_end, INTERVAL 1 DAY));
"#,
        start = date_literal(window.start_date()),
        end = date_literal(window.end_date()),
        snapshot = t.snapshot,
        source = t.source,
    )
}

/// Metric columns shared by both KPI tables; `{snapshot}` rows in scope.
fn metric_columns() -> String {
    format!(
        r#"COUNT(*) AS transaction_count,
    SUM(output_value) AS volume,
    AVG(output_value) AS mean_value,
    APPROX_QUANTILES(output_value, 100)[OFFSET(50)] AS median_value,
    SAFE_DIVIDE(SUM(input_count), NULLIF(SUM(output_count), 0)) AS io_complexity,
    SAFE_DIVIDE(SUM(output_value), SUM(input_value)) AS velocity_proxy,
    SAFE_DIVIDE(SUM(CASE WHEN is_coinbase THEN 1 ELSE 0 END), COUNT(*)) AS coinbase_ratio,
    SUM(CASE WHEN output_value >= {w} THEN output_value ELSE 0 END) AS whale_volume,
    SAFE_DIVIDE(SUM(CASE WHEN output_value >= {w} THEN output_value ELSE 0 END), SUM(output_value)) AS whale_ratio"#,
        w = WHALE_THRESHOLD
    )
}

pub fn rebuild_daily_kpis(t: &TableRefs) -> String {
    format!(
        r#"
CREATE OR REPLACE TABLE {daily}
PARTITION BY day AS
WITH tx_daily AS (
    SELECT
    DATE(block_timestamp) AS day,
    {metrics}
    FROM {snapshot}
    GROUP BY day
),
active AS (
    SELECT day, COUNT(DISTINCT address) AS active_addresses
    FROM (
        SELECT DATE(block_timestamp) AS day, addr AS address FROM {snapshot}, UNNEST(input_addresses) AS addr
        UNION DISTINCT
        SELECT DATE(block_timestamp) AS day, addr AS address FROM {snapshot}, UNNEST(output_addresses) AS addr
    )
    WHERE address IS NOT NULL
    GROUP BY day
)
SELECT d.*, COALESCE(a.active_addresses, 0) AS active_addresses
FROM tx_daily d LEFT JOIN active a USING (day);
"#,
        daily = t.daily_kpi,
        snapshot = t.snapshot,
        metrics = metric_columns(),
    )
}

pub fn rebuild_global_kpis(t: &TableRefs) -> String {
    format!(
        r#"
CREATE OR REPLACE TABLE {global} AS
WITH all_addresses AS (
    SELECT addr AS address FROM {snapshot}, UNNEST(input_addresses) AS addr
    UNION DISTINCT
    SELECT addr AS address FROM {snapshot}, UNNEST(output_addresses) AS addr
)
SELECT
    {metrics},
    (SELECT COUNT(DISTINCT address) FROM all_addresses WHERE address IS NOT NULL) AS active_addresses
FROM {snapshot};
"#,
        global = t.global_kpi,
        snapshot = t.snapshot,
        metrics = metric_columns(),
    )
}

/// Absolute assignment, so replaying the statement after a lost
/// acknowledgement does not move the window twice.
pub fn persist_state(t: &TableRefs, window: &RollingWindow) -> String {
    format!(
        "UPDATE {} SET start_date = {}, end_date = {} WHERE TRUE",
        t.state,
        date_literal(window.start_date()),
        date_literal(window.end_date()),
    )
}
