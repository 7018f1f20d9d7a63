// KPI rows. Every ratio is None when its denominator is zero or NULL.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Metric set shared by the daily and global KPI tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiMetrics {
    pub transaction_count: i64,
    pub volume: Option<f64>,
    pub mean_value: Option<f64>,
    /// Approximate 50th percentile of output value.
    pub median_value: Option<f64>,
    /// SUM(input_count) / SUM(output_count).
    pub io_complexity: Option<f64>,
    /// SUM(output_value) / SUM(input_value).
    pub velocity_proxy: Option<f64>,
    pub coinbase_ratio: Option<f64>,
    pub whale_volume: Option<f64>,
    pub whale_ratio: Option<f64>,
    pub active_addresses: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyKpi {
    pub day: NaiveDate,
    #[serde(flatten)]
    pub metrics: KpiMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalKpi {
    #[serde(flatten)]
    pub metrics: KpiMetrics,
}
