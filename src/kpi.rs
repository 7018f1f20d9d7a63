// KPI aggregation over snapshot rows.
// Follows SQL aggregate semantics: SUM/AVG of no non-NULL values is NULL,
// COUNT of no rows is 0, and ratios are NULL on a NULL or zero denominator.

use std::collections::{BTreeMap, HashSet};

use crate::models::{DailyKpi, GlobalKpi, KpiMetrics, SnapshotTransaction};

/// Output value (in coins) from which a transaction counts as a whale.
pub const WHALE_THRESHOLD: f64 = 100.0;

/// Division that yields None instead of failing: NULL operand, zero or
/// non-finite result.
pub fn safe_divide(numerator: Option<f64>, denominator: Option<f64>) -> Option<f64> {
    let (n, d) = (numerator?, denominator?);
    if d == 0.0 {
        return None;
    }
    let q = n / d;
    q.is_finite().then_some(q)
}

/// SUM over the non-NULL values; None when there are none.
pub fn sum_non_null(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    values
        .into_iter()
        .flatten()
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// AVG over the non-NULL values; None when there are none.
pub fn mean_non_null(values: impl IntoIterator<Item = Option<f64>>) -> Option<f64> {
    let (sum, n) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// `q`-quantile (0.0..=1.0) of the non-NULL values, nearest rank.
///
/// Linear-time selection over every value, so the result is exact and does not
/// depend on input order. It sits within the rank error BigQuery's
/// `APPROX_QUANTILES` allows.
pub fn approx_quantile(values: impl IntoIterator<Item = Option<f64>>, q: f64) -> Option<f64> {
    let mut v: Vec<f64> = values.into_iter().flatten().filter(|x| !x.is_nan()).collect();
    if v.is_empty() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let rank = (q * (v.len() - 1) as f64).round() as usize;
    let (_, nth, _) = v.select_nth_unstable_by(rank, f64::total_cmp);
    Some(*nth)
}

/// Count of distinct addresses over the union of input and output lists.
pub fn active_addresses<'a>(rows: impl IntoIterator<Item = &'a SnapshotTransaction>) -> i64 {
    let mut seen: HashSet<&str> = HashSet::new();
    for r in rows {
        for a in r.input_addresses.iter().chain(&r.output_addresses) {
            seen.insert(a.as_str());
        }
    }
    seen.len() as i64
}

/// Full metric set over a group of rows (one day, or the whole snapshot).
pub fn compute_metrics(rows: &[&SnapshotTransaction]) -> KpiMetrics {
    let count = rows.len() as i64;
    let outputs = || rows.iter().map(|r| r.output_value);

    let volume = sum_non_null(outputs());
    let input_volume = sum_non_null(rows.iter().map(|r| r.input_value));
    let inputs_total = (!rows.is_empty()).then(|| rows.iter().map(|r| r.input_count).sum::<i64>());
    let outputs_total = (!rows.is_empty()).then(|| rows.iter().map(|r| r.output_count).sum::<i64>());
    let coinbase = (!rows.is_empty()).then(|| rows.iter().filter(|r| r.is_coinbase).count());
    let whale_volume = (!rows.is_empty()).then(|| {
        outputs()
            .flatten()
            .filter(|v| *v >= WHALE_THRESHOLD)
            .sum::<f64>()
    });

    KpiMetrics {
        transaction_count: count,
        volume,
        mean_value: mean_non_null(outputs()),
        median_value: approx_quantile(outputs(), 0.5),
        io_complexity: safe_divide(
            inputs_total.map(|v| v as f64),
            outputs_total.map(|v| v as f64),
        ),
        velocity_proxy: safe_divide(volume, input_volume),
        coinbase_ratio: safe_divide(coinbase.map(|c| c as f64), Some(count as f64)),
        whale_volume,
        whale_ratio: safe_divide(whale_volume, volume),
        active_addresses: active_addresses(rows.iter().copied()),
    }
}

/// One row per UTC calendar day present in `rows`, ascending by day.
pub fn daily_kpis(rows: &[SnapshotTransaction]) -> Vec<DailyKpi> {
    let mut by_day: BTreeMap<_, Vec<&SnapshotTransaction>> = BTreeMap::new();
    for r in rows {
        by_day
            .entry(r.block_timestamp.date_naive())
            .or_default()
            .push(r);
    }
    by_day
        .into_iter()
        .map(|(day, group)| DailyKpi {
            day,
            metrics: compute_metrics(&group),
        })
        .collect()
}

/// Single-row summary over the whole snapshot. Present even when `rows` is empty.
pub fn global_kpi(rows: &[SnapshotTransaction]) -> GlobalKpi {
    let refs: Vec<&SnapshotTransaction> = rows.iter().collect();
    GlobalKpi {
        metrics: compute_metrics(&refs),
    }
}
