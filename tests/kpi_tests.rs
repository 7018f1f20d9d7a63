// KPI aggregation tests: null safety, grouping by day, active-address union

mod common;

use common::*;
use rolling_kpi::kpi::{daily_kpis, global_kpi};
use rolling_kpi::models::SnapshotTransaction;
use rolling_kpi::snapshot::project;

fn row(
    hash: &str,
    at: chrono::DateTime<chrono::Utc>,
    input: Option<f64>,
    output: Option<f64>,
    inputs: &[&str],
    outputs: &[&str],
) -> SnapshotTransaction {
    project(&source_tx(
        hash,
        at,
        input.map(|v| v * 1e8),
        output.map(|v| v * 1e8),
        inputs,
        outputs,
    ))
}

#[test]
fn empty_snapshot_has_no_days_and_a_null_global_row() {
    assert!(daily_kpis(&[]).is_empty());
    let g = global_kpi(&[]).metrics;
    assert_eq!(g.transaction_count, 0);
    assert_eq!(g.volume, None);
    assert_eq!(g.mean_value, None);
    assert_eq!(g.median_value, None);
    assert_eq!(g.io_complexity, None);
    assert_eq!(g.velocity_proxy, None);
    assert_eq!(g.coinbase_ratio, None);
    assert_eq!(g.whale_volume, None);
    assert_eq!(g.whale_ratio, None);
    assert_eq!(g.active_addresses, 0);
}

#[test]
fn null_values_give_null_ratios_not_errors() {
    let rows = vec![
        row("a", ts(2021, 1, 1, 1, 0, 0), None, None, &["x"], &["y"]),
        row("b", ts(2021, 1, 1, 2, 0, 0), None, None, &[], &[]),
    ];
    let g = global_kpi(&rows).metrics;
    assert_eq!(g.transaction_count, 2);
    assert_eq!(g.volume, None);
    assert_eq!(g.velocity_proxy, None);
    assert_eq!(g.whale_volume, Some(0.0));
    assert_eq!(g.whale_ratio, None);
    assert_eq!(g.median_value, None);
    assert_eq!(g.coinbase_ratio, Some(0.0));
}

#[test]
fn zero_input_volume_gives_null_velocity() {
    let rows = vec![row("a", ts(2021, 1, 1, 1, 0, 0), Some(0.0), Some(5.0), &["x"], &["y"])];
    let g = global_kpi(&rows).metrics;
    assert_eq!(g.volume, Some(5.0));
    assert_eq!(g.velocity_proxy, None);
}

#[test]
fn zero_output_count_gives_null_complexity() {
    let mut r = row("a", ts(2021, 1, 1, 1, 0, 0), Some(1.0), Some(1.0), &["x"], &[]);
    r.output_count = 0;
    let g = global_kpi(&[r]).metrics;
    assert_eq!(g.io_complexity, None);
}

#[test]
fn coinbase_and_whale_ratios() {
    let mut coinbase = row("cb", ts(2021, 1, 2, 0, 0, 0), None, Some(6.25), &[], &["miner"]);
    coinbase.is_coinbase = true;
    let rows = vec![
        coinbase,
        row("w", ts(2021, 1, 2, 1, 0, 0), Some(101.0), Some(100.0), &["a"], &["b"]),
        row("s", ts(2021, 1, 2, 2, 0, 0), Some(4.0), Some(3.75), &["c"], &["d"]),
        row("t", ts(2021, 1, 2, 3, 0, 0), Some(1.0), Some(0.0), &["e"], &["f"]),
    ];
    let g = global_kpi(&rows).metrics;
    assert_eq!(g.coinbase_ratio, Some(0.25));
    assert_eq!(g.whale_volume, Some(100.0));
    assert_eq!(g.volume, Some(110.0));
    assert_eq!(g.whale_ratio, Some(100.0 / 110.0));
}

#[test]
fn days_are_grouped_by_utc_date_in_order() {
    let rows = vec![
        row("c", ts(2021, 1, 3, 0, 0, 0), Some(1.0), Some(1.0), &["a"], &["b"]),
        row("a", ts(2021, 1, 1, 23, 59, 59), Some(2.0), Some(2.0), &["a"], &["b"]),
        row("b", ts(2021, 1, 1, 0, 0, 0), Some(3.0), Some(3.0), &["a"], &["c"]),
    ];
    let daily = daily_kpis(&rows);
    let days: Vec<_> = daily.iter().map(|d| d.day).collect();
    assert_eq!(days, vec![date(2021, 1, 1), date(2021, 1, 3)]);
    assert_eq!(daily[0].metrics.transaction_count, 2);
    assert_eq!(daily[0].metrics.volume, Some(5.0));
    assert_eq!(daily[1].metrics.transaction_count, 1);
}

#[test]
fn address_present_on_both_sides_counts_once() {
    let rows = vec![row(
        "self",
        ts(2021, 1, 1, 0, 0, 0),
        Some(1.0),
        Some(1.0),
        &["same", "other"],
        &["same"],
    )];
    assert_eq!(daily_kpis(&rows)[0].metrics.active_addresses, 2);
    assert_eq!(global_kpi(&rows).metrics.active_addresses, 2);
}

#[test]
fn global_active_addresses_between_max_and_sum_of_daily() {
    // "shared" is active every day; each day also has its own address
    let rows: Vec<SnapshotTransaction> = (1..=7)
        .map(|d| {
            row(
                &format!("t{d}"),
                ts(2021, 1, d, 12, 0, 0),
                Some(1.0),
                Some(1.0),
                &["shared"],
                &[format!("own-{d}").as_str()],
            )
        })
        .collect();
    let daily = daily_kpis(&rows);
    let global = global_kpi(&rows).metrics.active_addresses;
    let max = daily.iter().map(|d| d.metrics.active_addresses).max().unwrap();
    let sum: i64 = daily.iter().map(|d| d.metrics.active_addresses).sum();
    assert_eq!(global, 8);
    assert_eq!(max, 2);
    assert_eq!(sum, 14);
    assert!(max <= global && global <= sum);
}

#[test]
fn median_tolerates_nulls() {
    let rows = vec![
        row("a", ts(2021, 1, 1, 0, 0, 0), None, Some(1.0), &[], &[]),
        row("b", ts(2021, 1, 1, 1, 0, 0), None, None, &[], &[]),
        row("c", ts(2021, 1, 1, 2, 0, 0), None, Some(3.0), &[], &[]),
        row("d", ts(2021, 1, 1, 3, 0, 0), None, Some(2.0), &[], &[]),
    ];
    assert_eq!(global_kpi(&rows).metrics.median_value, Some(2.0));
    assert_eq!(global_kpi(&rows).metrics.mean_value, Some(2.0));
}
