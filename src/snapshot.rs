// Projection of source rows into snapshot rows.
// Values are scaled from satoshis to coins; address lists are flattened and deduplicated.

use std::collections::HashSet;

use crate::models::{RollingWindow, SnapshotTransaction, SourceTransaction};

const SATOSHIS_PER_COIN: f64 = 1e8;

/// `value / 1e8`, None when the value is NULL.
pub fn scale_value(value: Option<f64>) -> Option<f64> {
    crate::kpi::safe_divide(value, Some(SATOSHIS_PER_COIN))
}

/// Flattens per-input/output address lists into distinct, non-NULL addresses.
/// First-occurrence order is kept so rebuilds are reproducible.
pub fn distinct_addresses(groups: &[Vec<Option<String>>]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for addr in groups.iter().flatten().flatten() {
        if seen.insert(addr.as_str()) {
            out.push(addr.clone());
        }
    }
    out
}

pub fn project(tx: &SourceTransaction) -> SnapshotTransaction {
    SnapshotTransaction {
        transaction_hash: tx.hash.clone(),
        block_number: tx.block_number,
        block_timestamp: tx.block_timestamp,
        size_bytes: tx.size,
        virtual_size_bytes: tx.virtual_size,
        protocol_version: tx.version,
        input_count: tx.input_count,
        output_count: tx.output_count,
        fee: tx.fee,
        is_coinbase: tx.is_coinbase,
        input_value: scale_value(tx.input_value),
        output_value: scale_value(tx.output_value),
        input_addresses: distinct_addresses(&tx.inputs),
        output_addresses: distinct_addresses(&tx.outputs),
    }
}

/// Snapshot rows for every source transaction inside `window`, ordered by
/// block timestamp then hash.
pub fn build_snapshot<'a>(
    window: &RollingWindow,
    source: impl IntoIterator<Item = &'a SourceTransaction>,
) -> Vec<SnapshotTransaction> {
    let mut rows: Vec<SnapshotTransaction> = source
        .into_iter()
        .filter(|tx| window.contains(tx.block_timestamp))
        .map(project)
        .collect();
    rows.sort_by(|a, b| {
        a.block_timestamp
            .cmp(&b.block_timestamp)
            .then_with(|| a.transaction_hash.cmp(&b.transaction_hash))
    });
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_addresses_drops_nulls_and_duplicates() {
        let groups = vec![
            vec![Some("a".to_string()), None, Some("b".to_string())],
            vec![Some("a".to_string())],
            vec![],
            vec![Some("c".to_string()), Some("b".to_string())],
        ];
        assert_eq!(distinct_addresses(&groups), vec!["a", "b", "c"]);
    }

    #[test]
    fn scale_value_keeps_null() {
        assert_eq!(scale_value(None), None);
        assert_eq!(scale_value(Some(250_000_000.0)), Some(2.5));
    }
}
