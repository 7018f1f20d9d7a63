// Source and snapshot transaction rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of the source dataset. Values are in satoshis; each input/output
/// carries its own (possibly NULL) address list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTransaction {
    pub hash: String,
    pub block_number: i64,
    pub block_timestamp: DateTime<Utc>,
    pub size: i64,
    pub virtual_size: i64,
    pub version: i64,
    pub input_count: i64,
    pub output_count: i64,
    pub fee: Option<f64>,
    pub is_coinbase: bool,
    pub input_value: Option<f64>,
    pub output_value: Option<f64>,
    pub inputs: Vec<Vec<Option<String>>>,
    pub outputs: Vec<Vec<Option<String>>>,
}

/// One row of the snapshot table. Values are in whole coins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotTransaction {
    pub transaction_hash: String,
    pub block_number: i64,
    pub block_timestamp: DateTime<Utc>,
    pub size_bytes: i64,
    pub virtual_size_bytes: i64,
    pub protocol_version: i64,
    pub input_count: i64,
    pub output_count: i64,
    pub fee: Option<f64>,
    pub is_coinbase: bool,
    pub input_value: Option<f64>,
    pub output_value: Option<f64>,
    pub input_addresses: Vec<String>,
    pub output_addresses: Vec<String>,
}
