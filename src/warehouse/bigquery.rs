// BigQuery adapter: renders the cycle's statements and runs them as query
// jobs, polling until each job is done.

use std::time::{Duration, Instant};

use chrono::NaiveDate;
use gcp_bigquery_client::Client;
use gcp_bigquery_client::model::error_proto::ErrorProto;
use gcp_bigquery_client::model::get_query_results_parameters::GetQueryResultsParameters;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::{QueryResponse, ResultSet};
use tracing::{debug, instrument};

use super::Warehouse;
use super::sql::{self, TableRefs};
use crate::config::{BigQueryConfig, TablesConfig};
use crate::error::{Step, WarehouseError};
use crate::models::RollingWindow;

/// Per-request wait inside `jobs.query` before falling back to polling.
const QUERY_REQUEST_TIMEOUT_MS: i32 = 60_000;

pub struct BigQueryWarehouse {
    client: Client,
    project_id: String,
    tables: TableRefs,
    state_table: String,
    query_timeout: Duration,
    poll_interval: Duration,
}

/// State of a statement after the first `jobs.query` call.
#[derive(Debug)]
enum Submitted {
    Done(QueryResponse),
    Running {
        job_id: String,
        location: Option<String>,
    },
}

fn ensure_no_errors(errors: Option<&Vec<ErrorProto>>) -> anyhow::Result<()> {
    if let Some(errors) = errors.filter(|e| !e.is_empty()) {
        let messages: Vec<String> = errors.iter().filter_map(|e| e.message.clone()).collect();
        anyhow::bail!("statement failed: {}", messages.join("; "));
    }
    Ok(())
}

/// A response without `jobComplete == false` carries its rows already.
fn classify(response: QueryResponse) -> anyhow::Result<Submitted> {
    ensure_no_errors(response.errors.as_ref())?;
    if response.job_complete != Some(false) {
        return Ok(Submitted::Done(response));
    }
    let job = response
        .job_reference
        .ok_or_else(|| anyhow::anyhow!("incomplete job without a job reference"))?;
    let job_id = job
        .job_id
        .ok_or_else(|| anyhow::anyhow!("incomplete job without a job id"))?;
    Ok(Submitted::Running {
        job_id,
        location: job.location,
    })
}

impl BigQueryWarehouse {
    pub async fn connect(config: &BigQueryConfig, tables: &TablesConfig) -> anyhow::Result<Self> {
        let client = match config.credentials_path {
            Some(ref path) => Client::from_service_account_key_file(path).await?,
            None => Client::from_application_default_credentials().await?,
        };
        Ok(Self {
            client,
            project_id: config.project_id.clone(),
            tables: TableRefs::new(
                &config.project_id,
                &config.dataset,
                &config.source_table,
                tables,
            ),
            state_table: tables.state.clone(),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    /// Runs one statement (or script), waits for its job and returns its rows.
    #[instrument(skip(self, sql), fields(warehouse = "bigquery"))]
    pub async fn execute_statement(&self, sql: &str) -> anyhow::Result<ResultSet> {
        debug!(statement = %sql, "submitting statement");
        let mut request = QueryRequest::new(sql);
        request.timeout_ms = Some(QUERY_REQUEST_TIMEOUT_MS);
        let response = self.client.job().query(&self.project_id, request).await?;

        let response = match classify(response)? {
            Submitted::Done(response) => response,
            Submitted::Running { job_id, location } => {
                self.wait_for_job(&job_id, location.as_deref()).await?;
                self.fetch_results(&job_id, location).await?
            }
        };
        Ok(ResultSet::new_from_query_response(response))
    }

    /// Rows of a finished job. Statements here return at most a couple of rows,
    /// so the first page is the whole result.
    async fn fetch_results(
        &self,
        job_id: &str,
        location: Option<String>,
    ) -> anyhow::Result<QueryResponse> {
        let params = GetQueryResultsParameters {
            location,
            ..Default::default()
        };
        let results = self
            .client
            .job()
            .get_query_results(&self.project_id, job_id, params)
            .await?;
        ensure_no_errors(results.errors.as_ref())?;
        anyhow::ensure!(
            results.job_complete != Some(false),
            "job {} reported done but its results are not ready",
            job_id
        );
        debug!(job_id, "fetched results of finished job");
        Ok(QueryResponse::from(results))
    }

    async fn wait_for_job(&self, job_id: &str, location: Option<&str>) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.query_timeout;
        loop {
            let job = self
                .client
                .job()
                .get_job(&self.project_id, job_id, location)
                .await?;
            if let Some(status) = job.status {
                if let Some(err) = status.error_result {
                    anyhow::bail!(
                        "job {} failed: {}",
                        job_id,
                        err.message.unwrap_or_else(|| "unknown error".into())
                    );
                }
                if status.state.as_deref() == Some("DONE") {
                    return Ok(());
                }
            }
            anyhow::ensure!(
                Instant::now() < deadline,
                "job {} did not finish within {}s",
                job_id,
                self.query_timeout.as_secs()
            );
            debug!(job_id, "job still running");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn run_step(&self, step: Step, sql: String) -> Result<(), WarehouseError> {
        self.execute_statement(&sql)
            .await
            .map(|_| ())
            .map_err(|e| WarehouseError::query(step, e))
    }
}

fn parse_date(column: &str, value: Option<String>) -> Result<NaiveDate, WarehouseError> {
    let value =
        value.ok_or_else(|| WarehouseError::StateCorrupt(format!("{} is NULL", column)))?;
    NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|e| {
        WarehouseError::StateCorrupt(format!("{} {:?} is not a date: {}", column, value, e))
    })
}

fn window_from_state_rows(
    rs: &mut ResultSet,
    state_table: &str,
) -> Result<RollingWindow, WarehouseError> {
    if rs.row_count() > 1 {
        return Err(WarehouseError::StateCorrupt(format!(
            "{} holds more than one row",
            state_table
        )));
    }
    if !rs.next_row() {
        return Err(WarehouseError::StateMissing {
            table: state_table.to_string(),
        });
    }
    let column = |rs: &ResultSet, name: &str| {
        rs.get_string_by_name(name)
            .map_err(|e| WarehouseError::query(Step::ReadState, e))
    };
    let start = parse_date("start_date", column(rs, "start_date")?)?;
    let end = parse_date("end_date", column(rs, "end_date")?)?;
    Ok(RollingWindow::new(start, end)?)
}

impl Warehouse for BigQueryWarehouse {
    #[instrument(skip(self), fields(warehouse = "bigquery", operation = "read_window"))]
    async fn read_window(&self) -> Result<RollingWindow, WarehouseError> {
        let mut rs = self
            .execute_statement(&sql::read_state(&self.tables))
            .await
            .map_err(|e| WarehouseError::query(Step::ReadState, e))?;
        window_from_state_rows(&mut rs, &self.state_table)
    }

    #[instrument(skip(self), fields(warehouse = "bigquery", operation = "rebuild_snapshot", window = %window))]
    async fn rebuild_snapshot(&self, window: &RollingWindow) -> Result<(), WarehouseError> {
        self.run_step(Step::RebuildSnapshot, sql::rebuild_snapshot(&self.tables, window))
            .await
    }

    #[instrument(skip(self), fields(warehouse = "bigquery", operation = "rebuild_daily_kpis"))]
    async fn rebuild_daily_kpis(&self) -> Result<(), WarehouseError> {
        self.run_step(Step::RebuildDailyKpis, sql::rebuild_daily_kpis(&self.tables))
            .await
    }

    #[instrument(skip(self), fields(warehouse = "bigquery", operation = "rebuild_global_kpis"))]
    async fn rebuild_global_kpis(&self) -> Result<(), WarehouseError> {
        self.run_step(Step::RebuildGlobalKpis, sql::rebuild_global_kpis(&self.tables))
            .await
    }

    #[instrument(skip(self), fields(warehouse = "bigquery", operation = "persist_window", window = %window))]
    async fn persist_window(&self, window: &RollingWindow) -> Result<(), WarehouseError> {
        self.run_step(Step::PersistState, sql::persist_state(&self.tables, window))
            .await
    }
}

#[cfg(test)]
mod tests {
    use gcp_bigquery_client::model::get_query_results_response::GetQueryResultsResponse;
    use serde_json::json;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn query_response(value: serde_json::Value) -> QueryResponse {
        serde_json::from_value(value).unwrap()
    }

    fn state_schema() -> serde_json::Value {
        json!({
            "fields": [
                { "name": "start_date", "type": "STRING", "mode": "NULLABLE" },
                { "name": "end_date", "type": "STRING", "mode": "NULLABLE" }
            ]
        })
    }

    #[test]
    fn classify_slow_job_as_running() {
        let response = query_response(json!({
            "jobComplete": false,
            "jobReference": { "projectId": "p", "jobId": "job_42", "location": "EU" }
        }));
        match classify(response).unwrap() {
            Submitted::Running { job_id, location } => {
                assert_eq!(job_id, "job_42");
                assert_eq!(location.as_deref(), Some("EU"));
            }
            other => panic!("expected a running job, got {other:?}"),
        }
    }

    #[test]
    fn classify_reports_statement_errors() {
        let response = query_response(json!({
            "jobComplete": true,
            "errors": [{ "reason": "invalidQuery", "message": "Syntax error at [1:1]" }]
        }));
        let err = classify(response).unwrap_err();
        assert!(err.to_string().contains("Syntax error"), "{err}");
    }

    #[test]
    fn classify_running_job_without_reference_fails() {
        let response = query_response(json!({ "jobComplete": false }));
        assert!(classify(response).is_err());
    }

    #[test]
    fn state_row_from_finished_job_results_is_read() {
        // rows arrive through jobs.getQueryResults after a slow state read
        let results: GetQueryResultsResponse = serde_json::from_value(json!({
            "jobComplete": true,
            "schema": state_schema(),
            "rows": [{ "f": [{ "v": "2021-01-08" }, { "v": "2021-01-14" }] }]
        }))
        .unwrap();
        let mut rs = ResultSet::new_from_query_response(QueryResponse::from(results));
        let window = window_from_state_rows(&mut rs, "rolling_state").unwrap();
        assert_eq!(
            window,
            RollingWindow::new(date(2021, 1, 8), date(2021, 1, 14)).unwrap()
        );
    }

    #[test]
    fn empty_state_result_is_missing_state() {
        let response = query_response(json!({
            "jobComplete": true,
            "schema": state_schema(),
            "rows": []
        }));
        let mut rs = ResultSet::new_from_query_response(response);
        let err = window_from_state_rows(&mut rs, "rolling_state").unwrap_err();
        assert!(matches!(err, WarehouseError::StateMissing { .. }));
    }

    #[test]
    fn two_state_rows_are_corrupt() {
        let response = query_response(json!({
            "jobComplete": true,
            "schema": state_schema(),
            "rows": [
                { "f": [{ "v": "2021-01-01" }, { "v": "2021-01-07" }] },
                { "f": [{ "v": "2021-01-08" }, { "v": "2021-01-14" }] }
            ]
        }));
        let mut rs = ResultSet::new_from_query_response(response);
        let err = window_from_state_rows(&mut rs, "rolling_state").unwrap_err();
        assert!(matches!(err, WarehouseError::StateCorrupt(_)));
    }
}
