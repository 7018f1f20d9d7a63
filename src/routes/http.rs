// Handlers: run trigger, version

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use super::AppState;
use crate::error::RunError;
use crate::warehouse::Warehouse;

const NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) const SUCCESS_MESSAGE: &str = "Rolling window refresh completed successfully";

/// GET|POST /: runs the configured number of cycles and answers once they are
/// all done (200) or one has failed (500, with the iteration index and cause).
pub(super) async fn run_handler<W: Warehouse + 'static>(
    State(state): State<AppState<W>>,
) -> impl IntoResponse {
    let c = &state.roller_config;
    match state
        .roller
        .run(c.iterations, c.stride_days, c.pause_seconds)
        .await
    {
        Ok(report) => {
            tracing::info!(
                iterations = report.iterations,
                initial_window = %report.initial_window,
                final_window = %report.final_window,
                "run complete"
            );
            (
                StatusCode::OK,
                format!(
                    "{}: {} iterations, window {} -> {}",
                    SUCCESS_MESSAGE, report.iterations, report.initial_window, report.final_window
                ),
            )
        }
        Err(e @ RunError::InvalidParameters(_)) => (StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// GET /version: service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}
