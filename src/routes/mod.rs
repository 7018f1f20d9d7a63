// HTTP routes: run trigger and version

mod http;

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::config::RollerConfig;
use crate::roller::WindowRoller;
use crate::warehouse::Warehouse;

pub(crate) struct AppState<W> {
    pub(crate) roller: Arc<WindowRoller<W>>,
    pub(crate) roller_config: RollerConfig,
}

impl<W> Clone for AppState<W> {
    fn clone(&self) -> Self {
        Self {
            roller: self.roller.clone(),
            roller_config: self.roller_config.clone(),
        }
    }
}

pub fn app<W>(roller: Arc<WindowRoller<W>>, roller_config: RollerConfig) -> Router
where
    W: Warehouse + 'static,
{
    let state = AppState {
        roller,
        roller_config,
    };
    Router::new()
        .route("/", get(http::run_handler::<W>).post(http::run_handler::<W>)) // GET|POST /
        .route("/version", get(http::version_handler)) // GET /version
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
