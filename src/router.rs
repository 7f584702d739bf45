use crate::error::AppError;
use axum::{
    extract::State,
    http::header,
    response::{
        Html,
        IntoResponse,
        Response,
    },
    routing::get,
    Router,
};
use databricks_exporter_collector::{
    exposition::{
        self,
        CONTENT_TYPE,
    },
    Orchestrator,
    ScrapeBuffer,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub telemetry_path: Arc<str>,
}

/// Serves the scrape endpoint at `telemetry_path`, plus a landing page and `/healthz`.
pub fn create_router(orchestrator: Arc<Orchestrator>, telemetry_path: &str) -> Router {
    let state = AppState {
        orchestrator,
        telemetry_path: telemetry_path.into(),
    };

    Router::new()
        .route(telemetry_path, get(metrics))
        .route("/healthz", get(healthz))
        .route("/", get(landing))
        .with_state(state)
}

/// Every request runs a full scrape against the warehouse.
async fn metrics(State(state): State<AppState>) -> Result<Response, AppError> {
    let sink = Arc::new(ScrapeBuffer::new());
    state.orchestrator.collect(sink.clone()).await;
    let body = exposition::render_text(&sink.snapshot())?;
    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn landing(State(state): State<AppState>) -> Html<String> {
    let path = &state.telemetry_path;
    Html(format!(
        "<html>
<head><title>Databricks Exporter</title></head>
<body>
<h1>Databricks Exporter</h1>
<p><a href=\"{path}\">Metrics</a></p>
</body>
</html>
"
    ))
}
