//! # Server Configuration
//!
//! Router setup and the HTTP server for the job management API.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::handlers::{self, jobs};
use crate::repositories::JobStore;
use crate::telemetry::{TraceContext, with_trace_context};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/jobs", get(jobs::list_jobs).post(jobs::register_jobs))
        .route("/jobs/stats", get(jobs::job_stats))
        .route(
            "/jobs/{job_id}",
            get(jobs::get_job)
                .put(jobs::update_job_state)
                .delete(jobs::delete_job),
        )
        .route("/jobs/{job_id}/histories", get(jobs::job_histories))
        .route("/jobs/{job_id}/graph", get(jobs::job_graph))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Scopes each request under the caller's `x-request-id` (or a fresh one)
/// and echoes it back.
async fn trace_context_middleware(request: Request, next: Next) -> Response {
    let context = TraceContext::from_header(
        request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok()),
    );
    let trace_id = context.trace_id.clone();

    let mut response = with_trace_context(context, next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Serves the API until `shutdown` is cancelled
pub async fn run_server(
    config: AppConfig,
    store: Arc<JobStore>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_app(AppState { store });

    let addr = config
        .bind_addr()
        .with_context(|| format!("Invalid server address: {}", config.api_bind_addr))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::register_jobs,
        crate::handlers::jobs::job_stats,
        crate::handlers::jobs::get_job,
        crate::handlers::jobs::update_job_state,
        crate::handlers::jobs::delete_job,
        crate::handlers::jobs::job_histories,
        crate::handlers::jobs::job_graph,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::JobState,
            crate::models::job_history::Model,
            crate::handlers::HealthResponse,
            crate::handlers::jobs::JobIdsResponse,
            crate::handlers::jobs::RegisterJobsRequest,
            crate::handlers::jobs::RegisterJobsResponse,
            crate::handlers::jobs::JobStatsResponse,
            crate::handlers::jobs::UpdateStateRequest,
            crate::handlers::jobs::UpdateStateResponse,
            crate::error::ApiError,
        )
    ),
    tags(
        (name = "root", description = "Service information and health"),
        (name = "jobs", description = "Job registration, inspection and state overrides")
    ),
    info(
        title = "Job Store API",
        description = "Dependency-aware job scheduling store",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
