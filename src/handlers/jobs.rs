//! # Jobs API Handlers
//!
//! Registration, inspection and administrative state changes over the job
//! store.

use std::collections::BTreeMap;

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use crate::error::{ApiError, not_found, validation_error};
use crate::models::{Job, JobState, job_history};
use crate::repositories::{
    FindOptions, GraphOptions, HistoryOptions, HistoryOrder, JobGraph, SizeOptions,
};
use crate::server::AppState;

const DEFAULT_LIST_LIMIT: u64 = 100;
const MAX_LIST_LIMIT: u64 = 1000;
const DEFAULT_HISTORY_SIZE: u64 = 3;

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// State name or code (default: FAILED)
    pub state: Option<String>,
    /// Maximum number of ids to return (default: 100)
    pub limit: Option<u64>,
    /// Number of ids to skip (default: 0)
    pub offset: Option<u64>,
    /// SQL LIKE pattern matched against job ids
    pub filter_exp: Option<String>,
}

/// Job ids matching a listing query
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobIdsResponse {
    #[schema(example = json!(["daily_import", "daily_report"]))]
    pub job_ids: Vec<String>,
}

/// Registration payload
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterJobsRequest {
    /// Batch token; defaults to the current unix time
    #[schema(example = 1736467200)]
    pub update_id: Option<i64>,
    /// Job definitions: `job_id` plus free-form attributes
    #[schema(value_type = Vec<Object>)]
    pub jobs: Vec<Job>,
}

/// Result of a registration
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterJobsResponse {
    /// Batch token the jobs were published under
    #[schema(example = 1736467200)]
    pub update_id: i64,
    /// Registered job ids in request order
    pub job_ids: Vec<String>,
}

/// Job counts per state
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobStatsResponse {
    #[schema(example = json!({"WAIT": 12, "FAILED": 1}))]
    pub counts: BTreeMap<String, u64>,
}

/// Administrative state override
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateStateRequest {
    /// Target state name or code
    #[schema(example = "WAIT")]
    pub state: String,
    /// Token stamped on the job; defaults to the current unix time
    pub update_id: Option<i64>,
}

/// Result of a state override
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UpdateStateResponse {
    pub job_id: String,
    pub state: JobState,
    pub update_id: i64,
}

/// Query parameters for execution history
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Number of executions to return, newest first (default: 3)
    pub size: Option<u64>,
}

/// Query parameters for the dependency graph
#[derive(Debug, Deserialize)]
pub struct GraphQuery {
    pub producer_depth: Option<u32>,
    pub consumer_depth: Option<u32>,
}

fn parse_state(raw: &str) -> Result<JobState, ApiError> {
    raw.parse::<JobState>().map_err(|_| {
        validation_error(
            "Invalid state",
            json!({ "state": format!("Unknown job state '{}'", raw) }),
        )
    })
}

/// List job ids by state
#[utoipa::path(
    get,
    path = "/jobs",
    params(
        ("state" = Option<String>, Query, description = "State name or code (default FAILED)"),
        ("limit" = Option<u64>, Query, description = "Maximum number of ids (default 100, max 1000)"),
        ("offset" = Option<u64>, Query, description = "Number of ids to skip (default 0)"),
        ("filter_exp" = Option<String>, Query, description = "SQL LIKE pattern on job_id")
    ),
    responses(
        (status = 200, description = "Matching job ids", body = JobIdsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    params: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<Json<JobIdsResponse>, ApiError> {
    let Query(params) = params?;

    let job_state = match params.state.as_deref() {
        Some(raw) => parse_state(raw)?,
        None => JobState::Failed,
    };

    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit == 0 || limit > MAX_LIST_LIMIT {
        return Err(validation_error(
            "Invalid limit",
            json!({ "limit": format!("Limit must be between 1 and {}", MAX_LIST_LIMIT) }),
        ));
    }

    let options = FindOptions {
        filter_exp: params.filter_exp,
        limit: Some(limit),
        offset: Some(params.offset.unwrap_or(0)),
    };
    let job_ids = state.store.find_jobs_by_state(job_state, &options).await?;

    Ok(Json(JobIdsResponse { job_ids }))
}

/// Register and publish a batch of jobs
#[utoipa::path(
    post,
    path = "/jobs",
    request_body = RegisterJobsRequest,
    responses(
        (status = 201, description = "Jobs registered and published", body = RegisterJobsResponse),
        (status = 400, description = "A job definition was rejected", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn register_jobs(
    State(state): State<AppState>,
    payload: Result<Json<RegisterJobsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterJobsResponse>), ApiError> {
    let Json(request) = payload?;

    if request.jobs.is_empty() {
        return Err(validation_error(
            "No jobs given",
            json!({ "jobs": "At least one job definition is required" }),
        ));
    }

    let update_id = request.update_id.unwrap_or_else(|| Utc::now().timestamp());
    state.store.register(Some(update_id), &request.jobs).await?;

    let job_ids = request.jobs.into_iter().map(|job| job.job_id).collect();
    Ok((
        StatusCode::CREATED,
        Json(RegisterJobsResponse { update_id, job_ids }),
    ))
}

/// Count jobs per state, ignoring succeeded ones
#[utoipa::path(
    get,
    path = "/jobs/stats",
    responses(
        (status = 200, description = "Job counts keyed by state name", body = JobStatsResponse),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn job_stats(State(state): State<AppState>) -> Result<Json<JobStatsResponse>, ApiError> {
    let sizes = state
        .store
        .get_job_size(&SizeOptions {
            ignore_states: vec![JobState::Succeeded],
        })
        .await?;

    let counts = sizes
        .into_iter()
        .map(|(job_state, size)| (job_state.name().to_string(), size))
        .collect();
    Ok(Json(JobStatsResponse { counts }))
}

/// Fetch one job definition
#[utoipa::path(
    get,
    path = "/jobs/{job_id}",
    params(("job_id" = String, Path, description = "External job id")),
    responses(
        (status = 200, description = "Job definition with its attributes", body = serde_json::Value),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    state
        .store
        .get_job(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&format!("Job '{}' not found", job_id)))
}

/// Override the state of a job
#[utoipa::path(
    put,
    path = "/jobs/{job_id}",
    params(("job_id" = String, Path, description = "External job id")),
    request_body = UpdateStateRequest,
    responses(
        (status = 200, description = "State changed", body = UpdateStateResponse),
        (status = 400, description = "Unknown state", body = ApiError),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn update_job_state(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    payload: Result<Json<UpdateStateRequest>, JsonRejection>,
) -> Result<Json<UpdateStateResponse>, ApiError> {
    let Json(request) = payload?;
    let job_state = parse_state(&request.state)?;
    let update_id = request.update_id.unwrap_or_else(|| Utc::now().timestamp());

    let changed = state
        .store
        .set_state(update_id, std::slice::from_ref(&job_id), job_state)
        .await?;
    if changed == 0 {
        return Err(not_found(&format!("Job '{}' not found", job_id)));
    }

    Ok(Json(UpdateStateResponse {
        job_id,
        state: job_state,
        update_id,
    }))
}

/// Delete a job with its associations and edges
#[utoipa::path(
    delete,
    path = "/jobs/{job_id}",
    params(("job_id" = String, Path, description = "External job id")),
    responses(
        (status = 204, description = "Job deleted"),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn delete_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.store.delete_job(&job_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&format!("Job '{}' not found", job_id)))
    }
}

/// Recent executions of a job
#[utoipa::path(
    get,
    path = "/jobs/{job_id}/histories",
    params(
        ("job_id" = String, Path, description = "External job id"),
        ("size" = Option<u64>, Query, description = "Number of executions, newest first (default 3)")
    ),
    responses(
        (status = 200, description = "Execution history", body = Vec<job_history::Model>),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn job_histories(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    params: Result<Query<HistoryQuery>, QueryRejection>,
) -> Result<Json<Vec<job_history::Model>>, ApiError> {
    let Query(params) = params?;
    let size = params.size.unwrap_or(DEFAULT_HISTORY_SIZE);
    if size == 0 {
        return Err(validation_error(
            "Invalid size",
            json!({ "size": "Minimum allowed size is 1" }),
        ));
    }

    let histories = state
        .store
        .get_execution_history(
            &job_id,
            &HistoryOptions {
                limit: size,
                order: HistoryOrder::Desc,
            },
        )
        .await?;
    Ok(Json(histories))
}

/// Dependency graph around a job
#[utoipa::path(
    get,
    path = "/jobs/{job_id}/graph",
    params(
        ("job_id" = String, Path, description = "External job id"),
        ("producer_depth" = Option<u32>, Query, description = "Levels of producers to include (default 1)"),
        ("consumer_depth" = Option<u32>, Query, description = "Levels of consumers to include (default 1)")
    ),
    responses(
        (status = 200, description = "Nodes keyed by job id and producer/consumer edges", body = serde_json::Value),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn job_graph(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    params: Result<Query<GraphQuery>, QueryRejection>,
) -> Result<Json<JobGraph>, ApiError> {
    let Query(params) = params?;
    let defaults = GraphOptions::default();
    let options = GraphOptions {
        producer_depth: params.producer_depth.unwrap_or(defaults.producer_depth),
        consumer_depth: params.consumer_depth.unwrap_or(defaults.consumer_depth),
    };

    state
        .store
        .get_graph(&job_id, options)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&format!("Job '{}' not found", job_id)))
}
