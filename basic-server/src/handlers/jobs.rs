use axum::{
    Json,
    extract::{Path, State},
};
use basic_core::{JobId, JobSnapshot};
use serde::Serialize;

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub snapshot: JobSnapshot,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ActiveJobsResponse {
    pub active: Vec<JobId>,
    pub tracked: usize,
}

pub async fn get_job_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<JobDetail>> {
    let job_id: JobId = raw_id
        .parse()
        .map_err(|_| AppError::bad_request(format!("invalid job id: {raw_id}")))?;

    let snapshot = state
        .orchestrator()
        .snapshot(job_id)
        .ok_or_else(|| AppError::not_found(format!("Job not found: {job_id}")))?;
    let errors = state.orchestrator().registry().errors(job_id);

    Ok(Json(JobDetail { snapshot, errors }))
}

pub async fn list_jobs_handler(State(state): State<AppState>) -> Json<ActiveJobsResponse> {
    let orchestrator = state.orchestrator();
    Json(ActiveJobsResponse {
        active: orchestrator.active_jobs(),
        tracked: orchestrator.registry().len(),
    })
}
