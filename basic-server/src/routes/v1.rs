use axum::{
    Router,
    routing::{get, post},
};

use crate::{
    AppState,
    handlers::{
        background::background_handler,
        hello::hello_handler,
        jobs::{get_job_handler, list_jobs_handler},
    },
};

/// Create all v1 API routes
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/hello", post(hello_handler))
        .route("/background", get(background_handler))
        .route("/jobs", get(list_jobs_handler))
        .route("/jobs/{job_id}", get(get_job_handler))
}
