use axum::{
    Json,
    extract::OriginalUri,
    http::HeaderMap,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::infra::envelope::{Envelope, HELLO_EVENT_TYPE, event_source};

pub const VERSION_HEADER: &str = "basic-service-version";
const SERVICE_VERSION: &str = "v1";

#[derive(Debug, Deserialize)]
pub struct HelloRequest {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloResponseEvent {
    pub greeting: String,
}

pub async fn hello_handler(
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Json(request): Json<HelloRequest>,
) -> impl IntoResponse {
    debug!(message = %request.message, "hello requested");

    let event = HelloResponseEvent {
        greeting: format!("Hello, {}", request.message),
    };
    let envelope = Envelope::new(HELLO_EVENT_TYPE, event_source(&headers, uri.path()), event);

    ([(VERSION_HEADER, SERVICE_VERSION)], Json(envelope))
}
