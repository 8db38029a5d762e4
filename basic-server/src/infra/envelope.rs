//! CloudEvents-style envelope around every payload the service emits.

use axum::http::{HeaderMap, header};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SPEC_VERSION: &str = "1.0";

pub const HELLO_EVENT_TYPE: &str = "basic.service.v1.HelloResponseEvent";
pub const BACKGROUND_EVENT_TYPE: &str = "basic.service.v1.BackgroundResponseEvent";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: Uuid,
    pub specversion: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub time: DateTime<Utc>,
    pub datacontenttype: String,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            specversion: SPEC_VERSION.to_string(),
            event_type: event_type.into(),
            source: source.into(),
            time: Utc::now(),
            datacontenttype: "application/json".to_string(),
            data,
        }
    }
}

/// `<Host header><path>`, e.g. `localhost:3000/api/v1/hello`.
pub fn event_source(headers: &HeaderMap, path: &str) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    format!("{host}{path}")
}
