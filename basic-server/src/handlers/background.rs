use axum::response::sse::{Event, KeepAlive};
use axum::{
    extract::{OriginalUri, Query, State},
    http::{HeaderMap, HeaderValue},
    response::{IntoResponse, Sse},
};
use basic_core::{ProgressReport, ReporterExit, SessionKey};
use serde::Deserialize;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::infra::{
    app_state::AppState,
    envelope::{BACKGROUND_EVENT_TYPE, Envelope, event_source},
    errors::AppResult,
};

pub const SESSION_HEADER: &str = "x-session-id";

const REPORT_BUFFER: usize = 16;

#[derive(Debug, Default, Deserialize)]
pub struct BackgroundQuery {
    pub session: Option<String>,
}

/// Start (or attach to) the caller's background job and stream its progress
/// as server-sent events. The stream ends after the `complete` event.
pub async fn background_handler(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    Query(query): Query<BackgroundQuery>,
) -> AppResult<impl IntoResponse> {
    let session = resolve_session(&query, &headers);
    let ticket = state.orchestrator().open(session)?;
    let source = event_source(&headers, uri.path());

    let (tx, mut rx) = mpsc::channel::<ProgressReport>(REPORT_BUFFER);
    let cancel = CancellationToken::new();
    // Dropped with the response stream, i.e. when the client goes away.
    let disconnect_guard = cancel.clone().drop_guard();

    let orchestrator = Arc::clone(state.orchestrator());
    let stream_ticket = ticket.clone();
    tokio::spawn(async move {
        let mut tx = tx;
        match orchestrator.stream(&stream_ticket, &mut tx, cancel).await {
            Ok(ReporterExit::Completed { reports }) => {
                debug!(job_id = %stream_ticket.job_id, reports, "background stream delivered");
            }
            Ok(ReporterExit::Cancelled { reports }) => {
                debug!(job_id = %stream_ticket.job_id, reports, "client left background stream");
            }
            Err(err) => {
                warn!(job_id = %stream_ticket.job_id, error = %err, "background stream failed");
            }
        }
    });

    let stream = async_stream::stream! {
        let _disconnect_guard = disconnect_guard;
        while let Some(report) = rx.recv().await {
            if let Some(event) = report_to_event(&source, report) {
                yield Ok::<Event, Infallible>(event);
            }
        }
    };

    let session_value = HeaderValue::from_str(ticket.session.as_str())
        .unwrap_or_else(|_| HeaderValue::from_static("invalid"));

    Ok((
        [(SESSION_HEADER, session_value)],
        Sse::new(stream).keep_alive(default_keep_alive()),
    ))
}

/// `?session=` wins over the `x-session-id` header; neither yields a fresh key.
fn resolve_session(query: &BackgroundQuery, headers: &HeaderMap) -> SessionKey {
    query
        .session
        .as_deref()
        .or_else(|| {
            headers
                .get(SESSION_HEADER)
                .and_then(|value| value.to_str().ok())
        })
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(SessionKey::new)
        .unwrap_or_else(SessionKey::generate)
}

fn report_to_event(source: &str, report: ProgressReport) -> Option<Event> {
    let name = if report.is_final { "complete" } else { "progress" };
    let sequence = report.sequence;
    let envelope = Envelope::new(BACKGROUND_EVENT_TYPE, source, report);

    serde_json::to_string(&envelope)
        .map(|data| Event::default().event(name).id(sequence.to_string()).data(data))
        .map_err(|err| {
            warn!("failed to serialize background report: {err}");
            err
        })
        .ok()
}

fn default_keep_alive() -> KeepAlive {
    KeepAlive::new()
        .interval(Duration::from_secs(15))
        .text("keep-alive")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_session_takes_precedence_over_header() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("from-header"));
        let query = BackgroundQuery {
            session: Some("from-query".to_string()),
        };

        assert_eq!(resolve_session(&query, &headers).as_str(), "from-query");
        assert_eq!(
            resolve_session(&BackgroundQuery::default(), &headers).as_str(),
            "from-header"
        );
    }

    #[test]
    fn blank_session_generates_a_fresh_key() {
        let query = BackgroundQuery {
            session: Some("   ".to_string()),
        };
        let first = resolve_session(&query, &HeaderMap::new());
        let second = resolve_session(&query, &HeaderMap::new());
        assert!(!first.as_str().trim().is_empty());
        assert_ne!(first, second);
    }
}
