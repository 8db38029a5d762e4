//! # Basic Server
//!
//! HTTP front end for the basic service. Exposes a greeting endpoint and a
//! server-sent-event stream that starts a background fan-out job and reports
//! its progress until it completes. Every payload is wrapped in a
//! CloudEvents-style [`Envelope`](infra::envelope::Envelope).

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
