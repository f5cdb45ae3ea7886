//! HTTP server: webhook intake and management endpoints.

mod http;

pub use http::{AppState, WebhookAlert, WebhookResponse, create_router};
