//! Request failure taxonomy.
//!
//! Every variant is handled the same way at the HTTP boundary: the browser
//! is sent to `/error?msg=...` and the failure is attached to the response
//! so the error-reporting middleware can log it once.

use std::sync::Arc;

use axum::response::{IntoResponse, Redirect, Response};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The identity provider rejected or failed the token exchange.
    #[error("OAuth provider error: {0}")]
    Provider(String),
    /// Writing to or reading from the queue store failed.
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Route not found: {uri} on action {method}")]
    RouteNotFound { uri: String, method: String },
    /// The `state` round-tripped through the OAuth provider is not valid JSON.
    #[error("Invalid OAuth state: {0}")]
    BadState(serde_json::Error),
    #[error("No template specified")]
    MissingTemplate,
    #[error("Missing required parameter: {0}")]
    MissingField(&'static str),
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<rusqlite::Error> for RelayError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<tokio::task::JoinError> for RelayError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Storage(format!("store task failed: {e}"))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(e: reqwest::Error) -> Self {
        Self::Provider(e.to_string())
    }
}

/// Marker placed in response extensions when a handler failed.
#[derive(Debug, Clone)]
pub struct FailedRequest(pub Arc<RelayError>);

/// Location of the error page carrying `message` as the `msg` parameter.
pub fn error_location(message: &str) -> String {
    format!("/error?msg={}", utf8_percent_encode(message, NON_ALPHANUMERIC))
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let mut response = Redirect::to(&error_location(&self.to_string())).into_response();
        response.extensions_mut().insert(FailedRequest(Arc::new(self)));
        response
    }
}
