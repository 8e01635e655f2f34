use std::error::Error;
use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

/// An error response from an api.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    causes: Vec<String>,
}

impl ApiErrorResponse {
    /// Creates an error response with a detail message.
    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            causes: Vec::new(),
        }
    }

    /// Creates an error response from an error and its sources.
    pub fn from_error<E: Error + ?Sized>(error: &E) -> Self {
        let mut messages = vec![error.to_string()];

        let mut source = error.source();
        while let Some(cause) = source {
            let message = cause.to_string();
            if !messages.contains(&message) {
                messages.push(message);
            }
            source = cause.source();
        }

        let detail = messages.remove(0);
        Self {
            detail: Some(detail),
            causes: messages,
        }
    }

    /// Returns the detail message.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Pairs the response with a status code.
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

impl fmt::Display for ApiErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.detail {
            Some(ref detail) => f.write_str(detail),
            None => f.write_str("no error details"),
        }
    }
}
