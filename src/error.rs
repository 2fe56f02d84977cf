//! Error taxonomy for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Result type alias using the gateway's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors observable at the HTTP boundary, per the taxonomy in spec.md §7.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed request body or query parameter.
    #[error("validation error: {0}")]
    Validation(String),

    /// Namespace, recommender, action, or variation missing from config.
    #[error("not found: {0}")]
    NotFound(String),

    /// Config node present but internally inconsistent (bad experiment,
    /// unknown metadata type, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No variations configured for a recommender.
    #[error("no variations configured for recommender")]
    NoVariationsConfigured,

    /// Experiment evaluator returned a variation reference that could not be
    /// matched to any configured variation.
    #[error("no matched target for experiment selection")]
    NoMatchedTarget,

    /// A downstream service reported throttling.
    #[error("downstream throttled: {service} ({code})")]
    Throttled { service: String, code: String },

    /// A downstream managed-recommender call failed.
    #[error("managed service error ({code}): {message}")]
    ManagedService { code: String, message: String },

    /// A function-backend invocation returned a non-200 status.
    #[error("function invocation failed ({status}): {message}")]
    FunctionInvoke { status: u16, message: String },

    /// The config-distribution sidecar could not be reached and no prior
    /// snapshot exists.
    #[error("config fetch failed: {0}")]
    Config(String),

    /// Any other downstream error not otherwise classified.
    #[error("downstream error ({code}): {message}")]
    Downstream { code: String, message: String },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client transport error talking to a downstream.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Unhandled internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn throttled(service: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Throttled {
            service: service.into(),
            code: code.into(),
        }
    }

    pub fn managed_service(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ManagedService {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error `type` tag surfaced in the `{type, code, message}` envelope.
    fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "ValidationError",
            Error::NotFound(_) => "NotFoundError",
            Error::Configuration(_)
            | Error::NoVariationsConfigured
            | Error::NoMatchedTarget
            | Error::Config(_) => "ConfigurationError",
            Error::Throttled { .. } => "ThrottlingError",
            Error::ManagedService { .. } | Error::FunctionInvoke { .. } | Error::Downstream { .. } => {
                "DownstreamError"
            }
            Error::Serialization(_) | Error::Transport(_) | Error::Internal(_) => "InternalError",
        }
    }

    /// Backend-preserved error code surfaced as `code`.
    fn code(&self) -> String {
        match self {
            Error::ManagedService { code, .. } => code.clone(),
            Error::Throttled { code, .. } => code.clone(),
            Error::Downstream { code, .. } => code.clone(),
            Error::FunctionInvoke { status, .. } => status.to_string(),
            other => other.status().as_u16().to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Configuration(_)
            | Error::NoMatchedTarget
            | Error::Config(_) => StatusCode::NOT_FOUND,
            Error::NoVariationsConfigured => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Throttled { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::ManagedService { code, .. } if code == "Throttling" => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Error::ManagedService { .. }
            | Error::FunctionInvoke { .. }
            | Error::Downstream { .. }
            | Error::Serialization(_)
            | Error::Transport(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    #[serde(rename = "type")]
    kind: String,
    code: String,
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        let body = ErrorEnvelope {
            kind: self.kind().to_string(),
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
