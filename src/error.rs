//! Error handler for the directory handshake.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, ServerError>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Every kind of failure a request can end with.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed input or unsupported shape. No network call was made.
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error(transparent)]
    Query(#[from] QueryRejection),

    /// Credentials rejected or directory unreachable during the bind.
    #[error("{0}")]
    Authentication(String),

    /// Storage write failed or conflicted after a successful bind.
    #[error("{details}")]
    Persistence {
        details: String,
        source: Option<BoxError>,
    },

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<BoxError>,
    },

    #[error("request deadline exceeded")]
    Timeout,

    #[error("missing or invalid session")]
    Unauthorized,

    #[error("action {0:?} is not available")]
    ActionNotAvailable(String),
}

impl ServerError {
    /// Wrap a fault that should never be attributed to the user.
    pub fn internal<E>(details: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Internal {
            details: details.into(),
            source: Some(Box::new(err)),
        }
    }

    /// Wrap a storage failure with context.
    pub fn persistence<E>(details: impl Into<String>, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let details = details.into();
        Self::Persistence {
            details: format!("{details}: {err}"),
            source: Some(Box::new(err)),
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerError::Validation(_)
            | ServerError::InvalidInput(_)
            | ServerError::Axum(_)
            | ServerError::Query(_) => "validation",
            ServerError::Authentication(_) => "authentication",
            ServerError::Persistence { .. } => "persistence",
            ServerError::Internal { .. } => "internal",
            ServerError::Timeout => "timeout",
            ServerError::Unauthorized => "unauthorized",
            ServerError::ActionNotAvailable(_) => "action",
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<Vec<FieldError>>,
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    pub fn errors(mut self, errors: &ValidationErrors) -> Self {
        self.errors = Some(parse_validation_errors(errors));
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| issue.code.to_string()),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => {
                response.errors(validation_errors)
            },

            ServerError::Authentication(_) => response
                .title("Authentication against the directory failed.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::Unauthorized => response
                .title("Missing or invalid session.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::ActionNotAvailable(_) => response
                .title("Action not available.")
                .status(StatusCode::NOT_FOUND),

            ServerError::Timeout => response
                .title("Request took too long.")
                .status(StatusCode::GATEWAY_TIMEOUT),

            ServerError::Persistence { details, source } => {
                tracing::error!(err = ?source, %details, "configuration was not saved");

                ResponseError::default().details(details)
            },

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },

            _ => response,
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
