//! Error handling module for the Natours backend.
//!
//! Every failure is expressed as an [`AppError`]. Handlers return it directly;
//! [`error_funnel`] then shapes the final response depending on whether the
//! request targeted the JSON API or a rendered page, and on the environment.

use axum::{
    extract::{
        multipart::MultipartError,
        rejection::{FormRejection, JsonRejection},
        Request, State,
    },
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::AppState;

/// Message sent for non-operational errors outside development.
pub const GENERIC_FAILURE: &str = "Something went very wrong!";

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Malformed request or invalid parameter
    BadRequest(String),
    /// One or more document constraints failed
    Validation(Vec<String>),
    /// Unique constraint violated; carries the offending field
    Duplicate(String),
    /// Authentication required or failed
    Unauthorized(String),
    /// Authenticated but not allowed
    Forbidden(String),
    /// Resource not found
    NotFound(String),
    /// Request body over the configured limit
    PayloadTooLarge(String),
    /// Rate limit exceeded
    TooManyRequests(String),
    /// Outbound integration not configured
    ServiceUnavailable(String),
    /// Outbound delivery (mail, payment provider) failed
    Delivery(String),
    /// Database error
    Database(String),
    /// Internal server error
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Duplicate(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Delivery(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Operational errors are anticipated and safe to show to clients.
    pub fn is_operational(&self) -> bool {
        !matches!(self, AppError::Database(_) | AppError::Internal(_))
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::Validation(errors) => format!("Invalid input data. {}", errors.join(". ")),
            AppError::Duplicate(field) => {
                format!("Duplicate field value: {}. Please use another value!", field)
            }
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::TooManyRequests(msg)
            | AppError::ServiceUnavailable(msg)
            | AppError::Delivery(msg)
            | AppError::Database(msg)
            | AppError::Internal(msg) => msg.clone(),
        }
    }

    /// Shorthand for the factory's not-found signal.
    pub fn no_document() -> Self {
        AppError::NotFound("No document found with that ID".to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.status_code().as_u16(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return AppError::Duplicate(unique_fields(db_err.message()));
            }
            if db_err.is_foreign_key_violation() {
                return AppError::BadRequest(
                    "A referenced document does not exist".to_string(),
                );
            }
        }
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(crate::models::messages(&errors))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("Invalid input data. {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AppError::Unauthorized(
                "Your token has expired! Please log in again.".to_string(),
            ),
            _ => AppError::Unauthorized("Invalid token. Please log in again!".to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<FormRejection> for AppError {
    fn from(rejection: FormRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::BadRequest(err.body_text())
    }
}

impl From<minijinja::Error> for AppError {
    fn from(err: minijinja::Error) -> Self {
        AppError::Internal(format!("Template error: {}", err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(format!("I/O error: {}", err))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Background task failed: {}", err))
    }
}

/// Turn `UNIQUE constraint failed: tours.name` into `name`.
fn unique_fields(message: &str) -> String {
    let columns = message
        .rsplit(':')
        .next()
        .unwrap_or(message)
        .split(',')
        .map(|column| {
            let column = column.trim();
            column.rsplit('.').next().unwrap_or(column).to_string()
        })
        .collect::<Vec<_>>();
    columns.join(", ")
}

/// What the funnel needs to know about a failure after the handler returned.
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub status: StatusCode,
    pub message: String,
    pub detail: String,
    pub operational: bool,
}

impl From<&AppError> for FailureReport {
    fn from(err: &AppError) -> Self {
        Self {
            status: err.status_code(),
            message: err.message(),
            detail: format!("{:?}", err),
            operational: err.is_operational(),
        }
    }
}

/// Error response envelope.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ErrorResponse {
    fn label(status: StatusCode) -> &'static str {
        if status.is_client_error() {
            "fail"
        } else {
            "error"
        }
    }

    /// Safe envelope: unknown errors collapse to a generic message.
    pub fn production(report: &FailureReport) -> Self {
        let message = if report.operational {
            report.message.clone()
        } else {
            GENERIC_FAILURE.to_string()
        };
        Self {
            status: Self::label(report.status),
            message,
            error: None,
        }
    }

    /// Full envelope echoing the underlying error.
    pub fn development(report: &FailureReport) -> Self {
        Self {
            status: Self::label(report.status),
            message: report.message.clone(),
            error: Some(report.detail.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let report = FailureReport::from(&self);
        if !report.operational {
            tracing::error!("ERROR: {}", report.detail);
        }

        let body = ErrorResponse::production(&report);
        let mut response = (report.status, Json(body)).into_response();
        response.extensions_mut().insert(report);
        response
    }
}

/// Terminal error handler.
///
/// API failures keep their JSON envelope (enriched in development); failures
/// on page routes are re-rendered through the error template.
pub async fn error_funnel(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let is_api = request.uri().path().starts_with("/api");
    let response = next.run(request).await;

    let Some(report) = response.extensions().get::<FailureReport>().cloned() else {
        return response;
    };
    let development = state.config.environment.is_development();

    if is_api {
        if development {
            return (report.status, Json(ErrorResponse::development(&report))).into_response();
        }
        return response;
    }

    let message = if report.operational || development {
        report.message.clone()
    } else {
        "Please try again later.".to_string()
    };

    match state.views.render_error(&message) {
        Ok(html) => (report.status, Html(html)).into_response(),
        Err(e) => {
            tracing::error!("Failed to render error page: {}", e);
            response
        }
    }
}
