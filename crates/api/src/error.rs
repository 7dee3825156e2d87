//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Saga(SagaError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Saga(err) => saga_error_status(err),
        }
    }
}

fn saga_error_status(err: &SagaError) -> StatusCode {
    match err {
        SagaError::NotFound(_)
        | SagaError::StepNotFound { .. }
        | SagaError::Domain(DomainError::StepNotFound(_)) => StatusCode::NOT_FOUND,
        SagaError::MissingField(_)
        | SagaError::InvalidExecution(_)
        | SagaError::UnknownSagaType(_) => StatusCode::BAD_REQUEST,
        SagaError::DuplicateBusinessKey(_)
        | SagaError::InvalidState { .. }
        | SagaError::Domain(_) => StatusCode::CONFLICT,
        SagaError::Store(_) if err.is_conflict() => StatusCode::CONFLICT,
        SagaError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::NotFound(msg) | ApiError::BadRequest(msg) => msg,
            ApiError::Saga(err) => err.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(error = %message, "internal server error");
        }

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use common::SagaId;
    use domain::SagaStatus;

    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (SagaError::NotFound(SagaId::new()), StatusCode::NOT_FOUND),
            (SagaError::MissingField("businessKey"), StatusCode::BAD_REQUEST),
            (SagaError::UnknownSagaType("X".into()), StatusCode::BAD_REQUEST),
            (SagaError::DuplicateBusinessKey("BK".into()), StatusCode::CONFLICT),
            (
                SagaError::InvalidState {
                    expected: SagaStatus::Compensating,
                    actual: SagaStatus::InProgress,
                },
                StatusCode::CONFLICT,
            ),
            (
                SagaError::Domain(DomainError::StepsIncomplete {
                    steps: vec!["credit".into()],
                }),
                StatusCode::CONFLICT,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }
}
