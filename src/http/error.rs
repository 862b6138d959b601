use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or invalid admin credentials")]
    Unauthorized,
    #[error("invalid request body: {0}")]
    Json(#[from] JsonRejection),
    #[error("invalid query string: {0}")]
    Query(#[from] QueryRejection),
    #[error("invalid path: {0}")]
    Path(#[from] PathRejection),
    #[error("{0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::Validation(_)
                | EngineError::InvalidTransition { .. }
                | EngineError::LimitExceeded(_) => StatusCode::BAD_REQUEST,
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::Conflict(_) | EngineError::FacilityInUse(_) => StatusCode::CONFLICT,
                EngineError::JournalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_)
            | ApiError::Json(_)
            | ApiError::Query(_)
            | ApiError::Path(_)
            | ApiError::Invalid(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "request failed: {self}");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookingStatus;
    use ulid::Ulid;

    #[test]
    fn engine_errors_map_to_status_codes() {
        let id = Ulid::new();
        let cases = [
            (EngineError::validation("bad"), StatusCode::BAD_REQUEST),
            (
                EngineError::InvalidTransition {
                    from: BookingStatus::Cancelled,
                    to: BookingStatus::Confirmed,
                },
                StatusCode::BAD_REQUEST,
            ),
            (EngineError::LimitExceeded("too long"), StatusCode::BAD_REQUEST),
            (EngineError::NotFound(id), StatusCode::NOT_FOUND),
            (EngineError::Conflict(id), StatusCode::CONFLICT),
            (EngineError::FacilityInUse(id), StatusCode::CONFLICT),
            (EngineError::JournalError("disk full".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn server_errors_hide_details() {
        let resp = ApiError::from(EngineError::JournalError("disk full".into())).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
