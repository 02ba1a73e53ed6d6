//! Mapping of domain errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::{ApprovalError, CampaignError, ErrorCode, FollowUpError};

/// An error body `{"error": {code, message, suggestion?}}` with a status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: CampaignError,
}

impl ApiError {
    pub fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            error: CampaignError::new(code, message),
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, format!("{what} not found"))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.error }))).into_response()
    }
}

impl From<ApprovalError> for ApiError {
    fn from(err: ApprovalError) -> Self {
        let (status, code) = match &err {
            ApprovalError::CampaignNotFound(_) | ApprovalError::MessageNotFound(_) => {
                (StatusCode::NOT_FOUND, ErrorCode::NotFound)
            }
            ApprovalError::InvalidTransition { .. }
            | ApprovalError::NotEditable { .. }
            | ApprovalError::CampaignClosed(_) => (StatusCode::CONFLICT, ErrorCode::InvalidRequest),
            ApprovalError::MissingContact { .. } | ApprovalError::Delivery(_) => {
                (StatusCode::BAD_GATEWAY, ErrorCode::DeliveryFailed)
            }
        };
        Self::new(status, code, err.to_string())
    }
}

impl From<FollowUpError> for ApiError {
    fn from(err: FollowUpError) -> Self {
        let message = err.to_string();
        match err {
            FollowUpError::Approval(inner) => inner.into(),
            FollowUpError::RuleNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, ErrorCode::NotFound, message)
            }
            FollowUpError::InvalidRule(_) => Self::bad_request(message),
            FollowUpError::Scheduling { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorCode::TriggerSchedulingFailed,
                message,
            ),
            FollowUpError::Database(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorCode::PersistenceUnavailable,
                message,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    use crate::campaign::model::MessageStatus;
    use crate::error::DatabaseError;

    #[test]
    fn approval_errors_map_to_statuses() {
        let e = ApiError::from(ApprovalError::MessageNotFound(Uuid::nil()));
        assert_eq!(e.status, StatusCode::NOT_FOUND);

        let e = ApiError::from(ApprovalError::InvalidTransition {
            id: Uuid::nil(),
            from: MessageStatus::Rejected,
            to: MessageStatus::Approved,
        });
        assert_eq!(e.status, StatusCode::CONFLICT);
        assert_eq!(e.error.code, ErrorCode::InvalidRequest);
    }

    #[test]
    fn store_failure_is_persistence_unavailable() {
        let e = ApiError::from(FollowUpError::Database(DatabaseError::Query("locked".into())));
        assert_eq!(e.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(e.error.code, ErrorCode::PersistenceUnavailable);
    }
}
