//! HTTP error type and the core-error → status-code mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::core::CoreError;
use crate::depot::DepotError;
use crate::keeper::KeeperError;

/// Errors returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or inconsistent input (bad base64, bad uuid, declared
    /// digest mismatch, unknown pagination cursor).
    #[error("bad request ({code}): {detail}")]
    BadRequest { code: String, detail: String },

    /// Missing or unknown API key.
    #[error("unauthorized")]
    Unauthorized,

    /// Authenticated, but not allowed (owner-gated operation).
    #[error("forbidden")]
    Forbidden,

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// A precondition on current state failed.
    #[error("conflict ({code}): {detail}")]
    Conflict { code: String, detail: String },

    #[error("internal error: {detail}")]
    Internal { detail: String },
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, detail: impl Into<String>) -> Self {
        ApiError::BadRequest {
            code: code.into(),
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        ApiError::Internal {
            detail: detail.into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest { .. } => "bad-request",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound { .. } => "not-found",
            ApiError::Conflict { .. } => "validation",
            ApiError::Internal { .. } => "internal",
        }
    }

    fn code(&self) -> Option<&str> {
        match self {
            ApiError::BadRequest { code, .. } => Some(code),
            ApiError::Conflict { code, .. } => Some(code),
            _ => None,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            // Unknown pagination cursors are malformed input, not state
            // conflicts.
            CoreError::Validation { reason: "after", detail } => ApiError::BadRequest {
                code: "after".to_string(),
                detail,
            },
            CoreError::Validation { reason, detail } => ApiError::Conflict {
                code: reason.to_string(),
                detail,
            },
            // Digest/size mismatches on supplied payloads reject the input
            // before anything is appended.
            CoreError::Integrity { reason: reason @ ("digest" | "size"), detail } => {
                ApiError::BadRequest {
                    code: reason.to_string(),
                    detail,
                }
            }
            CoreError::Integrity { reason, detail } => ApiError::Conflict {
                code: reason.to_string(),
                detail,
            },
            CoreError::NotFound { kind, id } => ApiError::NotFound {
                kind: kind.to_string(),
                id,
            },
            CoreError::Conflict => ApiError::Conflict {
                code: "conflict".to_string(),
                detail: "concurrent write conflict, retry".to_string(),
            },
            CoreError::Storage(detail) => ApiError::Internal { detail },
            CoreError::Canon(err) => ApiError::Internal {
                detail: err.to_string(),
            },
        }
    }
}

impl From<crate::Error> for ApiError {
    fn from(err: crate::Error) -> Self {
        match err {
            crate::Error::Core(err) => err.into(),
            crate::Error::Keeper(err) => match err {
                KeeperError::UnknownAfter { uuid } => ApiError::BadRequest {
                    code: "after".to_string(),
                    detail: format!("unknown pagination cursor {uuid}"),
                },
                KeeperError::NotFound { uuid } => ApiError::NotFound {
                    kind: "event".to_string(),
                    id: uuid.to_string(),
                },
                other => ApiError::Internal {
                    detail: other.to_string(),
                },
            },
            crate::Error::Depot(err) => match err {
                DepotError::NotFound { id } => ApiError::NotFound {
                    kind: "blob".to_string(),
                    id: id.to_string(),
                },
                other => ApiError::Internal {
                    detail: other.to_string(),
                },
            },
            crate::Error::Rebuild(err) => ApiError::Internal {
                detail: err.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({
            "error": {
                "kind": self.kind(),
                "code": self.code(),
                "detail": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_conflict() {
        let err: ApiError = CoreError::validation("last-owner", "floor").into();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.code(), Some("last-owner"));
    }

    #[test]
    fn digest_mismatch_maps_to_bad_request() {
        let err: ApiError = CoreError::integrity("digest", "mismatch").into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unknown_after_maps_to_bad_request() {
        let err: ApiError = CoreError::validation("after", "unknown cursor").into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), Some("after"));
    }

    #[test]
    fn not_found_maps_to_404() {
        let err: ApiError = CoreError::not_found("object", "x").into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
