//! Error envelope shared by every handler.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bazaar_db::DbError;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or missing input.
    #[error("{0}")]
    Validation(String),

    /// A uniqueness rule would be broken.
    #[error("{0}")]
    Conflict(String),

    #[error("There is not enough product stock available.")]
    InsufficientStock,

    /// Missing or invalid credentials on a protected route.
    #[error("{0}")]
    Unauthenticated(String),

    /// Credentials or tokens rejected by a login/logout endpoint.
    #[error("{0}")]
    AuthRejected(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Cart not found")]
    CartNotFound,

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn not_found() -> Self {
        Self::NotFound("Not found.".into())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(entity) => Self::NotFound(format!("{} not found.", entity)),
            DbError::Conflict(msg) => Self::Conflict(msg),
            DbError::InsufficientStock { .. } => Self::InsufficientStock,
            DbError::InvalidQuantity(q) if q < 1 => {
                Self::Validation("Ensure quantity is greater than or equal to 1.".into())
            }
            DbError::InvalidQuantity(_) => {
                Self::Validation("Ensure quantity is less than or equal to 1000000000.".into())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "Request failed");
        }

        let (status, key) = match &self {
            Self::Validation(_) | Self::Conflict(_) | Self::InsufficientStock => {
                (StatusCode::BAD_REQUEST, "error")
            }
            Self::AuthRejected(_) => (StatusCode::BAD_REQUEST, "detail"),
            Self::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "detail"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "detail"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "detail"),
            Self::CartNotFound => (StatusCode::NOT_FOUND, "error"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "detail"),
        };

        // Display of Internal never carries the underlying cause.
        let mut body = Map::new();
        body.insert(key.to_string(), Value::String(self.to_string()));
        (status, Json(Value::Object(body))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stock_errors_are_client_errors() {
        let err: ApiError = DbError::InsufficientStock {
            product_id: 1,
            requested: 3,
            available: 2,
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn db_not_found_maps_to_404() {
        let err: ApiError = DbError::NotFound("Product").into();
        assert_eq!(err.to_string(), "Product not found.");
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn internal_errors_hide_their_cause() {
        let err: ApiError = DbError::Corrupt("bad price".into()).into();
        assert_eq!(err.to_string(), "Internal server error");
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
