use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use santa_core::{ErrorKind, RosterError};
use serde::Serialize;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Roster(RosterError::DuplicateName) => StatusCode::CONFLICT,
            ApiError::Roster(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Auth => StatusCode::UNAUTHORIZED,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::State => StatusCode::CONFLICT,
                ErrorKind::Integrity => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Roster(err) => match err.kind() {
                ErrorKind::Validation => "validation",
                ErrorKind::Auth => "auth",
                ErrorKind::NotFound => "not_found",
                ErrorKind::State => "state",
                ErrorKind::Integrity => "integrity",
            },
            ApiError::Store(_) => "store",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}
