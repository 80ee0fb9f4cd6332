use axum::{
    response::{IntoResponse, Response},
    Json,
};
use reqwest::StatusCode;
use serde_json::json;

#[derive(Debug)]
pub enum BaseError {
    ParamInvalid(Option<String>),
    DatabaseFatal(Option<String>),
    DatabaseDup(Option<String>),
    NotFound(Option<String>),
    Unauthorized(Option<String>),
    StoreError(Option<String>),
    // An upstream collaborator (completion backend, schema service) failed.
    Unavailable(Option<String>),
    InternalServerError(Option<String>),
}

impl std::fmt::Display for BaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (kind, msg) = match self {
            BaseError::ParamInvalid(m) => ("invalid parameter", m),
            BaseError::DatabaseFatal(m) => ("database error", m),
            BaseError::DatabaseDup(m) => ("duplicate key", m),
            BaseError::NotFound(m) => ("not found", m),
            BaseError::Unauthorized(m) => ("unauthorized", m),
            BaseError::StoreError(m) => ("store error", m),
            BaseError::Unavailable(m) => ("unavailable", m),
            BaseError::InternalServerError(m) => ("internal error", m),
        };
        match msg {
            Some(m) => write!(f, "{}: {}", kind, m),
            None => f.write_str(kind),
        }
    }
}

impl std::error::Error for BaseError {}

impl From<crate::service::cache::CacheError> for BaseError {
    fn from(err: crate::service::cache::CacheError) -> Self {
        BaseError::StoreError(Some(err.to_string()))
    }
}

impl From<crate::service::client::ClientError> for BaseError {
    fn from(err: crate::service::client::ClientError) -> Self {
        BaseError::Unavailable(Some(err.to_string()))
    }
}

impl From<crate::service::schema::CollaboratorError> for BaseError {
    fn from(err: crate::service::schema::CollaboratorError) -> Self {
        BaseError::Unavailable(Some(err.to_string()))
    }
}

impl From<diesel::result::Error> for BaseError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => BaseError::NotFound(None),
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            ) => BaseError::DatabaseDup(Some(info.message().to_string())),
            other => BaseError::DatabaseFatal(Some(other.to_string())),
        }
    }
}

impl IntoResponse for BaseError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message) = match self {
            BaseError::ParamInvalid(msg) => (
                StatusCode::BAD_REQUEST,
                1001,
                msg.unwrap_or("request params invalid".to_string()),
            ),
            BaseError::DatabaseFatal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                1100,
                msg.unwrap_or("database unknown error".to_string()),
            ),
            BaseError::DatabaseDup(msg) => (
                StatusCode::BAD_REQUEST,
                1101,
                msg.unwrap_or("some unique keys have conflicted".to_string()),
            ),
            BaseError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                1002,
                msg.unwrap_or("data not found".to_string()),
            ),
            BaseError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                1003,
                msg.unwrap_or("Unauthorized".to_string()),
            ),
            BaseError::StoreError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                1200,
                msg.unwrap_or("configuration store operation failed".to_string()),
            ),
            BaseError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                1300,
                msg.unwrap_or("upstream service unavailable".to_string()),
            ),
            BaseError::InternalServerError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                0,
                msg.unwrap_or("internal server error".to_string()),
            ),
        };
        let body = Json(json!({
            "code": error_code,
            "msg": error_message,
        }));
        (status, body).into_response()
    }
}
