/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Error as AnyhowError;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::state::TransitionError;
use common::storage::StorageError;
use sea_orm::DbErr;
use serde_json::{Value, json};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::fmt;

pub const BEARER_REALM: &str = r#"Bearer realm="pubstorm-user""#;
pub const CLIENT_REALM: &str = r#"Basic realm="pubstorm-oauth-client""#;

/// Field name to message, rendered as `{"error": "invalid_params", "errors": {...}}`.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Debug)]
pub enum WebError {
    BadRequest(String),
    Unauthorized(String),
    InvalidClient,
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    PreconditionFailed(String),
    UnprocessableEntity(String),
    InvalidParams(FieldErrors),
    Locked,
    ServiceUnavailable(String),
    /// Any other `{"error", "error_description"}` pair.
    Api {
        status: StatusCode,
        error: &'static str,
        description: String,
    },
    Database(DbErr),
    Internal(AnyhowError),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            WebError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            WebError::InvalidClient => write!(f, "Unauthorized: invalid client"),
            WebError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            WebError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            WebError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            WebError::PreconditionFailed(msg) => write!(f, "Precondition Failed: {}", msg),
            WebError::UnprocessableEntity(msg) => write!(f, "Unprocessable Entity: {}", msg),
            WebError::InvalidParams(errors) => write!(f, "Invalid params: {:?}", errors),
            WebError::Locked => write!(f, "Locked"),
            WebError::ServiceUnavailable(msg) => write!(f, "Service Unavailable: {}", msg),
            WebError::Api { error, description, .. } => write!(f, "{}: {}", error, description),
            WebError::Database(err) => write!(f, "Database error: {}", err),
            WebError::Internal(err) => write!(f, "Internal error: {:#}", err),
        }
    }
}

impl std::error::Error for WebError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WebError::Database(err) => Some(err),
            WebError::Internal(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<DbErr> for WebError {
    fn from(err: DbErr) -> Self {
        WebError::Database(err)
    }
}

impl From<AnyhowError> for WebError {
    fn from(err: AnyhowError) -> Self {
        WebError::Internal(err)
    }
}

impl From<StorageError> for WebError {
    fn from(err: StorageError) -> Self {
        WebError::Internal(err.into())
    }
}

impl From<TransitionError> for WebError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Database(e) => WebError::Database(e),
            e => WebError::Internal(e.into()),
        }
    }
}

/// Hex SHA-1 of an error message, handed to the caller so reports can be
/// matched against the logs.
pub fn error_hash(message: &str) -> String {
    hex::encode(Sha1::digest(message.as_bytes()))
}

fn internal_server_error(message: String) -> Response {
    let hash = error_hash(&message);
    tracing::error!(error = %message, error_hash = %hash, "Internal server error");

    sentry::with_scope(
        |scope| scope.set_tag("error_hash", &hash),
        || sentry::capture_message(&message, sentry::Level::Error),
    );

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "internal_server_error",
            "error_hash": hash,
        })),
    )
        .into_response()
}

fn described(status: StatusCode, error: &str, description: String) -> Response {
    (
        status,
        Json(json!({
            "error": error,
            "error_description": description,
        })),
    )
        .into_response()
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        match self {
            WebError::BadRequest(msg) => described(StatusCode::BAD_REQUEST, "invalid_request", msg),
            WebError::Unauthorized(msg) => {
                let mut res = described(StatusCode::UNAUTHORIZED, "invalid_token", msg);
                res.headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(BEARER_REALM));
                res
            }
            WebError::InvalidClient => {
                let mut res = described(
                    StatusCode::UNAUTHORIZED,
                    "invalid_client",
                    "client credentials are invalid".to_string(),
                );
                res.headers_mut()
                    .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(CLIENT_REALM));
                res
            }
            WebError::Forbidden(msg) => described(StatusCode::FORBIDDEN, "forbidden", msg),
            WebError::NotFound(msg) => described(StatusCode::NOT_FOUND, "not_found", msg),
            WebError::Conflict(msg) => described(StatusCode::CONFLICT, "already_exists", msg),
            WebError::PreconditionFailed(msg) => {
                described(StatusCode::PRECONDITION_FAILED, "precondition_failed", msg)
            }
            WebError::UnprocessableEntity(msg) => {
                described(StatusCode::UNPROCESSABLE_ENTITY, "invalid_request", msg)
            }
            WebError::InvalidParams(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "error": "invalid_params",
                    "errors": errors,
                })),
            )
                .into_response(),
            WebError::Locked => described(
                StatusCode::LOCKED,
                "locked",
                "project is locked".to_string(),
            ),
            WebError::ServiceUnavailable(msg) => {
                described(StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
            WebError::Api {
                status,
                error,
                description,
            } => described(status, error, description),
            WebError::Database(err) => internal_server_error(err.to_string()),
            WebError::Internal(err) => internal_server_error(format!("{:#}", err)),
        }
    }
}

pub type WebResult<T> = Result<T, WebError>;

impl WebError {
    pub fn not_found(resource: &str) -> Self {
        WebError::NotFound(format!("{} could not be found", resource))
    }

    pub fn invalid_param(field: &str, message: impl Into<String>) -> Self {
        WebError::InvalidParams(FieldErrors::from([(field.to_string(), message.into())]))
    }

    pub fn invalid_params_description(description: impl Into<String>) -> Self {
        WebError::Api {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            error: "invalid_params",
            description: description.into(),
        }
    }

    pub fn invalid_grant(description: &str) -> Self {
        WebError::Api {
            status: StatusCode::BAD_REQUEST,
            error: "invalid_grant",
            description: description.to_string(),
        }
    }
}

/// A 422 body carrying an extra boolean next to the description, as the
/// confirmation endpoints answer.
pub fn invalid_params_with(description: &str, key: &str, value: bool) -> Response {
    let mut body = json!({
        "error": "invalid_params",
        "error_description": description,
    });

    if let Value::Object(map) = &mut body {
        map.insert(key.to_string(), Value::Bool(value));
    }

    (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
}
