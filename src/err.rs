#![allow(non_snake_case)]

use crate::{IntoResponse, Uri};

use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;

use serde::Serialize;

pub async fn handler404(path: Uri) -> Error {
    Error::NotFound {
        message: format!("Invalid path: {}", path),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Maybe<T> {
    Nothing(Error),
    Fine(Success<T>),
}

pub fn Fine<V>(v: V) -> Maybe<V>
where
    V: Serialize,
{
    Maybe::Fine(Success::of(v))
}

pub fn Nothing<V>(err: Error) -> Maybe<V> {
    Maybe::Nothing(err)
}

#[derive(Debug, Clone, Serialize)]
pub struct Success<V> {
    success: bool,
    #[serde(flatten)]
    value: V,
}

impl<T> IntoResponse for Maybe<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        match self {
            Maybe::Nothing(err) => err.into_response(),
            Maybe::Fine(success) => Json::into_response(Json(success)),
        }
    }
}

impl<V: Serialize> Success<V> {
    pub fn of(value: V) -> Self {
        Self {
            success: true,
            value,
        }
    }

    pub fn into_inner(self) -> V {
        self.value
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "error")]
pub enum Error {
    NotFound { message: String },
    InvalidPayload { message: String },
    MissingCredentials { message: String },
    AuthenticationFailure { message: String },
    InvalidSession { message: String },
    Unauthenticated { redirect_to: String, from: String },
    Unauthorized { redirect_to: String, from: String },
    Backend { status: u16, message: String },
    InternalError { kind: &'static str, message: String },
    Unknown { message: String },
}

impl Error {
    pub fn unknown<S: Into<String>>(msg: S) -> Error {
        Error::Unknown {
            message: msg.into(),
        }
    }

    pub fn invalid_payload<S: Into<String>>(msg: S) -> Error {
        Error::InvalidPayload {
            message: msg.into(),
        }
    }

    pub fn invalid_session<S: Into<String>>(msg: S) -> Error {
        Error::InvalidSession {
            message: msg.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InvalidPayload { .. } | Error::MissingCredentials { .. } => {
                StatusCode::BAD_REQUEST
            }
            Error::AuthenticationFailure { .. }
            | Error::InvalidSession { .. }
            | Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::Unauthorized { .. } => StatusCode::FORBIDDEN,
            Error::Backend { status, .. } => match StatusCode::from_u16(*status) {
                Ok(code) if code.is_client_error() => code,
                _ => StatusCode::BAD_GATEWAY,
            },
            Error::InternalError { .. } | Error::Unknown { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        log::error!("hosted backend request failed: {}", err);
        Self::InternalError {
            kind: "TransportError",
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound {
                message: "Requested row does not exist".to_string(),
            },
            other => {
                log::error!("database error: {}", other);
                Self::InternalError {
                    kind: "DatabaseError",
                    message: other.to_string(),
                }
            }
        }
    }
}

impl From<uuid::Error> for Error {
    fn from(id: uuid::Error) -> Self {
        Self::InvalidPayload {
            message: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InternalError {
            kind: "SerializationError",
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Unknown {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_tagged_by_kind() {
        let body = serde_json::to_value(Error::Unauthorized {
            redirect_to: "/unauthorized".to_string(),
            from: "/admin".to_string(),
        })
        .unwrap();
        assert_eq!(body["error"], "Unauthorized");
        assert_eq!(body["redirect_to"], "/unauthorized");
        assert_eq!(body["from"], "/admin");
    }

    #[test]
    fn success_flattens_value() {
        #[derive(Serialize)]
        struct Value {
            answer: u8,
        }
        let body = serde_json::to_value(Fine(Value { answer: 42 })).unwrap();
        assert_eq!(body, serde_json::json!({ "success": true, "answer": 42 }));
    }

    #[test]
    fn backend_server_errors_become_bad_gateway() {
        let client = Error::Backend {
            status: 422,
            message: "weak password".to_string(),
        };
        let server = Error::Backend {
            status: 503,
            message: "unavailable".to_string(),
        };
        assert_eq!(client.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(server.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn missing_rows_map_to_not_found() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
