use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::error::Error;

/// RPC error that converts to a text/plain HTTP response.
pub struct RpcError {
    pub status: StatusCode,
    pub message: String,
}

impl RpcError {
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    /// Prefixes the message with what the handler was doing.
    #[must_use]
    pub fn context(mut self, prefix: &str) -> Self {
        self.message = format!("{prefix}: {}", self.message);
        self
    }
}

impl From<Error> for RpcError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::MissingSignature
            | Error::InvalidSignature(_)
            | Error::SignatureVerificationFailed(_) => StatusCode::UNAUTHORIZED,

            Error::NotFound | Error::AmbiguousPrefix(_) => StatusCode::NOT_FOUND,

            Error::Validation(_)
            | Error::PushToChangeWithChild
            | Error::PushToChangeNotOwned
            | Error::Decode(_) => StatusCode::BAD_REQUEST,

            Error::Database(_)
            | Error::Io(_)
            | Error::NoCommonAncestor
            | Error::UnknownEncoding
            | Error::UnsupportedEncoding
            | Error::ChangeNameExhausted => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<rusqlite::Error> for RpcError {
    fn from(err: rusqlite::Error) -> Self {
        Self::from(Error::from(err))
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}
