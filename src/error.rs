use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found")]
    NotFound,

    #[error("ambiguous change prefix '{0}'")]
    AmbiguousPrefix(String),

    #[error("{0}")]
    Validation(String),

    #[error("PushToChangeWithChild: pushing to a change that has children is not allowed")]
    PushToChangeWithChild,

    #[error("PushToChangeNotOwned: pushing to a change that was created by another user or device is not allowed")]
    PushToChangeNotOwned,

    #[error("no common ancestor found")]
    NoCommonAncestor,

    #[error("failed to detect encoding")]
    UnknownEncoding,

    #[error("unsupported encoding for writing")]
    UnsupportedEncoding,

    #[error("change name generation failed: too many attempts")]
    ChangeNameExhausted,

    #[error("MissingSignature: missing signature in trailing headers")]
    MissingSignature,

    #[error("InvalidSignature: invalid signature format: {0}")]
    InvalidSignature(String),

    #[error("SignatureVerificationFailed: {0}")]
    SignatureVerificationFailed(String),

    #[error("decode request: {0}")]
    Decode(#[from] prost::DecodeError),
}

pub type Result<T> = std::result::Result<T, Error>;
