use std::fmt::{Display, Formatter};

use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(PartialEq, Eq, Hash, Clone, Copy, Debug)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Conflict,
    PreconditionFailed,
    Unauthorized,
    Scanner,
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ErrorKind::BadRequest => "BAD_REQUEST",
                ErrorKind::NotFound => "NOT_FOUND",
                ErrorKind::Conflict => "CONFLICT",
                ErrorKind::PreconditionFailed => "PRECONDITION",
                ErrorKind::Unauthorized => "UNAUTHORIZED",
                ErrorKind::Scanner => "SCANNER_ERROR",
                ErrorKind::Internal => "INTERNAL_ERROR",
            }
        )
    }
}

/// Transport-agnostic error shared by every store and controller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("scanner error: {0}")]
    Scanner(String),

    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Scanner(_) => ErrorKind::Scanner,
            Error::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Prefixes the message with `context`, keeping the kind.
    pub fn context(self, context: impl Display) -> Self {
        match self {
            Error::BadRequest(m) => Error::BadRequest(format!("{context}: {m}")),
            Error::NotFound(m) => Error::NotFound(format!("{context}: {m}")),
            Error::Conflict(m) => Error::Conflict(format!("{context}: {m}")),
            Error::PreconditionFailed(m) => Error::PreconditionFailed(format!("{context}: {m}")),
            Error::Unauthorized(m) => Error::Unauthorized(format!("{context}: {m}")),
            Error::Scanner(m) => Error::Scanner(format!("{context}: {m}")),
            Error::Internal { message, source } => Error::Internal {
                message: format!("{context}: {message}"),
                source,
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::internal_with("json serialization error", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_keeps_the_kind_and_prefixes_the_message() {
        let err = Error::Conflict("a previous scanning is Pending".to_string())
            .context("scan controller: scan");

        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(
            err.to_string(),
            "conflict: scan controller: scan: a previous scanning is Pending"
        );
    }

    #[test]
    fn internal_errors_expose_their_source() {
        let io = std::io::Error::other("disk on fire");
        let err = Error::internal_with("unable to persist", io);

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(std::error::Error::source(&err).is_some());
    }
}
