//! Domain errors for the proxy reconciliation engine.

use std::fmt;

use thiserror::Error;

/// Coarse classification of a [`DomainError`].
///
/// The phase pipeline decides how to react to a failure purely from this
/// value, never from the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced object or sub-resource does not exist (anymore).
    NotFound,
    /// The proxy rejected the credentials used by the client.
    Unauthorized,
    /// Something is not ready yet; the caller should requeue shortly.
    Transient,
    /// The tick's context was cancelled.
    Cancelled,
    /// A mandatory cross-reference could not be resolved.
    Reference,
    /// Any other failure.
    Hard,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Unauthorized => "unauthorized",
            Self::Transient => "transient",
            Self::Cancelled => "cancelled",
            Self::Reference => "reference",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-level errors that can occur while reconciling a proxy.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not ready: {0}")]
    NotReady(String),

    #[error("Reconciliation cancelled")]
    Cancelled,

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Proxy API error (status {status}): {message}")]
    ProxyApi { status: u16, message: String },

    #[error("SQL error: {0}")]
    Sql(String),

    #[error("Platform API error: {0}")]
    Platform(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<DomainError>,
    },

    #[error(transparent)]
    Bundle(#[from] ErrorBundle),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Maps an HTTP status returned by the proxy's REST API.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => Self::NotFound {
                kind: "proxy object".to_string(),
                name: message,
            },
            401 => Self::Unauthorized(message),
            _ => Self::ProxyApi { status, message },
        }
    }

    /// Wraps the error with a message, keeping its [`ErrorKind`].
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::NotReady(_) => ErrorKind::Transient,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidReference(_) => ErrorKind::Reference,
            Self::Context { source, .. } => source.kind(),
            Self::ValidationFailed(_)
            | Self::ProxyApi { .. }
            | Self::Sql(_)
            | Self::Platform(_)
            | Self::SerializationError(_)
            | Self::Bundle(_) => ErrorKind::Hard,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_unauthorized(&self) -> bool {
        self.kind() == ErrorKind::Unauthorized
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

/// Extension for attaching context to results.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> DomainResult<T>;
}

impl<T> ResultExt<T> for DomainResult<T> {
    fn context(self, context: impl Into<String>) -> DomainResult<T> {
        self.map_err(|e| e.context(context))
    }
}

/// An accumulation of errors, reported together.
#[derive(Debug, Default)]
pub struct ErrorBundle {
    errors: Vec<DomainError>,
}

impl ErrorBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: DomainError) {
        self.errors.push(err);
    }

    /// Pushes the error of `result`, if any.
    pub fn collect<T>(&mut self, result: DomainResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.push(e);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[DomainError] {
        &self.errors
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ErrorBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.errors.as_slice() {
            return write!(f, "{only}");
        }
        write!(f, "{} errors occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorBundle {}
