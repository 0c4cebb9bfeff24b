//! Request-level error classification.
//!
//! Every phase of request execution reports failures as a [`RequestError`]
//! whose variant is the classification: client-caused input problems,
//! server-side failures, or invariant violations inside the engine.

use std::fmt;

use thiserror::Error;

/// Boxed source error carried inside a [`RequestError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for request execution.
pub type Result<T> = std::result::Result<T, RequestError>;

/// Who is to blame for a failed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed or disallowed input.
    InvalidRequest,
    /// Evaluation, storage or apply failure.
    Internal,
    /// Engine invariant breached; a bug rather than bad input.
    Fatal,
}

impl ErrorClass {
    /// Machine-readable code written into error envelopes.
    pub fn code(self) -> &'static str {
        match self {
            ErrorClass::InvalidRequest => "ErrorInvalidRequest",
            ErrorClass::Internal | ErrorClass::Fatal => "Error",
        }
    }
}

/// Context chain plus the originating error.
#[derive(Debug)]
pub struct Detail {
    context: String,
    source: Option<BoxError>,
}

impl Detail {
    fn new(context: impl Into<String>, source: Option<BoxError>) -> Self {
        Self {
            context: context.into(),
            source,
        }
    }

    /// Underlying error, if any.
    pub fn source(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.source.as_deref()
    }
}

impl fmt::Display for Detail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {source}", self.context),
            None => f.write_str(&self.context),
        }
    }
}

/// Failure of a single request, tagged with its [`ErrorClass`].
#[derive(Debug, Error)]
pub enum RequestError {
    /// Client error; never retried, no partial effects.
    #[error("invalid request: {0}")]
    InvalidRequest(Detail),
    /// Server error; the request fails as a whole.
    #[error("internal error: {0}")]
    Internal(Detail),
    /// Invariant violation; aborts only the offending request.
    #[error("invariant violation: {0}")]
    Fatal(Detail),
}

impl RequestError {
    /// Builds an error of the given class.
    pub fn classified(
        class: ErrorClass,
        context: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::from_detail(class, Detail::new(context, Some(source.into())))
    }

    /// Client error without an underlying cause.
    pub fn invalid(message: impl Into<String>) -> Self {
        RequestError::InvalidRequest(Detail::new(message, None))
    }

    /// Client error caused by `source`.
    pub fn invalid_with(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::classified(ErrorClass::InvalidRequest, context, source)
    }

    /// Server error without an underlying cause.
    pub fn internal(message: impl Into<String>) -> Self {
        RequestError::Internal(Detail::new(message, None))
    }

    /// Server error caused by `source`.
    pub fn internal_with(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::classified(ErrorClass::Internal, context, source)
    }

    fn from_detail(class: ErrorClass, detail: Detail) -> Self {
        match class {
            ErrorClass::InvalidRequest => RequestError::InvalidRequest(detail),
            ErrorClass::Internal => RequestError::Internal(detail),
            ErrorClass::Fatal => RequestError::Fatal(detail),
        }
    }

    /// The classification carried by this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            RequestError::InvalidRequest(_) => ErrorClass::InvalidRequest,
            RequestError::Internal(_) => ErrorClass::Internal,
            RequestError::Fatal(_) => ErrorClass::Fatal,
        }
    }

    /// Message without the classification prefix.
    pub fn message(&self) -> String {
        self.detail().to_string()
    }

    /// The context and originating error.
    pub fn detail(&self) -> &Detail {
        match self {
            RequestError::InvalidRequest(d) | RequestError::Internal(d) | RequestError::Fatal(d) => d,
        }
    }
}
