//! Client-side error types.
//!
//! This module provides [`ClientError`], the error type for every call that
//! goes through an rpcweave pipeline, and [`ContextError`] for calls whose
//! context expired before or while they ran.

use rpcweave_core::{ApplicationException, HasStatusCode, HeaderError};

/// The call's context is done.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The context deadline passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The context was cancelled.
    #[error("context canceled")]
    Canceled,
}

/// Client-side error variants.
///
/// Errors injected by the fault middleware are ordinary values of this type
/// and cannot be told apart from real upstream failures.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// The call's deadline passed or it was cancelled. Never retried.
    #[error(transparent)]
    ContextExpired(#[from] ContextError),

    /// Transport-level failure (connection refused, reset, etc.).
    ///
    /// `retryable` is set by the producer when it knows whether the call is
    /// safe to repeat; `None` leaves the decision to the retry filters.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        retryable: Option<bool>,
    },

    /// No connection could be taken from the client pool.
    #[error("client pool exhausted")]
    PoolExhausted,

    /// The remote service answered with an exception declared in its IDL.
    #[error("{0}")]
    Application(ApplicationException),

    /// The circuit breaker rejected the call without reaching the transport.
    #[error("circuit breaker open: {0}")]
    CircuitOpen(String),

    /// Protocol error (malformed frames, unexpected data, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An outgoing header could not be written.
    #[error(transparent)]
    Header(#[from] HeaderError),
}

impl ClientError {
    /// Create a transport error with no retry hint.
    pub fn transport<S: Into<String>>(message: S) -> Self {
        ClientError::Transport {
            message: message.into(),
            retryable: None,
        }
    }

    /// Create a transport error the producer knows is safe to retry.
    pub fn retryable_transport<S: Into<String>>(message: S) -> Self {
        ClientError::Transport {
            message: message.into(),
            retryable: Some(true),
        }
    }

    /// Create an application exception error with a code and message.
    pub fn application<S: Into<String>>(code: i32, message: S) -> Self {
        ClientError::Application(ApplicationException::new(code, message))
    }

    /// The retry hint attached by the error's producer.
    ///
    /// - `Some(true)`: the producer marked the error retryable (pool exhaustion is always retryable)
    /// - `Some(false)`: the producer marked it unsafe to retry
    /// - `None`: no opinion; the retry filters decide
    pub fn retryable(&self) -> Option<bool> {
        match self {
            ClientError::Transport { retryable, .. } => *retryable,
            ClientError::PoolExhausted => Some(true),
            ClientError::Application(exception) => exception.retryable,
            ClientError::ContextExpired(_)
            | ClientError::CircuitOpen(_)
            | ClientError::Protocol(_)
            | ClientError::Header(_) => None,
        }
    }

    /// Returns whether this error comes from the call's context being done.
    pub fn is_context_error(&self) -> bool {
        matches!(self, ClientError::ContextExpired(_))
    }

    /// The application exception, if this error is one.
    pub fn exception(&self) -> Option<&ApplicationException> {
        match self {
            ClientError::Application(exception) => Some(exception),
            _ => None,
        }
    }

    /// Human-readable type label used for the exception-type metric.
    pub fn type_label(&self) -> &str {
        match self {
            ClientError::ContextExpired(ContextError::DeadlineExceeded) => "DeadlineExceeded",
            ClientError::ContextExpired(ContextError::Canceled) => "Canceled",
            ClientError::Transport { .. } => "TransportError",
            ClientError::PoolExhausted => "PoolExhausted",
            ClientError::Application(exception) => &exception.type_name,
            ClientError::CircuitOpen(_) => "CircuitOpen",
            ClientError::Protocol(_) => "ProtocolError",
            ClientError::Header(_) => "HeaderError",
        }
    }
}

impl HasStatusCode for ClientError {
    fn status_code(&self) -> Option<i32> {
        self.exception().and_then(HasStatusCode::status_code)
    }
}

impl From<ApplicationException> for ClientError {
    fn from(exception: ApplicationException) -> Self {
        ClientError::Application(exception)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_hints() {
        assert_eq!(ClientError::transport("reset").retryable(), None);
        assert_eq!(ClientError::retryable_transport("reset").retryable(), Some(true));
        assert_eq!(ClientError::PoolExhausted.retryable(), Some(true));
        assert_eq!(
            ClientError::from(ContextError::DeadlineExceeded).retryable(),
            None
        );

        let exc = ApplicationException::new(503, "busy").with_retryable(false);
        assert_eq!(ClientError::from(exc).retryable(), Some(false));
    }

    #[test]
    fn test_context_error() {
        let err: ClientError = ContextError::Canceled.into();
        assert!(err.is_context_error());
        assert_eq!(err.to_string(), "context canceled");
        assert!(!ClientError::PoolExhausted.is_context_error());
    }

    #[test]
    fn test_type_label() {
        assert_eq!(ClientError::application(404, "x").type_label(), "rpcweave.Error");
        assert_eq!(
            ClientError::Application(ApplicationException::of_type("users.UserBanned"))
                .type_label(),
            "users.UserBanned"
        );
        assert_eq!(ClientError::transport("x").type_label(), "TransportError");
        assert_eq!(
            ClientError::from(ContextError::DeadlineExceeded).type_label(),
            "DeadlineExceeded"
        );
    }

    #[test]
    fn test_status_code_capability() {
        assert_eq!(ClientError::application(404, "x").status_code(), Some(404));
        assert_eq!(ClientError::transport("x").status_code(), None);
        assert_eq!(
            ClientError::Application(ApplicationException::of_type("svc.E")).status_code(),
            None
        );
    }
}
