//! Protocol error codes and application exceptions.
//!
//! This module provides the error vocabulary shared by every rpcweave client:
//! - [`ErrorCode`]: Canonical numeric status codes carried by application exceptions
//! - [`ApplicationException`]: An exception declared by the remote service's IDL
//! - [`HasStatusCode`]: Capability trait for errors that carry a numeric code

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical status codes carried by application exceptions.
///
/// The numeric values follow HTTP status semantics so that codes survive the
/// hop between RPC services and HTTP edges unchanged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Ok = 200,
    BadRequest = 400,
    Unauthorized = 401,
    PaymentRequired = 402,
    Forbidden = 403,
    NotFound = 404,
    Conflict = 409,
    Gone = 410,
    PreconditionFailed = 412,
    PayloadTooLarge = 413,
    ImATeapot = 418,
    MisdirectedRequest = 421,
    UnprocessableEntity = 422,
    TooEarly = 425,
    TooManyRequests = 429,
    UnavailableForLegalReasons = 451,
    InternalServerError = 500,
    NotImplemented = 501,
    BadGateway = 502,
    ServiceUnavailable = 503,
    Timeout = 504,
    InsufficientStorage = 507,
    LoopDetected = 508,
    UserDefined = 1000,
}

impl ErrorCode {
    const ALL: [ErrorCode; 24] = [
        ErrorCode::Ok,
        ErrorCode::BadRequest,
        ErrorCode::Unauthorized,
        ErrorCode::PaymentRequired,
        ErrorCode::Forbidden,
        ErrorCode::NotFound,
        ErrorCode::Conflict,
        ErrorCode::Gone,
        ErrorCode::PreconditionFailed,
        ErrorCode::PayloadTooLarge,
        ErrorCode::ImATeapot,
        ErrorCode::MisdirectedRequest,
        ErrorCode::UnprocessableEntity,
        ErrorCode::TooEarly,
        ErrorCode::TooManyRequests,
        ErrorCode::UnavailableForLegalReasons,
        ErrorCode::InternalServerError,
        ErrorCode::NotImplemented,
        ErrorCode::BadGateway,
        ErrorCode::ServiceUnavailable,
        ErrorCode::Timeout,
        ErrorCode::InsufficientStorage,
        ErrorCode::LoopDetected,
        ErrorCode::UserDefined,
    ];

    /// Look up the code for a raw numeric value.
    ///
    /// Returns `None` for values outside the canonical set; callers should
    /// still report the raw number.
    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_i32() == value)
    }

    /// The numeric wire value of this code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Get the canonical name of this code (e.g. `NOT_FOUND`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Ok => "OK",
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::PaymentRequired => "PAYMENT_REQUIRED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::Gone => "GONE",
            ErrorCode::PreconditionFailed => "PRECONDITION_FAILED",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::ImATeapot => "IM_A_TEAPOT",
            ErrorCode::MisdirectedRequest => "MISDIRECTED_REQUEST",
            ErrorCode::UnprocessableEntity => "UNPROCESSABLE_ENTITY",
            ErrorCode::TooEarly => "TOO_EARLY",
            ErrorCode::TooManyRequests => "TOO_MANY_REQUESTS",
            ErrorCode::UnavailableForLegalReasons => "UNAVAILABLE_FOR_LEGAL_REASONS",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
            ErrorCode::NotImplemented => "NOT_IMPLEMENTED",
            ErrorCode::BadGateway => "BAD_GATEWAY",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::InsufficientStorage => "INSUFFICIENT_STORAGE",
            ErrorCode::LoopDetected => "LOOP_DETECTED",
            ErrorCode::UserDefined => "USER_DEFINED",
        }
    }

    /// Returns the canonical name for a raw code, or the empty string when the
    /// value is not a known code.
    pub fn name_of(value: i32) -> &'static str {
        Self::from_i32(value).map_or("", |code| code.as_str())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an [`ErrorCode`] from a string fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseCodeError(());

impl fmt::Display for ParseCodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown error code")
    }
}

impl std::error::Error for ParseCodeError {}

impl FromStr for ErrorCode {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str().eq_ignore_ascii_case(s))
            .ok_or(ParseCodeError(()))
    }
}

/// Capability implemented by errors that carry a numeric status code.
///
/// Telemetry uses this instead of matching on concrete error types, so any
/// error hierarchy can opt in.
pub trait HasStatusCode {
    /// The numeric status code, if this error carries one.
    fn status_code(&self) -> Option<i32>;
}

/// An exception declared by the remote service and decoded from a
/// structured result.
///
/// The transport call itself succeeded; the exception is the application's
/// answer. `type_name` is the IDL name of the exception struct and is used as
/// the exception-type metric label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationException {
    /// IDL type name (e.g. `rpcweave.Error`).
    pub type_name: String,
    /// Optional numeric status code.
    #[serde(default)]
    pub code: Option<i32>,
    /// Optional human-readable message.
    #[serde(default)]
    pub message: Option<String>,
    /// Whether the producer considers this exception safe to retry.
    #[serde(default)]
    pub retryable: Option<bool>,
    /// Free-form details.
    #[serde(default)]
    pub details: BTreeMap<String, String>,
    #[serde(skip)]
    described: bool,
}

/// IDL type name used by [`ApplicationException::new`].
pub const DEFAULT_EXCEPTION_TYPE: &str = "rpcweave.Error";

impl ApplicationException {
    /// Create a standard exception with a code and message.
    pub fn new<S: Into<String>>(code: i32, message: S) -> Self {
        Self {
            type_name: DEFAULT_EXCEPTION_TYPE.to_string(),
            code: Some(code),
            message: Some(message.into()),
            retryable: None,
            details: BTreeMap::new(),
            described: false,
        }
    }

    /// Create an exception of a service-specific IDL type without a code.
    pub fn of_type<S: Into<String>>(type_name: S) -> Self {
        Self {
            type_name: type_name.into(),
            code: None,
            message: None,
            retryable: None,
            details: BTreeMap::new(),
            described: false,
        }
    }

    /// Set the message.
    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Set the retryable hint.
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    /// Add a detail entry.
    pub fn with_detail<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Switch the `Display` output to the descriptive form that includes the
    /// code, the retryable hint and the details.
    ///
    /// This only changes how the exception renders; every field is kept.
    pub fn described(mut self) -> Self {
        self.described = true;
        self
    }

    /// Whether [`described`](Self::described) has been applied.
    pub fn is_described(&self) -> bool {
        self.described
    }
}

impl HasStatusCode for ApplicationException {
    fn status_code(&self) -> Option<i32> {
        self.code
    }
}

impl fmt::Display for ApplicationException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.described {
            return write!(f, "{}({})", self.type_name, self.message.as_deref().unwrap_or(""));
        }

        write!(f, "{}: {:?}", self.type_name, self.message.as_deref().unwrap_or(""))?;
        if let Some(code) = self.code {
            write!(f, " (code={code}")?;
            let name = ErrorCode::name_of(code);
            if !name.is_empty() {
                write!(f, " {name}")?;
            }
            f.write_str(")")?;
        }
        if let Some(retryable) = self.retryable {
            write!(f, " (retryable={retryable})")?;
        }
        if !self.details.is_empty() {
            write!(f, " (details={:?})", self.details)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApplicationException {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_lookup() {
        assert_eq!(ErrorCode::from_i32(404), Some(ErrorCode::NotFound));
        assert_eq!(ErrorCode::from_i32(999), None);
        assert_eq!(ErrorCode::name_of(503), "SERVICE_UNAVAILABLE");
        assert_eq!(ErrorCode::name_of(12345), "");
    }

    #[test]
    fn test_error_code_from_str() {
        assert_eq!("NOT_FOUND".parse::<ErrorCode>(), Ok(ErrorCode::NotFound));
        assert_eq!("too_many_requests".parse::<ErrorCode>(), Ok(ErrorCode::TooManyRequests));
        assert!("NOPE".parse::<ErrorCode>().is_err());
    }

    #[test]
    fn test_error_code_serde() {
        let json = serde_json::to_string(&ErrorCode::BadGateway).unwrap();
        assert_eq!(json, "\"BAD_GATEWAY\"");
    }

    #[test]
    fn test_exception_status_code() {
        let exc = ApplicationException::new(404, "missing");
        assert_eq!(exc.status_code(), Some(404));
        assert_eq!(ApplicationException::of_type("svc.Oops").status_code(), None);
    }

    #[test]
    fn test_exception_display() {
        let exc = ApplicationException::new(404, "no such user")
            .with_retryable(false)
            .with_detail("user", "42");
        assert_eq!(exc.to_string(), "rpcweave.Error(no such user)");

        let described = exc.clone().described();
        assert_eq!(
            described.to_string(),
            "rpcweave.Error: \"no such user\" (code=404 NOT_FOUND) (retryable=false) (details={\"user\": \"42\"})"
        );
        // Describing keeps identity.
        assert_eq!(described.code, exc.code);
        assert_eq!(described.details, exc.details);
    }
}
