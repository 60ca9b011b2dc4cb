//! Normalizes call results into the labels telemetry reports.

use rpcweave_core::{ErrorCode, HasStatusCode};

use crate::ClientError;
use crate::interceptor::UnaryResult;

/// What telemetry needs to know about a finished call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Classification {
    /// The call's error, including an exception carried by a successful
    /// response.
    pub error: Option<ClientError>,
    /// Type label of the error, empty on success.
    pub exception_type: String,
    /// Numeric status code as a string (e.g. `"404"`), empty when the error
    /// carries no code.
    pub status_code: String,
    /// Canonical code name (e.g. `"NOT_FOUND"`), empty when unknown.
    pub status_name: String,
}

impl Classification {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Turn an exception carried by a successful response into an error.
pub fn extract(result: UnaryResult) -> UnaryResult {
    match result {
        Ok(mut response) => match response.exception.take() {
            Some(exception) => Err(ClientError::Application(exception)),
            None => Ok(response),
        },
        Err(error) => Err(error),
    }
}

/// Classify a call result.
pub fn classify(result: &UnaryResult) -> Classification {
    let error = match result {
        Ok(response) => response.exception.clone().map(ClientError::Application),
        Err(error) => Some(error.clone()),
    };
    let Some(error) = error else {
        return Classification::default();
    };

    let (status_code, status_name) = match error.status_code() {
        Some(code) => (code.to_string(), ErrorCode::name_of(code).to_string()),
        None => (String::new(), String::new()),
    };
    Classification {
        exception_type: error.type_label().to_string(),
        status_code,
        status_name,
        error: Some(error),
    }
}
