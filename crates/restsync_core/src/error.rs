//! Error types for models, collections and requests.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Result type for restsync operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while working with models and collections.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The attribute does not exist on the model.
    #[error("attribute \"{attribute}\" not found")]
    AttributeNotFound {
        /// Name of the missing attribute.
        attribute: String,
    },

    /// No model in the collection has the requested primary key.
    #[error("model must be found with {key}: {value}")]
    ModelNotFound {
        /// Primary key attribute name.
        key: String,
        /// Value that was looked up.
        value: Value,
    },

    /// No model in the collection matched the query.
    #[error("model must be found")]
    NoMatch,

    /// Neither the schema nor the owning collection provides a URL.
    #[error("implement `url_root` on the schema or `url` on the collection")]
    MissingUrl,

    /// The model mapper could not translate a payload.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// A payload had an unexpected shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The adapter rejected the request.
    #[error(transparent)]
    Request(#[from] ErrorObject),

    /// The request task ended without settling.
    #[error("request dropped before it settled")]
    Dropped,

    /// A network operation was started outside a Tokio runtime.
    #[error("no Tokio runtime to drive the request")]
    NoRuntime,
}

impl Error {
    /// Returns true for lookup failures (missing attribute or model).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::AttributeNotFound { .. } | Error::ModelNotFound { .. } | Error::NoMatch
        )
    }

    /// Returns the normalized adapter error, if this is one.
    pub fn as_request(&self) -> Option<&ErrorObject> {
        match self {
            Error::Request(object) => Some(object),
            _ => None,
        }
    }
}

/// A failure reported by an [`Adapter`](crate::Adapter).
///
/// Adapters may fail with a native error, a plain message, or a structured
/// payload carrying the raw response.
#[derive(Debug, Clone)]
pub enum AdapterError {
    /// A native error raised by the transport.
    Failure(Arc<dyn std::error::Error + Send + Sync>),
    /// A plain error message.
    Message(String),
    /// A structured error with the response that produced it.
    Response {
        /// Error description or body.
        error: Value,
        /// Raw response, if the transport kept one.
        request_response: Option<Value>,
    },
}

impl AdapterError {
    /// Wraps a native error.
    pub fn failure(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Failure(Arc::new(error))
    }

    /// Creates a message error.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Creates a structured error.
    pub fn response(error: Value, request_response: Option<Value>) -> Self {
        Self::Response {
            error,
            request_response,
        }
    }
}

impl From<String> for AdapterError {
    fn from(message: String) -> Self {
        Self::Message(message)
    }
}

impl From<&str> for AdapterError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

/// What caused a request to fail.
#[derive(Debug, Clone)]
pub enum ErrorCause {
    /// A native transport error.
    Failure(Arc<dyn std::error::Error + Send + Sync>),
    /// A plain message.
    Message(String),
    /// A structured error body.
    Payload(Value),
}

impl ErrorCause {
    /// Returns the message when the cause is a plain message.
    pub fn as_message(&self) -> Option<&str> {
        match self {
            ErrorCause::Message(message) => Some(message),
            _ => None,
        }
    }

    /// Returns the body when the cause is a structured payload.
    pub fn as_payload(&self) -> Option<&Value> {
        match self {
            ErrorCause::Payload(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCause::Failure(error) => write!(f, "{}", error),
            ErrorCause::Message(message) => f.write_str(message),
            ErrorCause::Payload(value) => write!(f, "{}", value),
        }
    }
}

/// Normalized request failure.
///
/// Every adapter failure is converted into this one shape before it
/// reaches the caller.
#[derive(Error, Debug, Clone)]
#[error("request failed: {error}")]
pub struct ErrorObject {
    /// What went wrong.
    pub error: ErrorCause,
    /// Raw response that came with the failure.
    pub request_response: Option<Value>,
    /// Body that was sent with the failed request.
    pub payload: Option<Value>,
}

impl ErrorObject {
    /// Normalizes an adapter failure.
    ///
    /// Native errors are logged as they are wrapped.
    pub fn new(error: AdapterError) -> Self {
        match error {
            AdapterError::Failure(failure) => {
                tracing::error!(error = %failure, "adapter failure");
                Self {
                    error: ErrorCause::Failure(failure),
                    request_response: None,
                    payload: None,
                }
            }
            AdapterError::Message(message) => Self {
                error: ErrorCause::Message(message),
                request_response: None,
                payload: None,
            },
            AdapterError::Response {
                error,
                request_response,
            } => Self {
                error: ErrorCause::Payload(error),
                request_response,
                payload: None,
            },
        }
    }

    /// Attaches the request body that was sent.
    #[must_use]
    pub fn with_payload(mut self, payload: Option<Value>) -> Self {
        self.payload = payload;
        self
    }
}

impl From<AdapterError> for ErrorObject {
    fn from(error: AdapterError) -> Self {
        Self::new(error)
    }
}

impl From<AdapterError> for Error {
    fn from(error: AdapterError) -> Self {
        Error::Request(ErrorObject::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalizes_message() {
        let object = ErrorObject::from(AdapterError::from("Conflict"));
        assert_eq!(object.error.as_message(), Some("Conflict"));
        assert!(object.request_response.is_none());
        assert_eq!(object.to_string(), "request failed: Conflict");
    }

    #[test]
    fn normalizes_native_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let object = ErrorObject::from(AdapterError::failure(io));
        assert!(matches!(object.error, ErrorCause::Failure(_)));
        assert!(object.request_response.is_none());
        assert!(object.to_string().contains("socket closed"));
    }

    #[test]
    fn normalizes_structured_error() {
        let object = ErrorObject::from(AdapterError::response(
            json!({"phone": ["invalid"]}),
            Some(json!({"status": 422})),
        ))
        .with_payload(Some(json!({"phone": "x"})));

        assert_eq!(object.error.as_payload(), Some(&json!({"phone": ["invalid"]})));
        assert_eq!(object.request_response, Some(json!({"status": 422})));
        assert_eq!(object.payload, Some(json!({"phone": "x"})));
    }

    #[test]
    fn classification() {
        assert!(Error::NoMatch.is_not_found());
        assert!(Error::AttributeNotFound {
            attribute: "x".into()
        }
        .is_not_found());
        assert!(!Error::MissingUrl.is_not_found());

        let err = Error::from(AdapterError::message("boom"));
        assert!(err.as_request().is_some());
        assert_eq!(err.to_string(), "request failed: boom");
    }
}
