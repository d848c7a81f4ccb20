//! Error types for request attempts.
//!
//! Every failure an attempt can produce is represented by [`Error`]. The
//! variants are fine-grained so nothing is lost for debugging, while
//! [`Error::kind`] collapses them onto the four kinds callers usually branch
//! on: HTTP errors, timeouts, cancellations and everything else.

use crate::Response;
use http::StatusCode;
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Message used for HTTP errors whose body carries no `message` field.
pub const DEFAULT_ERROR_MESSAGE: &str = "Failed to fetch data from server!";

/// The coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The server answered with a non-2xx status.
    Http,
    /// The attempt ran past its configured timeout.
    Timeout,
    /// The attempt was aborted, either by the caller or by a newer duplicate request.
    Cancelled,
    /// Network failures, (de)serialization failures, validator or interceptor failures.
    Transport,
}

impl ErrorKind {
    /// Returns the name used in log events.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Http => "HTTPError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Cancelled => "AbortError",
            ErrorKind::Transport => "TransportError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The main error type for request attempts.
///
/// # Examples
///
/// ```no_run
/// use callkit::{Client, Error, ErrorKind, RequestOptions, ResultMode};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::new()?;
/// let options = RequestOptions::new().result_mode(ResultMode::AllWithException);
///
/// match client.call::<serde_json::Value>("https://api.example.com/users", options).await {
///     Ok(output) => println!("Success: {:?}", output.data()),
///     Err(Error::Http { status, error_data, .. }) => {
///         eprintln!("HTTP error {}: {}", status, error_data);
///     }
///     Err(e) if e.kind() == ErrorKind::Timeout => eprintln!("Timed out: {}", e),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The server returned a non-2xx HTTP status code.
    ///
    /// # Fields
    ///
    /// * `status` - The HTTP status code
    /// * `error_data` - The parsed error body
    /// * `message` - `error_data.message` if present, otherwise the default error message
    /// * `response` - The response that carried the error
    #[error("{message}")]
    Http {
        /// The HTTP status code
        status: StatusCode,
        /// The parsed error body
        error_data: Value,
        /// Human readable message
        message: String,
        /// The response that carried the error
        response: Box<Response>,
    },

    /// The attempt was not finished within the configured timeout.
    #[error("Request timed out after {}ms", timeout.as_millis())]
    Timeout {
        /// The configured timeout
        timeout: Duration,
    },

    /// The attempt was aborted before it finished.
    ///
    /// This covers both an explicit abort through the caller's cancellation
    /// token and supersession by a newer request with the same request key.
    #[error("{reason}")]
    Cancelled {
        /// Why the attempt was aborted
        reason: String,
    },

    /// A network-level error occurred (connection failed, DNS lookup failed, etc.).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to turn the parsed response body into the expected type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    Deserialization {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    Serialization(String),

    /// The configured response validator rejected the success data.
    #[error("Response validation failed: {0}")]
    Validation(String),

    /// An `on_request` or `on_response` interceptor failed.
    #[error("Interceptor failed: {0}")]
    Interceptor(String),

    /// Invalid configuration was provided, such as an invalid header value.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Returns the coarse classification of this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use callkit::{Error, ErrorKind};
    /// use std::time::Duration;
    ///
    /// let err = Error::Timeout { timeout: Duration::from_millis(50) };
    /// assert_eq!(err.kind(), ErrorKind::Timeout);
    /// assert_eq!(err.to_string(), "Request timed out after 50ms");
    ///
    /// let err = Error::Validation("missing id".to_string());
    /// assert_eq!(err.kind(), ErrorKind::Transport);
    /// ```
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Http { .. } => ErrorKind::Http,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Network(_)
            | Error::Deserialization { .. }
            | Error::Serialization(_)
            | Error::Validation(_)
            | Error::Interceptor(_)
            | Error::Configuration(_)
            | Error::InvalidUrl(_) => ErrorKind::Transport,
        }
    }

    /// Returns `true` if this is an HTTP error whose status is in `retry_codes`.
    ///
    /// Only HTTP errors are ever retried automatically; timeouts, cancellations
    /// and transport errors are terminal for a logical call.
    pub fn is_retryable(&self, retry_codes: &std::collections::BTreeSet<u16>) -> bool {
        matches!(self, Error::Http { status, .. } if retry_codes.contains(&status.as_u16()))
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Http { status, .. } => Some(*status),
            Error::Deserialization { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the parsed error body of an HTTP error.
    pub fn error_data(&self) -> Option<&Value> {
        match self {
            Error::Http { error_data, .. } => Some(error_data),
            _ => None,
        }
    }

    /// Returns the response attached to an HTTP error.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Error::Http { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Returns the message without the variant prefix where one exists.
    pub fn message(&self) -> String {
        match self {
            Error::Http { message, .. } => message.clone(),
            Error::Cancelled { reason } => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// A specialized `Result` type for request attempts.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;
    use std::collections::BTreeSet;

    fn http_error(status: u16) -> Error {
        Error::Http {
            status: StatusCode::from_u16(status).unwrap(),
            error_data: serde_json::json!({ "message": "nope" }),
            message: "nope".to_string(),
            response: Box::new(Response::new(
                StatusCode::from_u16(status).unwrap(),
                HeaderMap::new(),
                "http://localhost/",
                None,
            )),
        }
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(http_error(500).kind(), ErrorKind::Http);
        assert_eq!(
            Error::Cancelled {
                reason: "gone".into()
            }
            .kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            Error::Interceptor("boom".into()).kind(),
            ErrorKind::Transport
        );
        assert_eq!(
            Error::Serialization("bad".into()).kind(),
            ErrorKind::Transport
        );
    }

    #[test]
    fn test_retryable_only_for_listed_http_codes() {
        let codes: BTreeSet<u16> = [503].into_iter().collect();
        assert!(http_error(503).is_retryable(&codes));
        assert!(!http_error(500).is_retryable(&codes));
        assert!(!Error::Timeout {
            timeout: Duration::from_millis(10)
        }
        .is_retryable(&codes));
    }

    #[test]
    fn test_http_error_accessors() {
        let err = http_error(404);
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(err.message(), "nope");
        assert_eq!(err.error_data().unwrap()["message"], "nope");
        assert!(err.response().is_some());
    }
}
