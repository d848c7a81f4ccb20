//! Buffered HTTP responses and body parsing.
//!
//! A [`Response`] is what a [`Transport`](crate::Transport) hands back: the
//! status line, headers and the fully buffered body. Parsing the body consumes
//! it unless the caller asked for responses to be cloned, in which case the
//! body stays available to interceptors and to the final result.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// How a response body is turned into data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Parse the body as JSON. An empty body parses as `null`.
    #[default]
    Json,
    /// Keep the body as a UTF-8 string.
    Text,
}

/// A caller-supplied body parser that replaces the [`ResponseType`] handling.
#[derive(Clone)]
pub struct ResponseParser(Arc<dyn Fn(&[u8]) -> Result<Value, String> + Send + Sync>);

impl ResponseParser {
    /// Wraps a parsing function.
    pub fn new<F>(parse: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self(Arc::new(parse))
    }

    pub(crate) fn parse(&self, body: &[u8]) -> Result<Value, String> {
        (self.0)(body)
    }
}

impl fmt::Debug for ResponseParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseParser(..)")
    }
}

/// Parses a buffered body according to the configured parser or response type.
pub(crate) fn parse_body(
    body: &[u8],
    response_type: ResponseType,
    parser: Option<&ResponseParser>,
) -> Result<Value, String> {
    if let Some(parser) = parser {
        return parser.parse(body);
    }

    match response_type {
        ResponseType::Json => {
            if body.iter().all(u8::is_ascii_whitespace) {
                return Ok(Value::Null);
            }
            serde_json::from_slice(body).map_err(|e| e.to_string())
        }
        ResponseType::Text => Ok(Value::String(String::from_utf8_lossy(body).into_owned())),
    }
}

/// A buffered HTTP response.
///
/// # Examples
///
/// ```
/// use callkit::Response;
/// use http::{HeaderMap, HeaderValue, StatusCode};
///
/// let mut headers = HeaderMap::new();
/// headers.insert("content-type", HeaderValue::from_static("application/json"));
///
/// let response = Response::new(
///     StatusCode::OK,
///     headers,
///     "https://api.example.com/users",
///     Some(r#"{"id":1}"#.into()),
/// );
///
/// assert!(response.is_success());
/// assert_eq!(response.header("content-type"), Some("application/json"));
/// assert_eq!(response.text().as_deref(), Some(r#"{"id":1}"#));
/// ```
#[derive(Debug, Clone)]
pub struct Response {
    /// The HTTP status code of the response.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The URL the request was sent to.
    pub url: String,

    /// The buffered body, or `None` once it has been consumed by parsing.
    pub body: Option<Bytes>,
}

impl Response {
    /// Creates a new `Response`.
    pub fn new(
        status: StatusCode,
        headers: HeaderMap,
        url: impl Into<String>,
        body: Option<Bytes>,
    ) -> Self {
        Self {
            status,
            headers,
            url: url.into(),
            body,
        }
    }

    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns a reference to a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Returns the body as text, if it has not been consumed.
    pub fn text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
    }

    /// Deserializes the body as JSON, if it has not been consumed.
    pub fn json<T: DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        self.body.as_ref().map(|body| serde_json::from_slice(body))
    }

    /// Splits off the body, leaving a response whose body reads as consumed.
    pub(crate) fn take_body(&mut self) -> Bytes {
        self.body.take().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_parsing_treats_empty_body_as_null() {
        assert_eq!(parse_body(b"", ResponseType::Json, None), Ok(Value::Null));
        assert_eq!(parse_body(b"  \n", ResponseType::Json, None), Ok(Value::Null));
        assert_eq!(
            parse_body(br#"{"a":1}"#, ResponseType::Json, None),
            Ok(serde_json::json!({ "a": 1 }))
        );
        assert!(parse_body(b"not json", ResponseType::Json, None).is_err());
    }

    #[test]
    fn test_text_parsing() {
        assert_eq!(
            parse_body(b"hello", ResponseType::Text, None),
            Ok(Value::String("hello".to_string()))
        );
    }

    #[test]
    fn test_custom_parser_wins() {
        let parser = ResponseParser::new(|body| Ok(Value::from(body.len())));
        assert_eq!(
            parse_body(b"four", ResponseType::Json, Some(&parser)),
            Ok(Value::from(4))
        );
    }

    #[test]
    fn test_take_body_consumes() {
        let mut response = Response::new(
            StatusCode::OK,
            HeaderMap::new(),
            "http://localhost/",
            Some(Bytes::from_static(b"abc")),
        );
        assert_eq!(response.take_body(), Bytes::from_static(b"abc"));
        assert!(response.body.is_none());
        assert!(response.text().is_none());
    }
}
