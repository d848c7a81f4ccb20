//! Request options and the config merger.
//!
//! [`RequestOptions`] holds every recognised option as an `Option<_>`, so the
//! same type serves as a client's base configuration and as per-call
//! configuration. [`EffectiveOptions::resolve`] merges the two field by field
//! (per-call wins, then base, then the hardcoded default) and prepares the
//! body and headers for one attempt.

use crate::interceptor::{Interceptor, Interceptors};
use crate::response::{ResponseParser, ResponseType};
use crate::result::ResultMode;
use crate::retry::{default_retry_codes, default_retry_methods, RetryDelay, RetryPolicy};
use crate::transport::Request;
use crate::{Error, Result};
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const JSON_MIME: &str = "application/json";
const FORM_MIME: &str = "application/x-www-form-urlencoded";

/// A request body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// A structured value, serialized through the configured [`BodySerializer`].
    Json(Value),
    /// A string sent as-is. Strings containing `=` are sent as form data.
    Text(String),
    /// Raw bytes sent as-is.
    Bytes(Bytes),
}

impl Body {
    fn is_structured(&self) -> bool {
        matches!(self, Body::Json(_))
    }

    fn is_query_string(&self) -> bool {
        matches!(self, Body::Text(text) if text.contains('='))
    }
}

/// Credentials turned into an `Authorization` header.
///
/// A plain string converts into a bearer token.
///
/// # Examples
///
/// ```
/// use callkit::Auth;
///
/// assert_eq!(Auth::from("abc").header_value(), "Bearer abc");
/// assert_eq!(Auth::Token("xyz".to_string()).header_value(), "Token xyz");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `Authorization: Token <token>`
    Token(String),
}

impl Auth {
    /// Returns the `Authorization` header value.
    pub fn header_value(&self) -> String {
        match self {
            Auth::Bearer(token) => format!("Bearer {token}"),
            Auth::Token(token) => format!("Token {token}"),
        }
    }
}

impl From<&str> for Auth {
    fn from(token: &str) -> Self {
        Auth::Bearer(token.to_string())
    }
}

impl From<String> for Auth {
    fn from(token: String) -> Self {
        Auth::Bearer(token)
    }
}

/// What happens when a request starts while another one with the same
/// request key is still in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DedupeStrategy {
    /// Abort the earlier request. Its caller observes a cancellation.
    #[default]
    Cancel,
    /// Let both requests run.
    None,
}

impl DedupeStrategy {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            DedupeStrategy::Cancel => "cancel",
            DedupeStrategy::None => "none",
        }
    }
}

/// Turns a structured body into the string sent on the wire.
#[derive(Clone)]
pub struct BodySerializer(Arc<dyn Fn(&Value) -> std::result::Result<String, String> + Send + Sync>);

impl BodySerializer {
    /// Wraps a serializing function.
    pub fn new<F>(serialize: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<String, String> + Send + Sync + 'static,
    {
        Self(Arc::new(serialize))
    }

    fn serialize(&self, value: &Value) -> std::result::Result<String, String> {
        (self.0)(value)
    }
}

impl Default for BodySerializer {
    fn default() -> Self {
        Self::new(|value| serde_json::to_string(value).map_err(|e| e.to_string()))
    }
}

impl fmt::Debug for BodySerializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BodySerializer(..)")
    }
}

/// Checks, and may transform, parsed success data before it reaches the caller.
#[derive(Clone)]
pub struct ResponseValidator(Arc<dyn Fn(Value) -> std::result::Result<Value, String> + Send + Sync>);

impl ResponseValidator {
    /// Wraps a validating function.
    pub fn new<F>(validate: F) -> Self
    where
        F: Fn(Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self(Arc::new(validate))
    }

    pub(crate) fn validate(&self, data: Value) -> Result<Value> {
        (self.0)(data).map_err(Error::Validation)
    }
}

impl fmt::Debug for ResponseValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseValidator(..)")
    }
}

/// Options for a client or a single call.
///
/// Unset fields fall back to the client's base options, then to the
/// defaults: `GET`, no retries, zero retry delay, JSON responses, duplicate
/// cancellation, JSON body serialization and the combined result mode.
///
/// # Examples
///
/// ```
/// use callkit::{RequestOptions, ResultMode};
/// use http::Method;
/// use std::time::Duration;
///
/// let options = RequestOptions::new()
///     .method(Method::POST)
///     .json(&serde_json::json!({ "name": "Alice" }))
///     .unwrap()
///     .query("notify", "true")
///     .timeout(Duration::from_secs(5))
///     .retries(2)
///     .retry_codes([503])
///     .result_mode(ResultMode::AllWithException);
/// ```
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub(crate) method: Option<Method>,
    pub(crate) headers: Option<HeaderMap>,
    pub(crate) body: Option<Body>,
    pub(crate) params: Option<BTreeMap<String, String>>,
    pub(crate) query: Option<BTreeMap<String, String>>,
    pub(crate) base_url: Option<String>,
    pub(crate) auth: Option<Auth>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retries: Option<usize>,
    pub(crate) retry_delay: Option<RetryDelay>,
    pub(crate) retry_codes: Option<BTreeSet<u16>>,
    pub(crate) retry_methods: Option<Vec<Method>>,
    pub(crate) dedupe_strategy: Option<DedupeStrategy>,
    pub(crate) cancel_redundant_requests: Option<bool>,
    pub(crate) response_type: Option<ResponseType>,
    pub(crate) response_parser: Option<ResponseParser>,
    pub(crate) response_validator: Option<ResponseValidator>,
    pub(crate) body_serializer: Option<BodySerializer>,
    pub(crate) clone_response: Option<bool>,
    pub(crate) result_mode: Option<ResultMode>,
    pub(crate) default_error_message: Option<String>,
    pub(crate) interceptors: Interceptors,
    pub(crate) signal: Option<CancellationToken>,
}

impl RequestOptions {
    /// Creates an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.headers
            .get_or_insert_with(HeaderMap::new)
            .insert(name, value);
        Ok(self)
    }

    /// Replaces all headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a structured body from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be represented as JSON.
    pub fn json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self> {
        let value =
            serde_json::to_value(body).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(self.body(Body::Json(value)))
    }

    /// Sets a string body.
    pub fn text(self, body: impl Into<String>) -> Self {
        self.body(Body::Text(body.into()))
    }

    /// Sets a raw byte body.
    pub fn bytes(self, body: impl Into<Bytes>) -> Self {
        self.body(Body::Bytes(body.into()))
    }

    /// Adds a path parameter that replaces the `:name` segment of the URL.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    /// Adds a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Sets the prefix every request URL is appended to.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the credentials sent in the `Authorization` header.
    pub fn auth(mut self, auth: impl Into<Auth>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    /// Sets the per-attempt timeout. A zero duration disables the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets how many times a retryable failure is retried.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Sets the delay before each retry.
    pub fn retry_delay(mut self, delay: impl Into<RetryDelay>) -> Self {
        self.retry_delay = Some(delay.into());
        self
    }

    /// Sets the statuses that may be retried.
    pub fn retry_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_codes = Some(codes.into_iter().collect());
        self
    }

    /// Sets the methods that may be retried.
    pub fn retry_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.retry_methods = Some(methods.into_iter().collect());
        self
    }

    /// Sets the duplicate-request strategy.
    pub fn dedupe_strategy(mut self, strategy: DedupeStrategy) -> Self {
        self.dedupe_strategy = Some(strategy);
        self
    }

    /// Legacy switch for cancelling duplicate requests.
    ///
    /// Duplicates are cancelled when either this flag is `true` or the
    /// dedupe strategy is [`DedupeStrategy::Cancel`].
    #[deprecated(note = "use `dedupe_strategy` instead")]
    pub fn cancel_redundant_requests(mut self, cancel: bool) -> Self {
        self.cancel_redundant_requests = Some(cancel);
        self
    }

    /// Sets how response bodies are parsed.
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    /// Sets a custom body parser, overriding the response type.
    pub fn response_parser<F>(mut self, parse: F) -> Self
    where
        F: Fn(&[u8]) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.response_parser = Some(ResponseParser::new(parse));
        self
    }

    /// Sets a validator that runs on success data.
    pub fn response_validator<F>(mut self, validate: F) -> Self
    where
        F: Fn(Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.response_validator = Some(ResponseValidator::new(validate));
        self
    }

    /// Sets the serializer for structured bodies.
    pub fn body_serializer<F>(mut self, serialize: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<String, String> + Send + Sync + 'static,
    {
        self.body_serializer = Some(BodySerializer::new(serialize));
        self
    }

    /// Keeps response bodies readable after parsing.
    pub fn clone_response(mut self, clone: bool) -> Self {
        self.clone_response = Some(clone);
        self
    }

    /// Sets the shape of the returned result.
    pub fn result_mode(mut self, mode: ResultMode) -> Self {
        self.result_mode = Some(mode);
        self
    }

    /// Sets the message used for HTTP errors whose body carries none.
    pub fn default_error_message(mut self, message: impl Into<String>) -> Self {
        self.default_error_message = Some(message.into());
        self
    }

    /// Uses `interceptor` for every lifecycle method.
    pub fn interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors = Interceptors::all(Arc::new(interceptor));
        self
    }

    /// Uses `interceptor` for `on_request` only.
    pub fn on_request(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.on_request = Some(Arc::new(interceptor));
        self
    }

    /// Uses `interceptor` for `on_response` only.
    pub fn on_response(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.on_response = Some(Arc::new(interceptor));
        self
    }

    /// Uses `interceptor` for `on_response_error` only.
    pub fn on_response_error(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.on_response_error = Some(Arc::new(interceptor));
        self
    }

    /// Uses `interceptor` for `on_request_error` only.
    pub fn on_request_error(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.on_request_error = Some(Arc::new(interceptor));
        self
    }

    /// Uses `interceptor` for `on_error` only.
    pub fn on_error(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.on_error = Some(Arc::new(interceptor));
        self
    }

    /// Sets an external cancellation token.
    pub fn signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Layers `overrides` on top of `self`.
    ///
    /// Every field set in `overrides` wins. Headers are combined by name,
    /// with `overrides` replacing same-named base headers.
    ///
    /// # Examples
    ///
    /// ```
    /// use callkit::RequestOptions;
    /// use std::time::Duration;
    ///
    /// let base = RequestOptions::new().retries(3).timeout(Duration::from_secs(1));
    /// let call = RequestOptions::new().retries(1);
    ///
    /// let merged = base.merged_with(&call);
    /// assert_eq!(merged.get_retries(), Some(1));
    /// assert_eq!(merged.get_timeout(), Some(Duration::from_secs(1)));
    /// ```
    pub fn merged_with(&self, overrides: &RequestOptions) -> RequestOptions {
        fn pick<T: Clone>(over: &Option<T>, base: &Option<T>) -> Option<T> {
            over.as_ref().or(base.as_ref()).cloned()
        }

        let headers = match (&self.headers, &overrides.headers) {
            (Some(base), Some(over)) => {
                let mut headers = base.clone();
                merge_headers(&mut headers, over);
                Some(headers)
            }
            (base, over) => pick(over, base),
        };

        RequestOptions {
            method: pick(&overrides.method, &self.method),
            headers,
            body: pick(&overrides.body, &self.body),
            params: pick(&overrides.params, &self.params),
            query: pick(&overrides.query, &self.query),
            base_url: pick(&overrides.base_url, &self.base_url),
            auth: pick(&overrides.auth, &self.auth),
            timeout: pick(&overrides.timeout, &self.timeout),
            retries: pick(&overrides.retries, &self.retries),
            retry_delay: pick(&overrides.retry_delay, &self.retry_delay),
            retry_codes: pick(&overrides.retry_codes, &self.retry_codes),
            retry_methods: pick(&overrides.retry_methods, &self.retry_methods),
            dedupe_strategy: pick(&overrides.dedupe_strategy, &self.dedupe_strategy),
            cancel_redundant_requests: pick(
                &overrides.cancel_redundant_requests,
                &self.cancel_redundant_requests,
            ),
            response_type: pick(&overrides.response_type, &self.response_type),
            response_parser: pick(&overrides.response_parser, &self.response_parser),
            response_validator: pick(&overrides.response_validator, &self.response_validator),
            body_serializer: pick(&overrides.body_serializer, &self.body_serializer),
            clone_response: pick(&overrides.clone_response, &self.clone_response),
            result_mode: pick(&overrides.result_mode, &self.result_mode),
            default_error_message: pick(
                &overrides.default_error_message,
                &self.default_error_message,
            ),
            interceptors: self.interceptors.merged_with(&overrides.interceptors),
            signal: pick(&overrides.signal, &self.signal),
        }
    }

    /// Returns the configured retry count, if set.
    pub fn get_retries(&self) -> Option<usize> {
        self.retries
    }

    /// Returns the configured timeout, if set.
    pub fn get_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the configured result mode, if set.
    pub fn get_result_mode(&self) -> Option<ResultMode> {
        self.result_mode
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("params", &self.params)
            .field("query", &self.query)
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("retry_codes", &self.retry_codes)
            .field("retry_methods", &self.retry_methods)
            .field("dedupe_strategy", &self.dedupe_strategy)
            .field("response_type", &self.response_type)
            .field("clone_response", &self.clone_response)
            .field("result_mode", &self.result_mode)
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}

/// Replaces every header of `target` that `other` also sets.
fn merge_headers(target: &mut HeaderMap, other: &HeaderMap) {
    for name in other.keys() {
        target.remove(name);
        for value in other.get_all(name) {
            target.append(name.clone(), value.clone());
        }
    }
}

/// The fully merged options for one attempt.
#[derive(Clone)]
pub struct EffectiveOptions {
    /// The HTTP method.
    pub method: Method,
    /// Headers to send, or `None` to let the transport choose them.
    pub headers: Option<HeaderMap>,
    /// The serialized body.
    pub body: Option<Bytes>,
    /// Path parameters.
    pub params: BTreeMap<String, String>,
    /// Query parameters.
    pub query: BTreeMap<String, String>,
    /// Prefix for request URLs.
    pub base_url: String,
    /// Credentials, if any.
    pub auth: Option<Auth>,
    /// Per-attempt timeout. `None` when unset or zero.
    pub timeout: Option<Duration>,
    /// Retry budget, delay and eligibility sets.
    pub retry: RetryPolicy,
    /// Duplicate-request strategy.
    pub dedupe_strategy: DedupeStrategy,
    /// Legacy duplicate-cancellation switch.
    pub cancel_redundant_requests: bool,
    /// How response bodies are parsed.
    pub response_type: ResponseType,
    /// Custom body parser.
    pub response_parser: Option<ResponseParser>,
    /// Success data validator.
    pub response_validator: Option<ResponseValidator>,
    /// Whether responses keep their body after parsing.
    pub clone_response: bool,
    /// Shape of the returned result.
    pub result_mode: ResultMode,
    /// Message for HTTP errors whose body carries none.
    pub default_error_message: String,
    /// Lifecycle interceptors, one slot per method.
    pub interceptors: Interceptors,
    /// External cancellation token.
    pub signal: Option<CancellationToken>,
}

impl EffectiveOptions {
    /// Merges base and per-call options and applies defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized or the credentials
    /// do not form a valid header value.
    pub fn resolve(base: &RequestOptions, call: &RequestOptions) -> Result<Self> {
        match Self::prepare(base, call) {
            (_, Some(error)) => Err(error),
            (options, None) => Ok(options),
        }
    }

    /// Like [`resolve`](Self::resolve), but always yields options.
    ///
    /// Headers or a body that fail to build are left out and the first
    /// failure is returned alongside, so it can be reported against a
    /// bodiless request.
    pub(crate) fn prepare(base: &RequestOptions, call: &RequestOptions) -> (Self, Option<Error>) {
        let merged = base.merged_with(call);
        let mut failure = None;

        let headers = match build_headers(&merged) {
            Ok(headers) => headers,
            Err(error) => {
                failure = Some(error);
                None
            }
        };

        let body = match serialize_body(&merged) {
            Ok(body) => body,
            Err(error) => {
                failure.get_or_insert(error);
                None
            }
        };

        let options = Self {
            method: merged.method.unwrap_or(Method::GET),
            headers,
            body,
            params: merged.params.unwrap_or_default(),
            query: merged.query.unwrap_or_default(),
            base_url: merged.base_url.unwrap_or_default(),
            auth: merged.auth,
            timeout: merged.timeout.filter(|timeout| !timeout.is_zero()),
            retry: RetryPolicy {
                retries: merged.retries.unwrap_or(0),
                delay: merged.retry_delay.unwrap_or_default(),
                codes: merged.retry_codes.unwrap_or_else(default_retry_codes),
                methods: merged.retry_methods.unwrap_or_else(default_retry_methods),
            },
            dedupe_strategy: merged.dedupe_strategy.unwrap_or_default(),
            cancel_redundant_requests: merged.cancel_redundant_requests.unwrap_or(false),
            response_type: merged.response_type.unwrap_or_default(),
            response_parser: merged.response_parser,
            response_validator: merged.response_validator,
            clone_response: merged.clone_response.unwrap_or(false),
            result_mode: merged.result_mode.unwrap_or_default(),
            default_error_message: merged
                .default_error_message
                .unwrap_or_else(|| crate::error::DEFAULT_ERROR_MESSAGE.to_string()),
            interceptors: merged.interceptors,
            signal: merged.signal,
        };

        (options, failure)
    }

    /// Returns `true` if a new request should abort an in-flight duplicate.
    pub fn cancels_duplicates(&self) -> bool {
        self.dedupe_strategy == DedupeStrategy::Cancel || self.cancel_redundant_requests
    }

    /// Builds the final URL: base URL, path parameters substituted, query appended.
    ///
    /// # Examples
    ///
    /// ```
    /// use callkit::{EffectiveOptions, RequestOptions};
    ///
    /// let base = RequestOptions::new().base_url("https://api.example.com");
    /// let call = RequestOptions::new().param("id", "42").query("expand", "team");
    /// let options = EffectiveOptions::resolve(&base, &call).unwrap();
    ///
    /// assert_eq!(
    ///     options.full_url("/users/:id"),
    ///     "https://api.example.com/users/42?expand=team"
    /// );
    /// ```
    pub fn full_url(&self, url: &str) -> String {
        let path = substitute_params(url, &self.params);

        let mut full = if self.base_url.ends_with('/') && path.starts_with('/') {
            format!("{}{}", self.base_url, &path[1..])
        } else {
            format!("{}{}", self.base_url, path)
        };

        if !self.query.is_empty() {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in &self.query {
                serializer.append_pair(key, value);
            }
            full.push(if full.contains('?') { '&' } else { '?' });
            full.push_str(&serializer.finish());
        }

        full
    }

    /// Builds the request handed to the transport.
    pub(crate) fn request(&self, url: &str) -> Request {
        Request {
            method: self.method.clone(),
            url: self.full_url(url),
            headers: self.headers.clone().unwrap_or_default(),
            body: self.body.clone(),
        }
    }
}

impl fmt::Debug for EffectiveOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectiveOptions")
            .field("method", &self.method)
            .field("headers", &self.headers)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .field("dedupe_strategy", &self.dedupe_strategy)
            .field("response_type", &self.response_type)
            .field("result_mode", &self.result_mode)
            .finish_non_exhaustive()
    }
}

/// Headers are only attached when explicit headers, credentials or a
/// structured body ask for them.
fn build_headers(options: &RequestOptions) -> Result<Option<HeaderMap>> {
    let structured = options.body.as_ref().is_some_and(Body::is_structured);

    if options.headers.is_none() && options.auth.is_none() && !structured {
        return Ok(None);
    }

    let mut headers = HeaderMap::new();

    if structured {
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_MIME));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_MIME));
    }

    if options.body.as_ref().is_some_and(Body::is_query_string) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_MIME));
    }

    if let Some(auth) = &options.auth {
        let value = HeaderValue::try_from(auth.header_value())
            .map_err(|e| Error::Configuration(format!("Invalid auth header: {}", e)))?;
        headers.insert(AUTHORIZATION, value);
    }

    if let Some(explicit) = &options.headers {
        merge_headers(&mut headers, explicit);
    }

    Ok(Some(headers))
}

fn serialize_body(options: &RequestOptions) -> Result<Option<Bytes>> {
    match &options.body {
        Some(Body::Json(value)) => {
            let serializer = options.body_serializer.clone().unwrap_or_default();
            let text = serializer.serialize(value).map_err(Error::Serialization)?;
            Ok(Some(Bytes::from(text)))
        }
        Some(Body::Text(text)) => Ok(Some(Bytes::from(text.clone()))),
        Some(Body::Bytes(bytes)) => Ok(Some(bytes.clone())),
        None => Ok(None),
    }
}

fn substitute_params(url: &str, params: &BTreeMap<String, String>) -> String {
    if params.is_empty() {
        return url.to_string();
    }

    url.split('/')
        .map(|segment| {
            segment
                .strip_prefix(':')
                .and_then(|name| params.get(name))
                .map_or_else(|| segment.to_string(), |value| encode_segment(value))
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-encodes a path segment value. Spaces become `%20`, not `+`.
fn encode_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(base: RequestOptions, call: RequestOptions) -> EffectiveOptions {
        EffectiveOptions::resolve(&base, &call).unwrap()
    }

    #[test]
    fn test_defaults() {
        let options = resolve(RequestOptions::new(), RequestOptions::new());

        assert_eq!(options.method, Method::GET);
        assert_eq!(options.retry.retries, 0);
        assert_eq!(options.retry.delay.delay_for_retry(1), Duration::ZERO);
        assert_eq!(options.response_type, ResponseType::Json);
        assert_eq!(options.dedupe_strategy, DedupeStrategy::Cancel);
        assert_eq!(options.result_mode, ResultMode::All);
        assert_eq!(
            options.default_error_message,
            "Failed to fetch data from server!"
        );
        assert!(options.headers.is_none());
        assert!(options.timeout.is_none());
        assert!(options.cancels_duplicates());
    }

    #[test]
    fn test_per_call_overrides_base() {
        let base = RequestOptions::new()
            .method(Method::POST)
            .retries(3)
            .timeout(Duration::from_secs(2));
        let call = RequestOptions::new().retries(1);

        let options = resolve(base, call);
        assert_eq!(options.method, Method::POST);
        assert_eq!(options.retry.retries, 1);
        assert_eq!(options.timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_zero_timeout_disables_timeout() {
        let options = resolve(
            RequestOptions::new().timeout(Duration::ZERO),
            RequestOptions::new(),
        );
        assert!(options.timeout.is_none());
    }

    #[test]
    fn test_base_bearer_auth() {
        let options = resolve(RequestOptions::new().auth("abc"), RequestOptions::new());
        let headers = options.headers.unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
    }

    #[test]
    fn test_token_auth_overrides_base_bearer() {
        let options = resolve(
            RequestOptions::new().auth("abc"),
            RequestOptions::new().auth(Auth::Token("xyz".into())),
        );
        let headers = options.headers.unwrap();
        assert_eq!(headers.get_all(AUTHORIZATION).iter().count(), 1);
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Token xyz");
    }

    #[test]
    fn test_structured_body_adds_json_headers() {
        let options = resolve(
            RequestOptions::new(),
            RequestOptions::new()
                .json(&serde_json::json!({ "a": 1 }))
                .unwrap(),
        );
        let headers = options.headers.unwrap();
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), JSON_MIME);
        assert_eq!(headers.get(ACCEPT).unwrap(), JSON_MIME);
        assert_eq!(options.body.unwrap(), Bytes::from_static(br#"{"a":1}"#));
    }

    #[test]
    fn test_raw_body_leaves_headers_unset() {
        let options = resolve(
            RequestOptions::new(),
            RequestOptions::new().bytes(Bytes::from_static(b"\x00\x01")),
        );
        assert!(options.headers.is_none());

        let options = resolve(RequestOptions::new(), RequestOptions::new().text("plain"));
        assert!(options.headers.is_none());
    }

    #[test]
    fn test_query_string_body_is_form_encoded_when_headers_exist() {
        let options = resolve(
            RequestOptions::new().auth("abc"),
            RequestOptions::new().text("a=1&b=2"),
        );
        assert_eq!(
            options.headers.unwrap().get(CONTENT_TYPE).unwrap(),
            FORM_MIME
        );
    }

    #[test]
    fn test_explicit_headers_win_and_combine() {
        let base = RequestOptions::new()
            .header("x-base", "1")
            .unwrap()
            .header("content-type", "text/plain")
            .unwrap();
        let call = RequestOptions::new()
            .json(&serde_json::json!([1, 2]))
            .unwrap()
            .header("x-call", "2")
            .unwrap();

        let headers = resolve(base, call).headers.unwrap();
        assert_eq!(headers.get("x-base").unwrap(), "1");
        assert_eq!(headers.get("x-call").unwrap(), "2");
        assert_eq!(headers.get(CONTENT_TYPE).unwrap(), "text/plain");
    }

    #[test]
    fn test_custom_serializer_and_failure() {
        let options = resolve(
            RequestOptions::new().body_serializer(|_| Ok("custom".to_string())),
            RequestOptions::new().json(&serde_json::json!({})).unwrap(),
        );
        assert_eq!(options.body.unwrap(), Bytes::from_static(b"custom"));

        let result = EffectiveOptions::resolve(
            &RequestOptions::new().body_serializer(|_| Err("nope".to_string())),
            &RequestOptions::new().json(&serde_json::json!({})).unwrap(),
        );
        assert!(matches!(result, Err(Error::Serialization(message)) if message == "nope"));
    }

    #[test]
    #[allow(deprecated)]
    fn test_legacy_flag_triggers_cancellation() {
        let options = resolve(
            RequestOptions::new().dedupe_strategy(DedupeStrategy::None),
            RequestOptions::new(),
        );
        assert!(!options.cancels_duplicates());

        let options = resolve(
            RequestOptions::new().dedupe_strategy(DedupeStrategy::None),
            RequestOptions::new().cancel_redundant_requests(true),
        );
        assert!(options.cancels_duplicates());
    }

    #[test]
    fn test_full_url() {
        let options = resolve(
            RequestOptions::new().base_url("http://localhost:8080/"),
            RequestOptions::new()
                .param("org", "acme")
                .param("id", "7")
                .query("q", "a b")
                .query("page", "2"),
        );

        assert_eq!(
            options.full_url("/orgs/:org/users/:id"),
            "http://localhost:8080/orgs/acme/users/7?page=2&q=a+b"
        );
        assert_eq!(
            options.full_url("/search?sort=asc"),
            "http://localhost:8080/search?sort=asc&page=2&q=a+b"
        );
    }

    #[test]
    fn test_path_params_are_encoded() {
        let options = resolve(
            RequestOptions::new().base_url("http://localhost"),
            RequestOptions::new()
                .param("name", "a/b?c")
                .param("title", "x y+z"),
        );

        assert_eq!(
            options.full_url("/files/:name/:title"),
            "http://localhost/files/a%2Fb%3Fc/x%20y%2Bz"
        );
    }

    #[test]
    fn test_prepare_keeps_going_past_body_failure() {
        let call = RequestOptions::new()
            .json(&serde_json::json!({ "a": 1 }))
            .unwrap()
            .header("x-trace", "1")
            .unwrap()
            .body_serializer(|_| Err("boom".to_string()));

        let (options, failure) = EffectiveOptions::prepare(&RequestOptions::new(), &call);
        assert!(matches!(failure, Some(Error::Serialization(message)) if message == "boom"));
        assert!(options.body.is_none());
        assert!(options.headers.is_some());

        assert!(EffectiveOptions::resolve(&RequestOptions::new(), &call).is_err());
    }
}
