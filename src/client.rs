//! HTTP client with retries, duplicate cancellation and result shaping.
//!
//! The [`Client`] type is the main entry point for making HTTP requests.
//! Use [`ClientBuilder`] to configure and create clients, and
//! [`Client::create`] to derive clients that layer more base options.

use crate::interceptor::RequestContext;
use crate::key;
use crate::options::{Auth, EffectiveOptions, RequestOptions};
use crate::registry::CancellationRegistry;
use crate::response::parse_body;
use crate::result::{AttemptOutcome, CallOutput, Resolution};
use crate::retry::RetryDelay;
use crate::signal::{Abort, AttemptSignal, EXTERNAL_ABORT_REASON};
use crate::transport::{ReqwestTransport, Request, Transport};
use crate::{Error, Response, Result};
use http::Method;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// An HTTP client that issues one logical request per call.
///
/// Each call merges the client's base options with the per-call options,
/// cancels any in-flight duplicate, retries retryable HTTP errors and resolves
/// every outcome into the configured result shape.
///
/// # Examples
///
/// ```no_run
/// use callkit::{CallOutput, Client, RequestOptions};
/// use serde::Deserialize;
/// use std::time::Duration;
///
/// #[derive(Deserialize)]
/// struct User {
///     id: u64,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), callkit::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(10))
///     .retries(2)
///     .build()?;
///
/// let output = client
///     .call::<User>("/users/:id", RequestOptions::new().param("id", "123"))
///     .await?;
///
/// if let CallOutput::All(result) = output {
///     match (result.data, result.error) {
///         (Some(user), _) => println!("User {}: {}", user.id, user.name),
///         (None, Some(error)) => eprintln!("{} ({})", error, error.kind()),
///         (None, None) => {}
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    base: RequestOptions,
    registry: Arc<CancellationRegistry>,
}

/// What the retry loop does after one attempt.
enum Step {
    Retry,
    Finish(AttemptOutcome),
}

impl Client {
    /// Creates a client with no base options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialised.
    pub fn new() -> Result<Client> {
        ClientBuilder::new().build()
    }

    /// Creates a new `ClientBuilder` for configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Derives a client whose base options are this client's base options
    /// with `options` layered on top.
    ///
    /// The derived client shares the transport but has its own registry, so
    /// requests of the two clients never cancel each other.
    pub fn create(&self, options: RequestOptions) -> Client {
        Client {
            inner: Arc::new(ClientInner {
                transport: Arc::clone(&self.inner.transport),
                base: self.inner.base.merged_with(&options),
                registry: Arc::new(CancellationRegistry::new()),
            }),
        }
    }

    /// The base options every call starts from.
    pub fn base_options(&self) -> &RequestOptions {
        &self.inner.base
    }

    /// The registry tracking this client's in-flight requests.
    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.inner.registry
    }

    /// Issues one logical request.
    ///
    /// Failures are returned as `Err` only when the effective result mode
    /// asks for it; otherwise they are carried inside the [`CallOutput`].
    ///
    /// # Type Parameters
    ///
    /// * `T` - The success data type, deserialized from the parsed body
    pub async fn call<T>(&self, url: &str, options: RequestOptions) -> Result<CallOutput<T>>
    where
        T: DeserializeOwned,
    {
        let started = Instant::now();
        let mut call_options = options;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let (effective, failure) = EffectiveOptions::prepare(&self.inner.base, &call_options);
            let request = effective.request(url);

            if let Some(error) = failure {
                let resolution = Resolution {
                    options: &effective,
                    request: &request,
                    attempts,
                    started,
                };
                return resolution
                    .resolve(AttemptOutcome::TransportError(error))
                    .await;
            }

            let abort_previous = effective.cancels_duplicates().then(|| {
                format!(
                    "Request aborted as another request to this same endpoint: {}, with the same request options was initiated.",
                    url
                )
            });
            let registration = self
                .inner
                .registry
                .register(key::derive(&request.url, &effective), abort_previous);
            let signal = AttemptSignal::new(
                registration.handle().clone(),
                effective.signal.clone(),
                effective.timeout,
            );

            match self.attempt(&request, &effective, &signal, attempts).await {
                Step::Retry => {
                    drop(registration);

                    let delay = effective.retry.delay_for_retry(attempts);
                    let retries_remaining = effective.retry.retries - 1;
                    tracing::info!(
                        delay_ms = delay.as_millis(),
                        attempt = attempts,
                        retries_remaining = retries_remaining,
                        "Retrying request after delay"
                    );

                    if !Self::wait_for_retry(delay, effective.signal.as_ref()).await {
                        let resolution = Resolution {
                            options: &effective,
                            request: &request,
                            attempts,
                            started,
                        };
                        return resolution
                            .resolve(AttemptOutcome::Cancelled(EXTERNAL_ABORT_REASON.to_string()))
                            .await;
                    }
                    call_options.retries = Some(retries_remaining);
                }
                Step::Finish(outcome) => {
                    let resolution = Resolution {
                        options: &effective,
                        request: &request,
                        attempts,
                        started,
                    };
                    let output = resolution.resolve(outcome).await;
                    drop(registration);
                    return output;
                }
            }
        }
    }

    /// Sleeps out a retry delay. Returns `false` if `signal` fired first.
    async fn wait_for_retry(delay: Duration, signal: Option<&CancellationToken>) -> bool {
        match signal {
            Some(signal) => tokio::select! {
                biased;
                _ = signal.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            },
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }

    /// Executes a single attempt up to its outcome.
    async fn attempt(
        &self,
        request: &Request,
        options: &EffectiveOptions,
        signal: &AttemptSignal,
        attempt: usize,
    ) -> Step {
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            attempt = attempt,
            retries_remaining = options.retry.retries,
            "Executing HTTP request"
        );

        let context = RequestContext { options, request };
        if let Err(e) = options.interceptors.on_request(context).await {
            return Step::Finish(AttemptOutcome::TransportError(Error::Interceptor(
                e.to_string(),
            )));
        }

        let sent_at = Instant::now();
        let response = match signal.race(self.inner.transport.send(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => return Step::Finish(AttemptOutcome::TransportError(error)),
            Err(Abort::Timeout(timeout)) => return Step::Finish(AttemptOutcome::Timeout(timeout)),
            Err(Abort::Cancelled(reason)) => {
                return Step::Finish(AttemptOutcome::Cancelled(reason))
            }
        };

        tracing::info!(
            status = response.status.as_u16(),
            latency_ms = sent_at.elapsed().as_millis(),
            attempt = attempt,
            "Received HTTP response"
        );

        if !response.is_success() {
            let cancelled = signal.check().is_some();
            if options
                .retry
                .should_retry(response.status, &request.method, cancelled)
            {
                return Step::Retry;
            }

            let status = response.status;
            let (parsed, response) = read_body(response, options);
            let error_data = parsed.unwrap_or_else(|raw| Value::String(raw.text));

            return Step::Finish(AttemptOutcome::HttpError {
                status,
                error_data,
                response,
            });
        }

        let status = response.status;
        let (parsed, response) = read_body(response, options);
        match parsed {
            Ok(data) => Step::Finish(AttemptOutcome::Success { data, response }),
            Err(raw) => Step::Finish(AttemptOutcome::TransportError(Error::Deserialization {
                raw_response: raw.text,
                serde_error: raw.error,
                status,
            })),
        }
    }

    /// Makes a GET request.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use callkit::Client;
    /// use serde::Deserialize;
    ///
    /// #[derive(Deserialize)]
    /// struct User { name: String }
    ///
    /// # async fn example() -> Result<(), callkit::Error> {
    /// let client = Client::builder()
    ///     .base_url("https://api.example.com")?
    ///     .build()?;
    ///
    /// let user = client.get::<User>("/users/123").await?.into_data();
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get<T>(&self, url: &str) -> Result<CallOutput<T>>
    where
        T: DeserializeOwned,
    {
        self.call(url, RequestOptions::new().method(Method::GET)).await
    }

    /// Makes a POST request with a JSON body.
    pub async fn post<B, T>(&self, url: &str, body: &B) -> Result<CallOutput<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call(url, RequestOptions::new().method(Method::POST).json(body)?)
            .await
    }

    /// Makes a PUT request with a JSON body.
    pub async fn put<B, T>(&self, url: &str, body: &B) -> Result<CallOutput<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call(url, RequestOptions::new().method(Method::PUT).json(body)?)
            .await
    }

    /// Makes a PATCH request with a JSON body.
    pub async fn patch<B, T>(&self, url: &str, body: &B) -> Result<CallOutput<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call(url, RequestOptions::new().method(Method::PATCH).json(body)?)
            .await
    }

    /// Makes a DELETE request.
    pub async fn delete<T>(&self, url: &str) -> Result<CallOutput<T>>
    where
        T: DeserializeOwned,
    {
        self.call(url, RequestOptions::new().method(Method::DELETE)).await
    }
}

/// A body that failed to parse.
struct Unparsed {
    text: String,
    error: String,
}

/// Parses the body, consuming it unless responses are cloned.
fn read_body(
    mut response: Response,
    options: &EffectiveOptions,
) -> (std::result::Result<Value, Unparsed>, Response) {
    let body = if options.clone_response {
        response.body.clone().unwrap_or_default()
    } else {
        response.take_body()
    };

    let parsed = parse_body(&body, options.response_type, options.response_parser.as_ref())
        .map_err(|error| Unparsed {
            text: String::from_utf8_lossy(&body).into_owned(),
            error,
        });

    (parsed, response)
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use callkit::{ClientBuilder, RetryDelay};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), callkit::Error> {
/// let client = ClientBuilder::new()
///     .base_url("https://api.example.com")?
///     .timeout(Duration::from_secs(30))
///     .retries(3)
///     .retry_delay(RetryDelay::Fixed(Duration::from_millis(200)))
///     .auth("my-token")
///     .default_header("User-Agent", "my-app/1.0")?
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base: RequestOptions,
    transport: Option<Arc<dyn Transport>>,
    http_client: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            base: RequestOptions::new(),
            transport: None,
            http_client: None,
        }
    }

    /// Sets the base URL that request URLs are appended to.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        Url::parse(url.as_ref())?;
        self.base = self.base.base_url(url.as_ref());
        Ok(self)
    }

    /// Adds a default header that will be included in all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        self.base = self.base.header(name, value)?;
        Ok(self)
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.base = self.base.timeout(timeout);
        self
    }

    /// Sets the default retry budget.
    pub fn retries(mut self, retries: usize) -> Self {
        self.base = self.base.retries(retries);
        self
    }

    /// Sets the default retry delay.
    pub fn retry_delay(mut self, delay: impl Into<RetryDelay>) -> Self {
        self.base = self.base.retry_delay(delay);
        self
    }

    /// Sets the default credentials.
    pub fn auth(mut self, auth: impl Into<Auth>) -> Self {
        self.base = self.base.auth(auth);
        self
    }

    /// Layers a whole option set onto the base options.
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.base = self.base.merged_with(&options);
        self
    }

    /// Uses a custom transport instead of `reqwest`.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Uses a preconfigured `reqwest` client for the default transport.
    pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialised.
    pub fn build(self) -> Result<Client> {
        let transport: Arc<dyn Transport> = match (self.transport, self.http_client) {
            (Some(transport), _) => transport,
            (None, Some(http_client)) => Arc::new(ReqwestTransport::new(http_client)),
            (None, None) => {
                let http_client = reqwest::Client::builder().build().map_err(|e| {
                    Error::Configuration(format!("Failed to build HTTP client: {}", e))
                })?;
                Arc::new(ReqwestTransport::new(http_client))
            }
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                base: self.base,
                registry: Arc::new(CancellationRegistry::new()),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
