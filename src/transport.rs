//! The network primitive the client drives.
//!
//! A [`Transport`] sends one prepared [`Request`] and returns a buffered
//! [`Response`]. It knows nothing about retries, deduplication, timeouts or
//! result shaping; the client wraps all of that around it. The default
//! implementation is [`ReqwestTransport`].

use crate::{Response, Result};
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use url::Url;

/// A fully prepared request.
#[derive(Debug, Clone)]
pub struct Request {
    /// The HTTP method.
    pub method: Method,
    /// The final URL, with base URL, path params and query applied.
    pub url: String,
    /// Headers to send.
    pub headers: HeaderMap,
    /// The serialized body.
    pub body: Option<Bytes>,
}

/// Sends requests over the network.
///
/// Implement this to plug in another HTTP stack or a test double. Dropping the
/// returned future must abort the request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and buffers the full response.
    ///
    /// Non-2xx statuses are not errors at this level.
    async fn send(&self, request: &Request) -> Result<Response>;
}

/// A [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wraps an existing `reqwest` client.
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &Request) -> Result<Response> {
        let url = Url::parse(&request.url)?;

        let mut builder = self
            .http_client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().to_string();
        let body = response.bytes().await?;

        Ok(Response::new(status, headers, url, Some(body)))
    }
}
