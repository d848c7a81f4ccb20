//! # Callkit - one entry point for a logical HTTP request
//!
//! Callkit wraps a plain "send a request, get a response" transport with
//! everything a caller usually re-implements around it: option merging,
//! retries, cancellation of redundant duplicate requests, timeouts and a
//! uniform result shape whether the call succeeded, got an HTTP error, failed
//! on the network, timed out or was aborted.
//!
//! ## Quick Start
//!
//! ```no_run
//! use callkit::{Client, RequestOptions, ResultMode};
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize)]
//! struct CreateUser {
//!     name: String,
//! }
//!
//! #[derive(Deserialize)]
//! struct User {
//!     id: u64,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), callkit::Error> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")?
//!         .auth("my-token")
//!         .timeout(Duration::from_secs(30))
//!         .retries(2)
//!         .build()?;
//!
//!     // Combined envelope: failures are data, not `Err`
//!     let output = client.get::<User>("/users/123").await?;
//!     match output.error() {
//!         None => println!("User: {}", output.data().unwrap().name),
//!         Some(error) => eprintln!("{}: {}", error.kind(), error),
//!     }
//!
//!     // Throwing mode: failures come back as `Err`
//!     let created = client
//!         .call::<User>(
//!             "/users",
//!             RequestOptions::new()
//!                 .method(http::Method::POST)
//!                 .json(&CreateUser { name: "Alice".to_string() })?
//!                 .result_mode(ResultMode::OnlySuccessWithException),
//!         )
//!         .await?
//!         .into_data();
//!     println!("Created user {:?}", created.map(|user| user.id));
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Field-by-field option merging** - Per-call options override client options, which override defaults
//! - **Duplicate cancellation** - A new request aborts an in-flight one with the same request key
//! - **Retries** - Retryable statuses and methods, a countdown budget and a constant (or custom) delay
//! - **Timeouts and external cancellation** - Combined into one abort signal per attempt
//! - **Interceptors** - Typed hooks around requests, responses and errors
//! - **Result modes** - Combined envelope, data-only, or `Err` on failure
//! - **Automatic logging** - Structured logging with `tracing`
//!
//! ## Error Handling
//!
//! Every failure is an [`Error`], classified by [`Error::kind`]:
//!
//! ```no_run
//! use callkit::{Client, ErrorKind};
//!
//! # async fn example() -> Result<(), callkit::Error> {
//! # let client = Client::new()?;
//! let output = client.get::<serde_json::Value>("https://api.example.com/endpoint").await?;
//! if let Some(error) = output.error() {
//!     match error.kind() {
//!         ErrorKind::Http => eprintln!("HTTP {:?}: {:?}", error.status(), error.error_data()),
//!         ErrorKind::Timeout => eprintln!("{}", error),
//!         ErrorKind::Cancelled => eprintln!("aborted: {}", error.message()),
//!         ErrorKind::Transport => eprintln!("transport failure: {}", error),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
pub mod interceptor;
pub mod key;
mod options;
pub mod registry;
mod response;
mod result;
pub mod retry;
mod signal;
mod transport;

pub use client::{Client, ClientBuilder};
pub use error::{Error, ErrorKind, Result, DEFAULT_ERROR_MESSAGE};
pub use interceptor::{Interceptor, Interceptors};
pub use options::{
    Auth, Body, BodySerializer, DedupeStrategy, EffectiveOptions, RequestOptions,
    ResponseValidator,
};
pub use registry::CancellationRegistry;
pub use response::{Response, ResponseParser, ResponseType};
pub use result::{CallOutput, CallResult, ResultMode};
pub use retry::{RetryDelay, RetryPolicy};
pub use tokio_util::sync::CancellationToken;
pub use transport::{ReqwestTransport, Request, Transport};
