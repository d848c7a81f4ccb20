//! Lifecycle interceptors.
//!
//! An [`Interceptor`] observes each attempt. Every method has a no-op
//! default, so implementors only override what they need.
//!
//! | Outcome         | Methods called                                 |
//! |-----------------|------------------------------------------------|
//! | any sent request | `on_request`, before the transport call       |
//! | success         | `on_response`                                  |
//! | HTTP error      | `on_response_error` and `on_error`, concurrently |
//! | transport error | `on_request_error` and `on_error`, concurrently  |
//! | timeout / abort | none                                           |
//!
//! A failing `on_request` or `on_response` turns the attempt into a transport
//! error. Failures of the error-path methods are logged and otherwise ignored.
//!
//! Options hold one interceptor per method in an [`Interceptors`] slot set.
//! Each slot merges on its own, so a per-call `on_error` leaves the client's
//! `on_request` in place.

use crate::options::EffectiveOptions;
use crate::transport::Request;
use crate::{Error, Response};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// What an interceptor method returns.
pub type InterceptorResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Passed to [`Interceptor::on_request`].
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// The effective options of the attempt.
    pub options: &'a EffectiveOptions,
    /// The request about to be sent.
    pub request: &'a Request,
}

/// Passed to [`Interceptor::on_response`].
#[derive(Debug, Clone, Copy)]
pub struct ResponseContext<'a> {
    /// The effective options of the attempt.
    pub options: &'a EffectiveOptions,
    /// The request that was sent.
    pub request: &'a Request,
    /// The successful response.
    pub response: &'a Response,
    /// The parsed and validated success data.
    pub data: &'a Value,
}

/// Passed to [`Interceptor::on_response_error`].
#[derive(Debug, Clone, Copy)]
pub struct ResponseErrorContext<'a> {
    /// The effective options of the attempt.
    pub options: &'a EffectiveOptions,
    /// The request that was sent.
    pub request: &'a Request,
    /// The non-2xx response.
    pub response: &'a Response,
    /// The parsed error body.
    pub error_data: &'a Value,
}

/// Passed to [`Interceptor::on_request_error`].
#[derive(Debug, Clone, Copy)]
pub struct RequestErrorContext<'a> {
    /// The effective options of the attempt.
    pub options: &'a EffectiveOptions,
    /// The request that failed.
    pub request: &'a Request,
    /// What went wrong.
    pub error: &'a Error,
}

/// Passed to [`Interceptor::on_error`].
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext<'a> {
    /// The effective options of the attempt.
    pub options: &'a EffectiveOptions,
    /// The request that failed.
    pub request: &'a Request,
    /// What went wrong.
    pub error: &'a Error,
    /// The response, for HTTP errors.
    pub response: Option<&'a Response>,
}

/// Hooks into the lifecycle of every attempt.
///
/// # Examples
///
/// ```
/// use callkit::interceptor::{ErrorContext, Interceptor, InterceptorResult, RequestContext};
/// use async_trait::async_trait;
///
/// struct Audit;
///
/// #[async_trait]
/// impl Interceptor for Audit {
///     async fn on_request(&self, context: RequestContext<'_>) -> InterceptorResult {
///         println!("-> {} {}", context.request.method, context.request.url);
///         Ok(())
///     }
///
///     async fn on_error(&self, context: ErrorContext<'_>) -> InterceptorResult {
///         println!("!! {}", context.error);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Called before the transport call, whatever the outcome.
    async fn on_request(&self, _context: RequestContext<'_>) -> InterceptorResult {
        Ok(())
    }

    /// Called with validated success data.
    async fn on_response(&self, _context: ResponseContext<'_>) -> InterceptorResult {
        Ok(())
    }

    /// Called for non-2xx responses that are not retried.
    async fn on_response_error(&self, _context: ResponseErrorContext<'_>) -> InterceptorResult {
        Ok(())
    }

    /// Called for failures without a usable response.
    async fn on_request_error(&self, _context: RequestErrorContext<'_>) -> InterceptorResult {
        Ok(())
    }

    /// Called for every HTTP or transport error.
    async fn on_error(&self, _context: ErrorContext<'_>) -> InterceptorResult {
        Ok(())
    }
}

/// One optional interceptor per lifecycle method.
///
/// Only the method matching its slot is called on each interceptor.
#[derive(Clone, Default)]
pub struct Interceptors {
    pub(crate) on_request: Option<Arc<dyn Interceptor>>,
    pub(crate) on_response: Option<Arc<dyn Interceptor>>,
    pub(crate) on_response_error: Option<Arc<dyn Interceptor>>,
    pub(crate) on_request_error: Option<Arc<dyn Interceptor>>,
    pub(crate) on_error: Option<Arc<dyn Interceptor>>,
}

impl Interceptors {
    /// Fills every slot with `interceptor`.
    pub fn all(interceptor: Arc<dyn Interceptor>) -> Self {
        Self {
            on_request: Some(Arc::clone(&interceptor)),
            on_response: Some(Arc::clone(&interceptor)),
            on_response_error: Some(Arc::clone(&interceptor)),
            on_request_error: Some(Arc::clone(&interceptor)),
            on_error: Some(interceptor),
        }
    }

    /// Returns `true` if no slot is filled.
    pub fn is_empty(&self) -> bool {
        self.on_request.is_none()
            && self.on_response.is_none()
            && self.on_response_error.is_none()
            && self.on_request_error.is_none()
            && self.on_error.is_none()
    }

    /// Layers `overrides` on top of `self`, slot by slot.
    pub fn merged_with(&self, overrides: &Interceptors) -> Interceptors {
        fn pick(
            over: &Option<Arc<dyn Interceptor>>,
            base: &Option<Arc<dyn Interceptor>>,
        ) -> Option<Arc<dyn Interceptor>> {
            over.as_ref().or(base.as_ref()).cloned()
        }

        Interceptors {
            on_request: pick(&overrides.on_request, &self.on_request),
            on_response: pick(&overrides.on_response, &self.on_response),
            on_response_error: pick(&overrides.on_response_error, &self.on_response_error),
            on_request_error: pick(&overrides.on_request_error, &self.on_request_error),
            on_error: pick(&overrides.on_error, &self.on_error),
        }
    }

    pub(crate) async fn on_request(&self, context: RequestContext<'_>) -> InterceptorResult {
        match &self.on_request {
            Some(interceptor) => interceptor.on_request(context).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn on_response(&self, context: ResponseContext<'_>) -> InterceptorResult {
        match &self.on_response {
            Some(interceptor) => interceptor.on_response(context).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn on_response_error(
        &self,
        context: ResponseErrorContext<'_>,
    ) -> InterceptorResult {
        match &self.on_response_error {
            Some(interceptor) => interceptor.on_response_error(context).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn on_request_error(
        &self,
        context: RequestErrorContext<'_>,
    ) -> InterceptorResult {
        match &self.on_request_error {
            Some(interceptor) => interceptor.on_request_error(context).await,
            None => Ok(()),
        }
    }

    pub(crate) async fn on_error(&self, context: ErrorContext<'_>) -> InterceptorResult {
        match &self.on_error {
            Some(interceptor) => interceptor.on_error(context).await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptors")
            .field("on_request", &self.on_request.is_some())
            .field("on_response", &self.on_response.is_some())
            .field("on_response_error", &self.on_response_error.is_some())
            .field("on_request_error", &self.on_request_error.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl Interceptor for Noop {}

    #[test]
    fn test_slots_merge_independently() {
        let base = Interceptors {
            on_request: Some(Arc::new(Noop)),
            on_request_error: Some(Arc::new(Noop)),
            ..Interceptors::default()
        };
        let call = Interceptors {
            on_error: Some(Arc::new(Noop)),
            ..Interceptors::default()
        };

        let merged = base.merged_with(&call);
        assert!(merged.on_request.is_some());
        assert!(merged.on_request_error.is_some());
        assert!(merged.on_error.is_some());
        assert!(merged.on_response.is_none());
    }

    #[test]
    fn test_override_replaces_only_its_slot() {
        let first: Arc<dyn Interceptor> = Arc::new(Noop);
        let second: Arc<dyn Interceptor> = Arc::new(Noop);

        let base = Interceptors::all(Arc::clone(&first));
        let call = Interceptors {
            on_error: Some(Arc::clone(&second)),
            ..Interceptors::default()
        };

        let merged = base.merged_with(&call);
        assert!(Arc::ptr_eq(merged.on_request.as_ref().unwrap(), &first));
        assert!(Arc::ptr_eq(merged.on_error.as_ref().unwrap(), &second));
        assert!(!merged.is_empty());
        assert!(Interceptors::default().is_empty());
    }
}
