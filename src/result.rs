//! Outcome classification and result shaping.
//!
//! Each attempt ends in exactly one [`AttemptOutcome`]. The resolver turns it
//! into the caller's result: it validates success data, runs the matching
//! interceptor methods, logs failures and shapes everything according to the
//! configured [`ResultMode`].

use crate::interceptor::{
    ErrorContext, InterceptorResult, RequestErrorContext, ResponseContext, ResponseErrorContext,
};
use crate::options::EffectiveOptions;
use crate::transport::Request;
use crate::{Error, Response, Result};
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

/// The shape of the value a call returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultMode {
    /// Always return the combined [`CallResult`] envelope.
    #[default]
    All,
    /// Return the combined envelope on success, `Err` on failure.
    AllWithException,
    /// Return only the data, `None` on failure.
    OnlySuccess,
    /// Return only the data on success, `Err` on failure.
    OnlySuccessWithException,
}

impl ResultMode {
    /// Returns `true` if failures are returned as `Err`.
    pub fn throws(&self) -> bool {
        matches!(
            self,
            ResultMode::AllWithException | ResultMode::OnlySuccessWithException
        )
    }

    pub(crate) fn shape<T>(
        self,
        data: Option<T>,
        error: Option<Error>,
        response: Option<Response>,
        attempts: usize,
        latency: Duration,
    ) -> Result<CallOutput<T>> {
        match (self, error) {
            (ResultMode::AllWithException | ResultMode::OnlySuccessWithException, Some(error)) => {
                Err(error)
            }
            (ResultMode::All | ResultMode::AllWithException, error) => {
                Ok(CallOutput::All(CallResult {
                    data,
                    error,
                    response,
                    attempts,
                    latency,
                }))
            }
            (ResultMode::OnlySuccess | ResultMode::OnlySuccessWithException, _) => {
                Ok(CallOutput::OnlySuccess(data))
            }
        }
    }
}

/// The combined result envelope.
///
/// Exactly one of `data` and `error` is set.
#[derive(Debug)]
pub struct CallResult<T> {
    /// The success data.
    pub data: Option<T>,

    /// The failure.
    pub error: Option<Error>,

    /// The final response. `None` for timeouts, cancellations and transport errors.
    pub response: Option<Response>,

    /// The number of attempts the logical call made.
    pub attempts: usize,

    /// Time from the first attempt until the result was resolved.
    pub latency: Duration,
}

impl<T> CallResult<T> {
    /// Returns `true` if the call succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns `true` if the call needed retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Converts into a standard `Result`, dropping the response.
    pub fn into_result(self) -> std::result::Result<Option<T>, Error> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

/// What a call returns, shaped by its [`ResultMode`].
#[derive(Debug)]
pub enum CallOutput<T> {
    /// The combined envelope ([`ResultMode::All`], [`ResultMode::AllWithException`]).
    All(CallResult<T>),
    /// Data only ([`ResultMode::OnlySuccess`], [`ResultMode::OnlySuccessWithException`]).
    OnlySuccess(Option<T>),
}

impl<T> CallOutput<T> {
    /// Returns the success data, if any.
    pub fn data(&self) -> Option<&T> {
        match self {
            CallOutput::All(result) => result.data.as_ref(),
            CallOutput::OnlySuccess(data) => data.as_ref(),
        }
    }

    /// Consumes the output, returning the success data, if any.
    pub fn into_data(self) -> Option<T> {
        match self {
            CallOutput::All(result) => result.data,
            CallOutput::OnlySuccess(data) => data,
        }
    }

    /// Returns the failure carried by a combined envelope.
    pub fn error(&self) -> Option<&Error> {
        match self {
            CallOutput::All(result) => result.error.as_ref(),
            CallOutput::OnlySuccess(_) => None,
        }
    }

    /// Returns the response carried by a combined envelope.
    pub fn response(&self) -> Option<&Response> {
        match self {
            CallOutput::All(result) => result.response.as_ref(),
            CallOutput::OnlySuccess(_) => None,
        }
    }

    /// Returns the combined envelope, if this output has one.
    pub fn into_combined(self) -> Option<CallResult<T>> {
        match self {
            CallOutput::All(result) => Some(result),
            CallOutput::OnlySuccess(_) => None,
        }
    }
}

/// How one attempt ended.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    Success {
        data: Value,
        response: Response,
    },
    HttpError {
        status: StatusCode,
        error_data: Value,
        response: Response,
    },
    TransportError(Error),
    Timeout(Duration),
    Cancelled(String),
}

/// Everything the resolver needs besides the outcome.
pub(crate) struct Resolution<'a> {
    pub(crate) options: &'a EffectiveOptions,
    pub(crate) request: &'a Request,
    pub(crate) attempts: usize,
    pub(crate) started: Instant,
}

impl Resolution<'_> {
    /// Resolves `outcome` into the caller's result.
    pub(crate) async fn resolve<T: DeserializeOwned>(
        &self,
        outcome: AttemptOutcome,
    ) -> Result<CallOutput<T>> {
        match outcome {
            AttemptOutcome::Success { data, response } => {
                match self.accept::<T>(data, &response).await {
                    Ok(data) => self.finish(Some(data), None, Some(response)),
                    Err(error) => self.request_error(error).await,
                }
            }
            AttemptOutcome::HttpError {
                status,
                error_data,
                response,
            } => self.http_error(status, error_data, response).await,
            AttemptOutcome::TransportError(error) => self.request_error(error).await,
            AttemptOutcome::Timeout(timeout) => {
                let error = Error::Timeout { timeout };
                log_failure(&error);
                self.finish(None, Some(error), None)
            }
            AttemptOutcome::Cancelled(reason) => {
                let error = Error::Cancelled { reason };
                log_failure(&error);
                self.finish(None, Some(error), None)
            }
        }
    }

    /// Validates, types and announces success data.
    async fn accept<T: DeserializeOwned>(&self, data: Value, response: &Response) -> Result<T> {
        let data = match &self.options.response_validator {
            Some(validator) => validator.validate(data)?,
            None => data,
        };

        let typed = T::deserialize(&data).map_err(|e| Error::Deserialization {
            raw_response: data.to_string(),
            serde_error: e.to_string(),
            status: response.status,
        })?;

        self.options
            .interceptors
            .on_response(ResponseContext {
                options: self.options,
                request: self.request,
                response,
                data: &data,
            })
            .await
            .map_err(|e| Error::Interceptor(e.to_string()))?;

        Ok(typed)
    }

    async fn http_error<T>(
        &self,
        status: StatusCode,
        error_data: Value,
        response: Response,
    ) -> Result<CallOutput<T>> {
        let message = error_data
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.options.default_error_message.clone());

        let error = Error::Http {
            status,
            error_data: error_data.clone(),
            message,
            response: Box::new(response.clone()),
        };
        log_failure(&error);

        let interceptors = &self.options.interceptors;
        let (response_error, any_error) = tokio::join!(
            interceptors.on_response_error(ResponseErrorContext {
                options: self.options,
                request: self.request,
                response: &response,
                error_data: &error_data,
            }),
            interceptors.on_error(ErrorContext {
                options: self.options,
                request: self.request,
                error: &error,
                response: Some(&response),
            }),
        );
        report_interceptor_failure("on_response_error", response_error);
        report_interceptor_failure("on_error", any_error);

        self.finish(None, Some(error), Some(response))
    }

    async fn request_error<T>(&self, error: Error) -> Result<CallOutput<T>> {
        log_failure(&error);

        let interceptors = &self.options.interceptors;
        let (request_error, any_error) = tokio::join!(
            interceptors.on_request_error(RequestErrorContext {
                options: self.options,
                request: self.request,
                error: &error,
            }),
            interceptors.on_error(ErrorContext {
                options: self.options,
                request: self.request,
                error: &error,
                response: None,
            }),
        );
        report_interceptor_failure("on_request_error", request_error);
        report_interceptor_failure("on_error", any_error);

        self.finish(None, Some(error), None)
    }

    fn finish<T>(
        &self,
        data: Option<T>,
        error: Option<Error>,
        response: Option<Response>,
    ) -> Result<CallOutput<T>> {
        self.options.result_mode.shape(
            data,
            error,
            response,
            self.attempts,
            self.started.elapsed(),
        )
    }
}

fn log_failure(error: &Error) {
    tracing::error!(
        kind = %error.kind(),
        message = %error.message(),
        status = error.status().map(|status| status.as_u16()),
        "Request failed"
    );
}

fn report_interceptor_failure(hook: &'static str, result: InterceptorResult) {
    if let Err(error) = result {
        tracing::warn!(hook = hook, error = %error, "Interceptor failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    fn shape(mode: ResultMode, ok: bool) -> Result<CallOutput<u32>> {
        let (data, error) = if ok {
            (Some(7), None)
        } else {
            (
                None,
                Some(Error::Cancelled {
                    reason: "gone".to_string(),
                }),
            )
        };
        let response = Response::new(StatusCode::OK, HeaderMap::new(), "http://localhost/", None);
        mode.shape(data, error, Some(response), 1, Duration::ZERO)
    }

    #[test]
    fn test_all_mode_never_errors() {
        let output = shape(ResultMode::All, false).unwrap();
        assert!(output.data().is_none());
        assert_eq!(output.error().unwrap().message(), "gone");

        let output = shape(ResultMode::All, true).unwrap();
        assert_eq!(output.data(), Some(&7));
        assert!(output.response().is_some());
    }

    #[test]
    fn test_exception_modes_return_err() {
        assert!(shape(ResultMode::AllWithException, false).is_err());
        assert!(shape(ResultMode::OnlySuccessWithException, false).is_err());

        let output = shape(ResultMode::OnlySuccessWithException, true).unwrap();
        assert!(matches!(output, CallOutput::OnlySuccess(Some(7))));
    }

    #[test]
    fn test_only_success_hides_error() {
        let output = shape(ResultMode::OnlySuccess, false).unwrap();
        assert!(matches!(output, CallOutput::OnlySuccess(None)));
        assert!(output.error().is_none());
        assert!(output.into_combined().is_none());
    }

    #[test]
    fn test_into_result() {
        let result = shape(ResultMode::All, true)
            .unwrap()
            .into_combined()
            .unwrap();
        assert!(result.is_success());
        assert!(!result.was_retried());
        assert_eq!(result.into_result().unwrap(), Some(7));
    }
}
