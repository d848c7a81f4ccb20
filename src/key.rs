//! Request key derivation.
//!
//! Two calls with the same key are the same logical request as far as
//! duplicate cancellation is concerned. The key covers the final URL and
//! every serializable option; interceptors, validators, parsers, serializers
//! and cancellation tokens are left out.

use crate::options::EffectiveOptions;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Derives the request key for a final URL and its effective options.
///
/// Map-valued options are collected into sorted maps first, so the key does
/// not depend on the order in which headers, params or query pairs were
/// inserted.
///
/// # Examples
///
/// ```
/// use callkit::{key, EffectiveOptions, RequestOptions};
///
/// let a = EffectiveOptions::resolve(
///     &RequestOptions::new(),
///     &RequestOptions::new().query("a", "1").query("b", "2"),
/// )
/// .unwrap();
/// let b = EffectiveOptions::resolve(
///     &RequestOptions::new(),
///     &RequestOptions::new().query("b", "2").query("a", "1"),
/// )
/// .unwrap();
///
/// assert_eq!(key::derive("/users", &a), key::derive("/users", &b));
/// ```
pub fn derive(url: &str, options: &EffectiveOptions) -> String {
    let headers: BTreeMap<String, Vec<String>> = options
        .headers
        .iter()
        .flat_map(|headers| headers.iter())
        .fold(BTreeMap::new(), |mut acc, (name, value)| {
            acc.entry(name.as_str().to_string())
                .or_insert_with(Vec::new)
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
            acc
        });

    let body = options.body.as_ref().map(|body| match std::str::from_utf8(body) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => Value::from(body.to_vec()),
    });

    let mut retry_methods: Vec<&str> = options.retry.methods.iter().map(|m| m.as_str()).collect();
    retry_methods.sort_unstable();
    retry_methods.dedup();

    let descriptor = json!({
        "method": options.method.as_str(),
        "baseURL": options.base_url,
        "headers": headers,
        "body": body,
        "params": options.params,
        "query": options.query,
        "auth": options.auth.as_ref().map(|auth| auth.header_value()),
        "timeout": options.timeout.map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
        "retries": options.retry.retries,
        "retryDelay": options.retry.delay.key_repr(),
        "retryCodes": options.retry.codes,
        "retryMethods": retry_methods,
        "dedupeStrategy": options.dedupe_strategy.as_str(),
        "cancelRedundantRequests": options.cancel_redundant_requests,
        "responseType": options.response_type,
        "cloneResponse": options.clone_response,
        "resultMode": options.result_mode,
        "defaultErrorMessage": options.default_error_message,
    });

    format!("{url} {descriptor}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestOptions;
    use http::Method;

    fn key_for(url: &str, call: RequestOptions) -> String {
        let options = EffectiveOptions::resolve(&RequestOptions::new(), &call).unwrap();
        derive(url, &options)
    }

    #[test]
    fn test_header_order_is_irrelevant() {
        let a = RequestOptions::new()
            .header("x-a", "1")
            .unwrap()
            .header("x-b", "2")
            .unwrap();
        let b = RequestOptions::new()
            .header("x-b", "2")
            .unwrap()
            .header("x-a", "1")
            .unwrap();

        assert_eq!(key_for("/u", a), key_for("/u", b));
    }

    #[test]
    fn test_key_distinguishes_method_url_body_and_query() {
        let base = key_for("/u", RequestOptions::new());

        assert_ne!(base, key_for("/v", RequestOptions::new()));
        assert_ne!(base, key_for("/u", RequestOptions::new().method(Method::POST)));
        assert_ne!(base, key_for("/u", RequestOptions::new().text("x")));
        assert_ne!(base, key_for("/u", RequestOptions::new().query("a", "1")));
        assert_ne!(base, key_for("/u", RequestOptions::new().param("a", "1")));
        assert_ne!(
            key_for("/u", RequestOptions::new().text("x")),
            key_for("/u", RequestOptions::new().text("y"))
        );
    }

    #[test]
    fn test_interceptor_does_not_affect_key() {
        struct Noop;
        impl crate::Interceptor for Noop {}

        assert_eq!(
            key_for("/u", RequestOptions::new()),
            key_for("/u", RequestOptions::new().interceptor(Noop))
        );
    }

    #[test]
    fn test_binary_body_is_keyed() {
        let a = key_for("/u", RequestOptions::new().bytes(vec![0xff, 0x00]));
        let b = key_for("/u", RequestOptions::new().bytes(vec![0xfe, 0x00]));
        assert_ne!(a, b);
    }
}
