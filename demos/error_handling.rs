//! Example demonstrating error handling across result modes.
//!
//! This example shows how to:
//! - Inspect HTTP errors carried in the combined result
//! - Deal with deserialization failures
//! - Handle timeouts
//! - Return failures as `Err` with a throwing result mode
//! - Observe failures with an interceptor
//!
//! Run with: `cargo run --example error_handling`

use async_trait::async_trait;
use callkit::interceptor::{ErrorContext, InterceptorResult};
use callkit::{Client, Error, ErrorKind, Interceptor, RequestOptions, ResultMode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    id: u32,
    title: String,
}

struct ErrorPrinter;

#[async_trait]
impl Interceptor for ErrorPrinter {
    async fn on_error(&self, context: ErrorContext<'_>) -> InterceptorResult {
        println!(
            "  [interceptor] {} {} -> {}",
            context.request.method, context.request.url, context.error
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("callkit=info")
        .init();

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .options(RequestOptions::new().interceptor(ErrorPrinter))
        .build()?;

    println!("=== Example 1: Handling HTTP Errors ===");
    let output = client.get::<Post>("/posts/999999").await?;
    if let Some(Error::Http {
        status,
        error_data,
        message,
        response,
    }) = output.error()
    {
        println!("HTTP Error!");
        println!("  Status: {}", status);
        println!("  Is client error (4xx): {}", status.is_client_error());
        println!("  Message: {}", message);
        println!("  Error data: {}", error_data);
        println!("  Content-Type: {:?}", response.header("content-type"));
    }
    println!();

    println!("=== Example 2: Handling Deserialization Errors ===");
    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct WrongSchema {
        nonexistent_field: String,
    }

    let output = client.get::<WrongSchema>("/posts/1").await?;
    if let Some(Error::Deserialization {
        raw_response,
        serde_error,
        status,
    }) = output.error()
    {
        println!("Deserialization Failed!");
        println!("  Status: {}", status);
        println!("  Serde error: {}", serde_error);
        println!(
            "  Raw response (first 200 chars): {}",
            raw_response.chars().take(200).collect::<String>()
        );
    }
    println!();

    println!("=== Example 3: Timeouts ===");
    let output = client
        .call::<Post>(
            "/posts/1",
            RequestOptions::new().timeout(Duration::from_millis(1)),
        )
        .await?;
    match output.error() {
        Some(error) if error.kind() == ErrorKind::Timeout => println!("Timed out: {}", error),
        Some(error) => println!("Other error: {}", error),
        None => println!("Finished before the timeout"),
    }
    println!();

    println!("=== Example 4: Throwing Result Mode ===");
    let result = client
        .call::<Post>(
            "/posts/999999",
            RequestOptions::new().result_mode(ResultMode::OnlySuccessWithException),
        )
        .await;
    match result {
        Ok(output) => println!("Success: {:?}", output.into_data()),
        Err(e) => println!("Error ({}): {}", e.kind(), e),
    }

    Ok(())
}
