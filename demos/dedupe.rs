//! Example demonstrating duplicate request cancellation.
//!
//! Two identical requests are started back to back. The second one aborts the
//! first, which resolves as a cancellation, while the second completes. With
//! deduplication turned off, both complete.
//!
//! Run with: `cargo run --example dedupe`

use callkit::{Client, DedupeStrategy, Error, ErrorKind, RequestOptions};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Todo {
    id: u32,
    title: String,
    completed: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("callkit=debug,dedupe=info")
        .init();

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .build()?;

    println!("=== Duplicate requests (cancel) ===");
    let (first, second) = tokio::join!(client.get::<Todo>("/todos/1"), async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        client.get::<Todo>("/todos/1").await
    });

    for (label, output) in [("first", first?), ("second", second?)] {
        match output.error() {
            Some(error) if error.kind() == ErrorKind::Cancelled => {
                println!("{label}: cancelled ({})", error.message())
            }
            Some(error) => println!("{label}: failed ({error})"),
            None => println!("{label}: {:?}", output.data()),
        }
    }
    println!();

    println!("=== Duplicate requests (no dedupe) ===");
    let options = || RequestOptions::new().dedupe_strategy(DedupeStrategy::None);
    let (first, second) = tokio::join!(
        client.call::<Todo>("/todos/1", options()),
        client.call::<Todo>("/todos/1", options()),
    );
    println!("first succeeded: {}", first?.error().is_none());
    println!("second succeeded: {}", second?.error().is_none());

    println!("In-flight requests left: {}", client.registry().len());

    Ok(())
}
