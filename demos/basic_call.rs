//! Basic example demonstrating simple GET and POST requests.
//!
//! This example shows how to:
//! - Create a client with base options
//! - Make GET requests and read the combined result
//! - Make POST requests with a JSON body
//! - Use path params and query parameters
//!
//! Run with: `cargo run --example basic_call`

use callkit::{Client, Error, RequestOptions};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter("callkit=debug,basic_call=info")
        .init();

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .timeout(Duration::from_secs(10))
        .build()?;

    println!("=== GET Request Example ===");
    if let Some(result) = client.get::<Post>("/posts/1").await?.into_combined() {
        match (&result.data, &result.error) {
            (Some(post), _) => {
                println!("Post ID: {}", post.id);
                println!("Title: {}", post.title);
            }
            (None, Some(error)) => println!("Failed: {}", error),
            (None, None) => {}
        }
        println!("Attempts: {}", result.attempts);
        println!("Latency: {:?}", result.latency);
        if let Some(response) = &result.response {
            println!("Status code: {}", response.status);
        }
    }
    println!();

    println!("=== POST Request Example ===");
    let new_post = NewPost {
        title: "My New Post".to_string(),
        body: "This is the content of my new post!".to_string(),
        user_id: 1,
    };

    let created = client.post::<_, Post>("/posts", &new_post).await?;
    match created.data() {
        Some(post) => println!("Created post with ID: {}", post.id),
        None => println!("Create failed: {:?}", created.error()),
    }
    println!();

    println!("=== Path Params and Query Example ===");
    let comments = client
        .call::<Vec<serde_json::Value>>(
            "/posts/:id/comments",
            RequestOptions::new().param("id", "1").query("_limit", "3"),
        )
        .await?;
    println!(
        "Fetched {} comments",
        comments.data().map(Vec::len).unwrap_or_default()
    );

    Ok(())
}
