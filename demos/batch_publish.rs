//! Batch publishing - throughput with a bounded backlog.
//!
//! This example demonstrates:
//! - Loading client settings from JSON
//! - A named producer that resumes its publishing sequence
//! - Driving confirmations with a callback while publishing
//!
//! # Running
//!
//! ```text
//! RUST_LOG=info cargo run --example batch_publish
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use streamwire_client::{
    ClientConfig, Environment, Message, ProducerOptions, StreamError, StreamOptions,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const STREAM: &str = "batch-publish";
const TOTAL: usize = 100_000;
const BATCH: usize = 500;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ClientConfig::from_json(
        r#"{
            "host": "localhost",
            "port": 5552,
            "connection_name": "batch-publish-demo",
            "request_timeout": 5000
        }"#,
    )?;
    let environment = Environment::connect(config).await?;

    match environment.declare_stream(STREAM, StreamOptions::default()).await {
        Ok(()) | Err(StreamError::StreamAlreadyExists(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let options = ProducerOptions::new()
        .name("batch-publish-demo")
        .batch_size(BATCH)
        .max_unconfirmed(BATCH * 20)
        .backlog_timeout(Duration::from_secs(10));
    let producer = environment.create_producer(STREAM, options).await?;

    let confirmed = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let watcher = {
        let confirmed = confirmed.clone();
        let failed = failed.clone();
        producer.on_confirmation(move |group| {
            for c in group {
                if c.status.is_confirmed() {
                    confirmed.fetch_add(1, Ordering::Relaxed);
                } else {
                    failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        })?
    };

    let start = Instant::now();
    for round in 0..TOTAL / BATCH {
        let batch = (0..BATCH)
            .map(|i| Message::new(format!("message {}", round * BATCH + i)))
            .collect();
        producer.batch_publish(batch).await?;
    }

    while confirmed.load(Ordering::Relaxed) + failed.load(Ordering::Relaxed) < TOTAL {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let elapsed = start.elapsed();
    info!(
        confirmed = confirmed.load(Ordering::Relaxed),
        failed = failed.load(Ordering::Relaxed),
        elapsed_ms = elapsed.as_millis() as u64,
        rate = (TOTAL as f64 / elapsed.as_secs_f64()) as u64,
        "done"
    );

    producer.close().await?;
    let _ = watcher.await;
    environment.close().await?;
    Ok(())
}
