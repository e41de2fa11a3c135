//! Demo driving buffered increments against the in-memory backends.
//!
//! Run with:
//! ```bash
//! cargo run --example flush_demo --features demo -- --help
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use incrementi::stores::{MemoryCounterStore, MemoryDocumentStore};
use incrementi::{BufferedIncrements, FlushConfig};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Buffered write-back increments demo.
#[derive(Debug, Parser)]
#[command(name = "flush_demo", version, about)]
struct Args {
    /// Number of target documents.
    #[arg(long, default_value_t = 4)]
    entities: usize,

    /// Concurrent workers issuing increments.
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Increments issued by each worker.
    #[arg(long, default_value_t = 10_000)]
    increments: usize,

    /// Flush interval in milliseconds.
    #[arg(long, env = "INCREMENTI_FLUSH_MS", default_value_t = 200)]
    flush_ms: u64,

    /// Field path to increment.
    #[arg(long, default_value = "stats.totalCU")]
    field: String,

    /// Log level when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("incrementi={},flush_demo=info", args.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let users = Arc::new(MemoryDocumentStore::new("users"));
    for e in 0..args.entities {
        users.insert(format!("user-{e}"), json!({ "stats": {} }));
    }

    let config = FlushConfig::new(Duration::from_millis(args.flush_ms));
    let engine = Arc::new(BufferedIncrements::new(
        users.clone(),
        Arc::new(MemoryCounterStore::new()),
        config,
    )?);

    info!(
        entities = args.entities,
        workers = args.workers,
        increments = args.increments,
        "issuing increments"
    );

    let mut handles = vec![];
    for w in 0..args.workers {
        let engine = Arc::clone(&engine);
        let field = args.field.clone();
        let entities = args.entities.max(1);
        let increments = args.increments;
        handles.push(tokio::spawn(async move {
            for i in 0..increments {
                let id = format!("user-{}", (w + i) % entities);
                engine.increment(&id, &field, 1.0).await?;
            }
            Ok::<_, incrementi::Error>(())
        }));
    }
    for handle in handles {
        handle.await??;
    }

    let engine = Arc::into_inner(engine).ok_or("engine still shared")?;
    let metrics = engine.metrics();
    let final_drain = engine.shutdown().await?;
    info!(?final_drain, "engine shut down");

    for e in 0..args.entities {
        let id = format!("user-{e}");
        info!(id = %id, value = ?users.field(&id, &args.field), "flushed");
    }
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    println!(
        "writes to durable store: {} (increments issued: {})",
        users.write_count(),
        args.workers * args.increments
    );

    Ok(())
}
