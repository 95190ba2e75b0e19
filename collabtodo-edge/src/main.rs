//! `CollabTodo` edge validator -- re-checks task access for trusted callers.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100 with an empty token directory
//! cargo run --bin collabtodo-edge
//!
//! # Serve tokens and tasks from a seed file
//! cargo run --bin collabtodo-edge -- --bind 127.0.0.1:8080 --seed-file seed.json
//! ```

use std::sync::Arc;

use clap::Parser;
use collabtodo_edge::config::{EdgeCliArgs, EdgeConfig};
use collabtodo_edge::server;
use collabtodo_edge::store::MemoryBackend;
use collabtodo_edge::validator::AccessValidator;

#[tokio::main]
async fn main() {
    let cli = EdgeCliArgs::parse();

    let config = match EdgeConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let backend = match &config.seed_file {
        Some(path) => match MemoryBackend::from_seed_file(path) {
            Ok(backend) => backend,
            Err(e) => {
                tracing::error!(error = %e, "failed to load seed data");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("no seed file configured; every token will be rejected");
            MemoryBackend::new()
        }
    };
    let (tokens, tasks) = backend.counts().await;
    tracing::info!(
        addr = %config.bind_addr,
        cutoff_hours = config.delete_cutoff.num_hours(),
        tokens,
        tasks,
        "starting collabtodo edge validator"
    );

    let validator = Arc::new(AccessValidator::with_delete_cutoff(
        Arc::new(backend),
        config.delete_cutoff,
    ));

    match server::start_server_with_state(&config.bind_addr, validator).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "edge validator listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "edge server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start edge server");
            std::process::exit(1);
        }
    }
}
