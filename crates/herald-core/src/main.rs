// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Herald - laboratory record orchestration
//!
//! Opens the record stores, rebuilds the runtime state, and announces any
//! records still waiting on the sequencing or basecalling services.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use herald_core::config::Config;
use herald_core::services::default_registry;
use herald_core::{Orchestrator, RecordKind, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("herald_core=info".parse()?),
        )
        .init();

    info!("Starting Herald");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        store_dir = %config.store_dir.display(),
        max_entries = config.max_entries,
        sequence_addr = %config.sequence_addr,
        basecall_addr = %config.basecall_addr,
        "Configuration loaded"
    );

    // Open storage and build the service catalogue
    let storage = Storage::open(&config.store_dir, config.max_entries).await?;
    let registry = default_registry(&config).map_err(|e| {
        error!("Service registration failed: {}", e);
        e
    })?;

    let orchestrator = Orchestrator::builder()
        .storage(storage)
        .registry(Arc::new(registry))
        .request_timeout(config.request_timeout)
        .build()?;

    orchestrator.rebuild().await?;

    let runs = orchestrator.counts(RecordKind::Run).await;
    let samples = orchestrator.counts(RecordKind::Sample).await;
    info!(
        runs = runs.total,
        runs_announced = runs.announced,
        samples = samples.total,
        samples_announced = samples.announced,
        queued = orchestrator.queue_len().await,
        "Records loaded"
    );

    if orchestrator.queue_len().await > 0 {
        match orchestrator.announce().await {
            Ok(report) => info!(
                runs = report.runs,
                samples = report.samples,
                requests = report.requests,
                "Announcement complete"
            ),
            Err(e) => warn!(code = e.error_code(), "Announcement incomplete: {}", e),
        }
    } else {
        info!("Nothing to announce");
    }

    orchestrator.close().await?;
    info!("Shutdown complete");

    Ok(())
}
