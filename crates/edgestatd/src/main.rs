//! edgestatd — the edgestat exporter daemon.
//!
//! Wires the upstream client, the refresh cycle, the scheduler and the
//! HTTP route together:
//! - HTTPS upstream client (API key header, per-request timeout)
//! - Refresher (merge + render + snapshot persistence)
//! - Single-flight scheduler with optional background timer
//! - axum server on `0.0.0.0:{port}{path}`
//!
//! # Usage
//!
//! ```text
//! edgestatd --api-key $KEY --service-ids svc1,svc2 --background-interval 30
//! ```

mod cli;
mod logging;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, warn};

use edgestat_api::{ApiConfig, build_router};
use edgestat_core::{ConfigError, ExporterConfig, RefreshKind};
use edgestat_metrics::{Refresher, RefresherConfig, RenderOptions};
use edgestat_scheduler::{RefreshScheduler, SchedulerConfig};
use edgestat_upstream::{HttpUpstream, HttpUpstreamConfig};

use crate::cli::Cli;

/// Snapshot file used by the startup test refresh, inside the temp dir.
const DRY_RUN_FILE: &str = "edgestat.test";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().resolve()?;
    logging::init(config.verbose, config.log_file.as_deref())?;
    debug!(?config, "effective configuration");

    run(config).await
}

async fn run(config: ExporterConfig) -> anyhow::Result<()> {
    info!("edgestat daemon starting");

    let api_key = config
        .api_key
        .clone()
        .ok_or(ConfigError::Missing("api_key"))?;
    let upstream = HttpUpstream::new(HttpUpstreamConfig {
        api_key,
        api_base: config.api_base.clone(),
        rt_base: config.rt_base.clone(),
        timeout: config.upstream_timeout(),
    })?;
    info!(api = %config.api_base, realtime = %config.rt_base, "upstream client initialized");

    let refresher = Arc::new(Refresher::new(
        Arc::new(upstream),
        RefresherConfig {
            service_filter: config.service_filter(),
            ignore: config.ignore_list(),
            render: RenderOptions {
                prefix: config.metric_prefix.clone(),
                ignore_zero_counters: config.ignore_zero_counters,
                percentiles: config.percentile_list()?,
                export_histograms: config.export_histograms,
            },
        },
    ));

    if config.bypass_initial_test {
        info!("initial test refresh bypassed");
    } else {
        dry_run(&refresher).await?;
    }

    // ── Scheduler + API ────────────────────────────────────────

    let output_path = config.output_path();
    let scheduler = Arc::new(RefreshScheduler::spawn(
        refresher,
        SchedulerConfig {
            background_interval: config.background_interval(),
            output_path: output_path.clone(),
        },
    ));

    let router = build_router(
        scheduler.clone(),
        ApiConfig {
            path: config.path.clone(),
            output_path,
        },
    );
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, path = %config.path, "exporter listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    info!("edgestat daemon stopped");
    Ok(())
}

/// One foreground refresh against a throwaway snapshot in the temp dir.
async fn dry_run(refresher: &Refresher) -> anyhow::Result<()> {
    let path = std::env::temp_dir().join(DRY_RUN_FILE);
    info!(path = %path.display(), "running initial test refresh");

    let outcome = refresher.refresh(RefreshKind::Foreground, &path).await;
    if let Err(e) = tokio::fs::remove_file(&path).await
        && e.kind() != io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove test snapshot");
    }

    let text = outcome.context("initial test refresh failed")?;
    info!(bytes = text.len(), "initial test refresh succeeded");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
