/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod acme;
pub mod archive;
pub mod certs;
pub mod consts;
pub mod crypt;
pub mod database;
pub mod error;
pub mod input;
pub mod messages;
pub mod mime;
pub mod mq;
pub mod paths;
pub mod state;
pub mod storage;
pub mod types;

use anyhow::{Context, Result};
use clap::Parser;
use database::connect_db;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use types::*;

pub async fn init_state() -> Result<Arc<ServerState>> {
    let cli = Cli::parse();
    init_logging(&cli);

    info!(role = ?cli.role, "Starting PubStorm");

    let db = connect_db(&cli).await?;
    let storage = Arc::new(storage::S3BlobStore::new(&cli)?);
    let bus = Arc::new(
        mq::AmqpBus::connect(&cli.amqp_url)
            .await
            .context("failed to connect to message bus")?,
    );
    let encrypter =
        crypt::AesEncrypter::from_file(&cli.aes_key_file).context("failed to load AES key")?;
    let acme = Arc::new(acme::HttpAcmeClient::new(&cli.acme_url)?);

    Ok(Arc::new(ServerState {
        db,
        cli,
        storage,
        bus,
        encrypter,
        acme,
    }))
}

/// `RUST_LOG` wins over the configured level.
pub fn init_logging(cli: &Cli) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone()),
    );

    if cli.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

pub fn init_sentry(cli: &Cli) -> Option<sentry::ClientInitGuard> {
    if !cli.report_errors {
        return None;
    }

    cli.sentry_dsn.as_deref().map(sentry::init)
}

/// Resolves on SIGINT, SIGTERM or SIGHUP.
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            return;
        }
    };
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGHUP handler");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
        _ = terminate.recv() => info!("received SIGTERM"),
        _ = hangup.recv() => info!("received SIGHUP"),
    }
}
