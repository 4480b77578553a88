/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Queue consumer shared by every worker role.
//!
//! Success and permanent failures are acked. Transient failures are nacked
//! with requeue after [`NACK_DELAY`] so a broken dependency does not turn
//! into a hot redelivery loop.

use async_trait::async_trait;
use common::consts::NACK_DELAY;
use common::error::{ErrorKind, JobResult};
use common::mq::{Delivery, Source};
use common::types::ServerState;
use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[async_trait]
pub trait Handler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn handle(&self, data: &[u8]) -> JobResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Requeue,
}

/// Runs the handler for one delivery and settles it.
pub async fn process<H: Handler + ?Sized>(handler: &H, delivery: &dyn Delivery) -> Settlement {
    let settlement = match handler.handle(delivery.data()).await {
        Ok(()) => Settlement::Ack,
        Err(e) => {
            warn!(
                worker = handler.name(),
                error = %e,
                body = %String::from_utf8_lossy(delivery.data()),
                "Work failed"
            );

            if e.kind != ErrorKind::Conflict {
                sentry::capture_error(&e);
            }

            if e.is_permanent() {
                Settlement::Ack
            } else {
                Settlement::Requeue
            }
        }
    };

    match settlement {
        Settlement::Ack => {
            if let Err(e) = delivery.ack().await {
                warn!(worker = handler.name(), error = %e, "Failed to ack message");
            }
        }
        Settlement::Requeue => {
            tokio::time::sleep(NACK_DELAY).await;
            if let Err(e) = delivery.nack(true).await {
                warn!(worker = handler.name(), error = %e, "Failed to nack message");
            }
        }
    }

    settlement
}

/// Consumes `source` until the stream ends or `shutdown` fires. A delivery
/// that is already being handled is always finished.
pub async fn consume<H: Handler + ?Sized>(
    state: Arc<ServerState>,
    source: Source,
    handler: Arc<H>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut deliveries = state.bus.consume(&source).await?;
    info!(worker = handler.name(), %source, "Worker started listening");

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => {
                info!(worker = handler.name(), "Worker stopping");
                break;
            }
            next = deliveries.next() => next,
        };

        match next {
            Some(Ok(delivery)) => {
                process(handler.as_ref(), delivery.as_ref()).await;
            }
            Some(Err(e)) => {
                error!(worker = handler.name(), error = %e, "Message bus failure");
                return Err(e.into());
            }
            None => break,
        }
    }

    Ok(())
}

/// Starts `concurrency` consumers of `source` and waits for all of them.
/// Consumers stop on SIGINT, SIGTERM or SIGHUP.
pub async fn run<H: Handler + ?Sized>(
    state: Arc<ServerState>,
    source: Source,
    handler: Arc<H>,
    concurrency: usize,
) -> anyhow::Result<()> {
    let _guard = common::init_sentry(&state.cli);
    let shutdown = CancellationToken::new();

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        common::shutdown_signal().await;
        signal_token.cancel();
    });

    let mut consumers = JoinSet::new();
    for _ in 0..concurrency.max(1) {
        consumers.spawn(consume(
            Arc::clone(&state),
            source.clone(),
            Arc::clone(&handler),
            shutdown.child_token(),
        ));
    }

    let mut result = Ok(());
    while let Some(joined) = consumers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                shutdown.cancel();
                result = Err(e);
            }
            Err(e) => {
                shutdown.cancel();
                result = Err(e.into());
            }
        }
    }

    result
}
