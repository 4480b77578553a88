/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Removes the blobs of soft-deleted deployments.

use anyhow::{Context, Result};
use chrono::Utc;
use common::paths;
use common::types::*;
use entity::deployment::DeploymentState;
use futures::StreamExt;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::{error, info, instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeTally {
    pub found: usize,
    pub purged: usize,
    pub failed: usize,
}

/// Soft-deleted deployments that went live at some point and still have
/// blobs in storage.
pub async fn find_purgeable(state: &ServerState) -> Result<Vec<MDeployment>> {
    EDeployment::find()
        .filter(CDeployment::DeletedAt.is_not_null())
        .filter(CDeployment::PurgedAt.is_null())
        .filter(CDeployment::State.eq(DeploymentState::Deployed))
        .order_by_asc(CDeployment::Id)
        .all(&state.db)
        .await
        .context("Failed to query purgeable deployments")
}

#[instrument(skip(state, deployment), fields(deployment_id = deployment.id))]
pub async fn purge(state: &ServerState, deployment: &MDeployment) -> Result<usize> {
    let prefix = paths::deployment_prefix(&deployment.prefix_id());

    let removed = state
        .storage
        .delete_prefix(&prefix)
        .await
        .with_context(|| format!("Failed to delete objects below {}", prefix))?;

    let now = Utc::now().naive_utc();

    EDeployment::update_many()
        .col_expr(CDeployment::PurgedAt, Expr::value(now))
        .filter(CDeployment::Id.eq(deployment.id))
        .exec(&state.db)
        .await
        .context("Failed to mark deployment purged")?;

    // the bundle object is gone, so drop its dedup entry as well
    ERawBundle::update_many()
        .col_expr(CRawBundle::DeletedAt, Expr::value(now))
        .filter(CRawBundle::UploadedPath.starts_with(format!("{}/", prefix)))
        .filter(CRawBundle::DeletedAt.is_null())
        .exec(&state.db)
        .await
        .context("Failed to delete raw bundle")?;

    info!(prefix = %prefix, removed, "Purged deployment");
    Ok(removed)
}

/// Purges with at most `purge_workers` deployments in flight.
pub async fn purge_deleted(state: Arc<ServerState>) -> Result<PurgeTally> {
    let deployments = find_purgeable(&state).await?;
    info!(count = deployments.len(), "Found soft-deleted deployments to purge");

    let results = futures::stream::iter(deployments.iter())
        .map(|deployment| {
            let state = &state;
            async move { (deployment.id, purge(state, deployment).await) }
        })
        .buffer_unordered(state.cli.purge_workers.max(1))
        .collect::<Vec<_>>()
        .await;

    let mut tally = PurgeTally {
        found: results.len(),
        ..Default::default()
    };

    for (id, result) in results {
        match result {
            Ok(_) => tally.purged += 1,
            Err(e) => {
                error!(error = %format!("{:#}", e), deployment_id = id, "Failed to purge deployment");
                sentry::capture_message(
                    &format!("failed to purge deployment {}: {:#}", id, e),
                    sentry::Level::Error,
                );
                tally.failed += 1;
            }
        }
    }

    info!(
        found = tally.found,
        purged = tally.purged,
        failed = tally.failed,
        "Purged soft-deleted deployments"
    );

    Ok(tally)
}
