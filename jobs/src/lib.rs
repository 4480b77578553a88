/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod acme_renewal;
pub mod purger;

use common::init_sentry;
use common::types::ServerState;
use std::sync::Arc;

/// One renewal pass over every cert expiring within the threshold.
pub async fn run_renew_certs(state: Arc<ServerState>) -> anyhow::Result<()> {
    let _guard = init_sentry(&state.cli);

    acme_renewal::renew_expiring(state).await?;
    Ok(())
}

/// One purge pass over every soft-deleted deployment.
pub async fn run_purge_deploys(state: Arc<ServerState>) -> anyhow::Result<()> {
    let _guard = init_sentry(&state.cli);

    purger::purge_deleted(state).await?;
    Ok(())
}
