/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use common::init_state;
use common::types::Role;
use std::sync::Arc;
use tracing::error;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let state = init_state().await?;

    let result = match state.cli.role {
        Role::Serve => web::serve_web(Arc::clone(&state)).await,
        Role::PushWorker => worker::run_push_worker(Arc::clone(&state)).await,
        Role::BuildWorker => worker::run_build_worker(Arc::clone(&state)).await,
        Role::DeployWorker => worker::run_deploy_worker(Arc::clone(&state)).await,
        Role::Edged => worker::run_edged(Arc::clone(&state)).await,
        Role::RenewCerts => jobs::run_renew_certs(Arc::clone(&state)).await,
        Role::PurgeDeploys => jobs::run_purge_deploys(Arc::clone(&state)).await,
    };

    if let Err(e) = &result {
        error!(error = %format!("{:#}", e), role = ?state.cli.role, "Exited with error");
    }

    result
}
