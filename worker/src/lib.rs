/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod build;
pub mod consumer;
pub mod deploy;
pub mod github;
pub mod invalidator;
pub mod optimizer;
pub mod push;

use common::consts::*;
use common::database::ProjectLock;
use common::error::{ErrorKind, JobError, JobResult};
use common::mq::Source;
use common::types::*;
use sea_orm::EntityTrait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use tracing::error;

pub fn decode<J: DeserializeOwned>(data: &[u8]) -> JobResult<J> {
    serde_json::from_slice(data)
        .map_err(|e| JobError::new(ErrorKind::Validation, format!("invalid job payload: {}", e)))
}

/// Soft-deleted deployments count as gone.
pub async fn load_deployment(state: &ServerState, id: i64) -> JobResult<MDeployment> {
    EDeployment::find_by_id(id)
        .one(&state.db)
        .await?
        .filter(|d| d.deleted_at.is_none())
        .ok_or_else(|| JobError::not_found(format!("deployment {} not found", id)))
}

pub async fn load_project(state: &ServerState, id: i64) -> JobResult<MProject> {
    EProject::find_by_id(id)
        .one(&state.db)
        .await?
        .filter(|p| p.deleted_at.is_none())
        .ok_or_else(|| JobError::not_found(format!("project {} not found", id)))
}

/// Runs `work` while holding the project lock. Contention is a conflict, which
/// the consumer requeues. A dropped future still releases the lock.
pub async fn with_project_lock<T, F>(
    state: &Arc<ServerState>,
    project_id: i64,
    work: F,
) -> JobResult<T>
where
    F: Future<Output = JobResult<T>>,
{
    let Some(lock) = ProjectLock::acquire(state, project_id).await? else {
        return Err(JobError::new(ErrorKind::Conflict, "project is locked"));
    };

    let result = work.await;

    if let Err(e) = lock.release().await {
        error!(error = %e, project_id, "Failed to unlock project");
    }

    result
}

pub async fn run_push_worker(state: Arc<ServerState>) -> anyhow::Result<()> {
    let github = Arc::new(github::HttpGithubFetcher::new(&state.cli)?);
    let handler = Arc::new(push::PushWorker::new(Arc::clone(&state), github));
    let concurrency = state.cli.consumer_concurrency;

    consumer::run(state, Source::Queue(QUEUE_PUSH.to_string()), handler, concurrency).await
}

pub async fn run_build_worker(state: Arc<ServerState>) -> anyhow::Result<()> {
    let optimizer = Arc::new(optimizer::DockerOptimizer::new(&state.cli));
    let handler = Arc::new(build::BuildWorker::new(Arc::clone(&state), optimizer));
    let concurrency = state.cli.consumer_concurrency;

    consumer::run(state, Source::Queue(QUEUE_BUILD.to_string()), handler, concurrency).await
}

pub async fn run_deploy_worker(state: Arc<ServerState>) -> anyhow::Result<()> {
    let handler = Arc::new(deploy::DeployWorker::new(Arc::clone(&state)));
    let concurrency = state.cli.consumer_concurrency;

    consumer::run(state, Source::Queue(QUEUE_DEPLOY.to_string()), handler, concurrency).await
}

pub async fn run_edged(state: Arc<ServerState>) -> anyhow::Result<()> {
    let handler = Arc::new(invalidator::Invalidator::new(&state.cli.edge_api_host)?);
    let source = Source::Exchange {
        exchange: EXCHANGE_EDGES.to_string(),
        route: ROUTE_INVALIDATION.to_string(),
    };

    consumer::run(state, source, handler, 1).await
}
