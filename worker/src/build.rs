/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use chrono::Utc;
use common::archive::{pack_dir, unpack_tar_gz};
use common::consts::*;
use common::database::{domain_names_with_protocol, raw_bundle_key};
use common::error::{ErrorKind, JobError, JobResult};
use common::messages::{BuildJobData, DeployJobData, enqueue};
use common::paths;
use common::state::{fail, transition};
use common::storage::{Acl, StorageError};
use common::types::*;
use entity::deployment::DeploymentState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::consumer::Handler;
use super::optimizer::{self, OptimizerFactory, OptimizerOutcome};
use super::{decode, load_deployment, load_project, with_project_lock};

/// Runs the optimizer over a raw bundle and hands the result to the deployer.
pub struct BuildWorker {
    state: Arc<ServerState>,
    optimizer: Arc<dyn OptimizerFactory>,
    timeout: Duration,
}

impl BuildWorker {
    pub fn new(state: Arc<ServerState>, optimizer: Arc<dyn OptimizerFactory>) -> Self {
        Self {
            state,
            optimizer,
            timeout: OPTIMIZER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[instrument(skip(self), fields(deployment_id = job.deployment_id))]
    pub async fn work(&self, job: BuildJobData) -> JobResult {
        let deployment = load_deployment(&self.state, job.deployment_id).await?;
        expect_pending_build(&deployment)?;

        let project = load_project(&self.state, deployment.project_id).await?;

        with_project_lock(&self.state, project.id, self.build(job.deployment_id, &project)).await
    }

    async fn build(&self, deployment_id: i64, project: &MProject) -> JobResult {
        let state = &self.state;

        let deployment = load_deployment(state, deployment_id).await?;
        expect_pending_build(&deployment)?;

        let prefix_id = deployment.prefix_id();
        let bundle_key = raw_bundle_key(&state.db, &deployment).await?;

        let tmp = tempfile::tempdir()
            .map_err(|e| JobError::internal(format!("Failed to create temp dir: {}", e)))?;
        let raw_path = tmp.path().join(RAW_BUNDLE_FILE);
        let optimized_path = tmp.path().join(OPTIMIZED_BUNDLE_FILE);
        let src_dir = tmp.path().join(&prefix_id);

        state
            .storage
            .download_to(&bundle_key, &raw_path)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(key) => {
                    JobError::not_found(format!("raw bundle {} not found", key))
                }
                e => JobError::transient(e.to_string()),
            })?;

        let unpacked = {
            let raw_path = raw_path.clone();
            let src_dir = src_dir.clone();
            tokio::task::spawn_blocking(move || unpack_tar_gz(&raw_path, &src_dir))
                .await
                .map_err(|e| JobError::internal(format!("unpack task failed: {}", e)))?
        };

        let files = match unpacked {
            Ok(files) => files,
            Err(e) => {
                fail(&state.db, &deployment, DeploymentState::BuildFailed, "Failed to unarchive file")
                    .await?;
                return Err(JobError::new(ErrorKind::PermanentExternal, e.to_string()));
            }
        };

        tokio::fs::create_dir_all(&src_dir)
            .await
            .map_err(|e| JobError::internal(e.to_string()))?;

        let domains = domain_names_with_protocol(&state.db, project, &state.cli.default_domain).await?;
        let container = format!("{}-{}", prefix_id, Utc::now().timestamp());

        info!(files = files.len(), container = %container, "Optimizing bundle");
        let outcome = optimizer::run(
            self.optimizer.as_ref(),
            &container,
            &src_dir,
            &domains,
            self.timeout,
        )
        .await?;

        let errors = match outcome {
            OptimizerOutcome::Completed { errors } => errors,
            OptimizerOutcome::TimedOut => {
                return self.ship_raw(&deployment, MSG_OPTIMIZER_TIMEOUT.to_string()).await;
            }
            OptimizerOutcome::Crashed { status, errors } => {
                warn!(%status, "Optimizer crashed");
                let message = std::iter::once(MSG_OPTIMIZER_FAILED.to_string())
                    .chain(errors)
                    .collect::<Vec<_>>()
                    .join("\n");
                return self.ship_raw(&deployment, message).await;
            }
        };

        {
            let src_dir = src_dir.clone();
            let optimized_path = optimized_path.clone();
            tokio::task::spawn_blocking(move || pack_dir(&src_dir, &optimized_path))
                .await
                .map_err(|e| JobError::internal(format!("pack task failed: {}", e)))?
                .map_err(|e| JobError::internal(e.to_string()))?;
        }

        state
            .storage
            .upload_file(
                &paths::optimized_bundle_key(&prefix_id),
                &optimized_path,
                Acl::Private,
                BUNDLE_CONTENT_TYPE,
            )
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        // Reported errors fail the build but the optimized output still ships.
        if !errors.is_empty() {
            let message = errors.join("\n");
            warn!(error_message = %message, "Optimizer reported errors");
            let failed = fail(&state.db, &deployment, DeploymentState::BuildFailed, &message).await?;
            enqueue(state.bus.as_ref(), &DeployJobData::new(failed.id)).await?;
            return Ok(());
        }

        let built = transition(&state.db, &deployment, DeploymentState::Built).await?;
        enqueue(state.bus.as_ref(), &DeployJobData::new(built.id)).await?;
        transition(&state.db, &built, DeploymentState::PendingDeploy).await?;

        Ok(())
    }

    /// Fails the build and deploys the raw bundle as uploaded.
    async fn ship_raw(&self, deployment: &MDeployment, message: String) -> JobResult {
        warn!(error_message = %message, "Shipping raw bundle");
        let state = &self.state;
        let failed = fail(&state.db, deployment, DeploymentState::BuildFailed, &message).await?;
        enqueue(state.bus.as_ref(), &DeployJobData::raw(failed.id)).await?;
        Ok(())
    }
}

fn expect_pending_build(deployment: &MDeployment) -> JobResult {
    if deployment.state != DeploymentState::PendingBuild {
        return Err(JobError::new(
            ErrorKind::Precondition,
            format!(
                "deployment {} is in unexpected state {}",
                deployment.id, deployment.state
            ),
        ));
    }

    Ok(())
}

#[async_trait]
impl Handler for BuildWorker {
    fn name(&self) -> &'static str {
        "build"
    }

    async fn handle(&self, data: &[u8]) -> JobResult {
        self.work(decode(data)?).await
    }
}
