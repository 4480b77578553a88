/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use chrono::Utc;
use common::archive::{pack_dir, sha256_file, unpack_subtree};
use common::consts::*;
use common::database::create_raw_bundle;
use common::error::{ErrorKind, JobError, JobResult};
use common::messages::{PushJobData, enqueue_build_or_deploy};
use common::paths;
use common::state::{fail, transition};
use common::storage::Acl;
use common::types::*;
use entity::deployment::DeploymentState;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::Deserialize;
use std::fs::File;
use std::sync::Arc;
use tracing::{info, instrument};

use super::consumer::Handler;
use super::github::{GithubFetcher, ProjectConfig, tarball_url};
use super::{decode, load_deployment, load_project};

#[derive(Debug, Deserialize)]
struct PushPayload {
    after: String,
    repository: PushRepository,
}

#[derive(Debug, Deserialize)]
struct PushRepository {
    full_name: String,
    archive_url: String,
}

/// Turns a GitHub push into a raw bundle.
pub struct PushWorker {
    state: Arc<ServerState>,
    github: Arc<dyn GithubFetcher>,
}

impl PushWorker {
    pub fn new(state: Arc<ServerState>, github: Arc<dyn GithubFetcher>) -> Self {
        Self { state, github }
    }

    #[instrument(skip(self), fields(push_id = job.push_id))]
    pub async fn work(&self, job: PushJobData) -> JobResult {
        let state = &self.state;

        let push = EPush::find_by_id(job.push_id)
            .one(&state.db)
            .await?
            .ok_or_else(|| JobError::not_found(format!("push {} not found", job.push_id)))?;

        ERepo::find_by_id(push.repo_id)
            .one(&state.db)
            .await?
            .ok_or_else(|| JobError::not_found(format!("repo {} not found", push.repo_id)))?;

        let deployment = load_deployment(state, push.deployment_id).await?;
        if deployment.state != DeploymentState::PendingUpload {
            return Err(JobError::new(
                ErrorKind::Precondition,
                format!(
                    "deployment {} is in unexpected state {}",
                    deployment.id, deployment.state
                ),
            ));
        }

        let project = load_project(state, deployment.project_id).await?;

        let payload: PushPayload = serde_json::from_str(&push.payload).map_err(|e| {
            JobError::new(ErrorKind::Validation, format!("invalid push payload: {}", e))
        })?;

        let subdir = match self
            .github
            .project_config(&payload.repository.full_name, &payload.after)
            .await?
        {
            ProjectConfig::Found { path } => path,
            ProjectConfig::Missing => {
                fail(&state.db, &deployment, DeploymentState::DeployFailed, MSG_MISSING_PUBSTORM_JSON)
                    .await?;
                return Err(JobError::new(
                    ErrorKind::PermanentExternal,
                    "pubstorm.json not found in repository",
                ));
            }
            ProjectConfig::Invalid => {
                fail(&state.db, &deployment, DeploymentState::DeployFailed, MSG_INVALID_PUBSTORM_JSON)
                    .await?;
                return Err(JobError::new(
                    ErrorKind::PermanentExternal,
                    "pubstorm.json is invalid",
                ));
            }
        };

        let url = tarball_url(&payload.repository.archive_url, &payload.after);
        let tmp = tempfile::tempdir()
            .map_err(|e| JobError::internal(format!("Failed to create temp dir: {}", e)))?;
        let archive_path = tmp.path().join("github-archive.tar.gz");
        let site_dir = tmp.path().join("site");
        let bundle_path = tmp.path().join(RAW_BUNDLE_FILE);

        let size = self.github.download_archive(&url, &archive_path).await?;
        info!(size, url = %url, "Downloaded repository archive");

        let unpack_result = {
            let archive_path = archive_path.clone();
            let site_dir = site_dir.clone();
            let bundle_path = bundle_path.clone();
            tokio::task::spawn_blocking(move || {
                std::fs::create_dir_all(&site_dir)
                    .map_err(common::archive::ArchiveError::Unarchive)?;
                let file =
                    File::open(&archive_path).map_err(common::archive::ArchiveError::Unarchive)?;
                // GitHub wraps the tree in a single `<owner>-<repo>-<sha>/` directory.
                let files = unpack_subtree(file, &site_dir, 1, &subdir)?;
                pack_dir(&site_dir, &bundle_path)?;
                let checksum =
                    sha256_file(&bundle_path).map_err(common::archive::ArchiveError::Archive)?;
                Ok::<_, common::archive::ArchiveError>((files.len(), checksum))
            })
            .await
            .map_err(|e| JobError::internal(format!("unpack task failed: {}", e)))?
        };

        let (files, checksum) = match unpack_result {
            Ok(packed) => packed,
            Err(e) => {
                fail(
                    &state.db,
                    &deployment,
                    DeploymentState::DeployFailed,
                    "Failed to unpack the repository archive.",
                )
                .await?;
                return Err(JobError::new(ErrorKind::PermanentExternal, e.to_string()));
            }
        };

        info!(files, checksum = %checksum, "Repacked repository subtree");

        let key = paths::raw_bundle_key(&deployment.prefix_id());
        state
            .storage
            .upload_file(&key, &bundle_path, Acl::Private, BUNDLE_CONTENT_TYPE)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        let raw_bundle = create_raw_bundle(&state.db, project.id, &checksum, &key).await?;
        EDeployment::update_many()
            .col_expr(CDeployment::RawBundleId, Expr::value(raw_bundle.id))
            .col_expr(CDeployment::Checksum, Expr::value(checksum))
            .filter(CDeployment::Id.eq(deployment.id))
            .exec(&state.db)
            .await?;

        let deployment = transition(&state.db, &deployment, DeploymentState::Uploaded).await?;

        let skipped = enqueue_build_or_deploy(state.bus.as_ref(), deployment.id, project.skip_build).await?;
        let next = if skipped {
            DeploymentState::PendingDeploy
        } else {
            DeploymentState::PendingBuild
        };
        transition(&state.db, &deployment, next).await?;

        EPush::update_many()
            .col_expr(CPush::ProcessedAt, Expr::value(Utc::now().naive_utc()))
            .filter(CPush::Id.eq(push.id))
            .exec(&state.db)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl Handler for PushWorker {
    fn name(&self) -> &'static str {
        "push"
    }

    async fn handle(&self, data: &[u8]) -> JobResult {
        self.work(decode(data)?).await
    }
}
