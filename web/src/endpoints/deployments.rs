/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::Context;
use axum::extract::rejection::FormRejection;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::{Extension, Form, Json};
use common::archive::is_gzip;
use common::consts::BUNDLE_CONTENT_TYPE;
use common::database::{
    NewDeployment, completed_deployments, create_deployment, create_raw_bundle, find_raw_bundle,
    previous_completed_deployment,
};
use common::messages::{DeployJobData, enqueue, enqueue_build_or_deploy};
use common::paths;
use common::state::transition;
use common::storage::Acl;
use common::types::*;
use entity::deployment::DeploymentState;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

use super::certs::{check_content_length, multipart_required};
use super::{active_deployment, inherited_js_env_vars};
use crate::error::{WebError, WebResult};
use crate::views::DeploymentJson;

const PAYLOAD_FIELD: &str = "payload";

#[derive(Deserialize, Debug, Default)]
pub struct CreateDeploymentRequest {
    #[serde(default)]
    pub bundle_checksum: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct RollbackRequest {
    #[serde(default)]
    pub version: String,
}

struct SpooledBundle {
    file: NamedTempFile,
    checksum: String,
}

pub fn deployment_response(deployment: &MDeployment, project: &MProject) -> Json<Value> {
    Json(json!({
        "deployment": DeploymentJson::new(deployment, project.active_deployment_id)
    }))
}

/// Moves a freshly uploaded deployment on to the build or deploy queue.
pub async fn start_deployment(
    state: &ServerState,
    project: &MProject,
    deployment: &MDeployment,
) -> WebResult<MDeployment> {
    let deployment = transition(&state.db, deployment, DeploymentState::Uploaded).await?;

    let skipped =
        enqueue_build_or_deploy(state.bus.as_ref(), deployment.id, project.skip_build).await?;

    let next = if skipped {
        DeploymentState::PendingDeploy
    } else {
        DeploymentState::PendingBuild
    };

    Ok(transition(&state.db, &deployment, next).await?)
}

/// Writes the `payload` part to a temporary file while hashing it.
async fn spool_payload(multipart: &mut Multipart) -> WebResult<Option<SpooledBundle>> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| multipart_required())?
    {
        if field.name() != Some(PAYLOAD_FIELD) {
            continue;
        }

        let spool = NamedTempFile::new().context("Failed to create spool file")?;
        let mut file = tokio::fs::File::create(spool.path())
            .await
            .context("Failed to open spool file")?;

        let mut hasher = Sha256::new();
        let mut head: Vec<u8> = Vec::with_capacity(2);

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| WebError::BadRequest(format!("could not read payload: {}", e)))?
        {
            let missing = 2usize.saturating_sub(head.len());
            head.extend(chunk.iter().take(missing));
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .context("Failed to write spool file")?;
        }

        file.flush().await.context("Failed to flush spool file")?;

        if !is_gzip(&head) {
            return Err(WebError::BadRequest(
                "payload is in an unsupported format".to_string(),
            ));
        }

        return Ok(Some(SpooledBundle {
            file: spool,
            checksum: hex::encode(hasher.finalize()),
        }));
    }

    Ok(None)
}

async fn create_from_upload(
    state: &ServerState,
    user: &MUser,
    project: &MProject,
    headers: &HeaderMap,
    req: Request,
) -> WebResult<MDeployment> {
    check_content_length(headers, state.cli.max_upload_size)?;

    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|_| multipart_required())?;

    let bundle = spool_payload(&mut multipart)
        .await?
        .ok_or_else(|| WebError::invalid_param(PAYLOAD_FIELD, "is required"))?;

    let mut deployment = create_deployment(
        &state.db,
        NewDeployment {
            project_id: project.id,
            user_id: user.id,
            state: DeploymentState::PendingUpload,
            raw_bundle_id: None,
            checksum: None,
            js_env_vars: inherited_js_env_vars(&state.db, project).await?,
        },
    )
    .await?;

    let key = paths::raw_bundle_key(&deployment.prefix_id());
    state
        .storage
        .upload_file(&key, bundle.file.path(), Acl::Private, BUNDLE_CONTENT_TYPE)
        .await?;

    let raw_bundle = create_raw_bundle(&state.db, project.id, &bundle.checksum, &key).await?;

    EDeployment::update_many()
        .col_expr(CDeployment::RawBundleId, Expr::value(raw_bundle.id))
        .col_expr(CDeployment::Checksum, Expr::value(bundle.checksum.clone()))
        .filter(CDeployment::Id.eq(deployment.id))
        .exec(&state.db)
        .await?;

    deployment.raw_bundle_id = Some(raw_bundle.id);
    deployment.checksum = Some(bundle.checksum);

    Ok(deployment)
}

async fn create_from_checksum(
    state: &ServerState,
    user: &MUser,
    project: &MProject,
    req: Request,
) -> WebResult<MDeployment> {
    let form = Form::<CreateDeploymentRequest>::from_request(req, &())
        .await
        .map(|Form(f)| f)
        .unwrap_or_default();

    let checksum = form.bundle_checksum.trim();
    if checksum.is_empty() {
        return Err(WebError::BadRequest(
            "could not understand your request".to_string(),
        ));
    }

    let raw_bundle = find_raw_bundle(&state.db, project.id, checksum)
        .await?
        .ok_or_else(|| WebError::invalid_param("bundle_checksum", "the bundle could not be found"))?;

    Ok(create_deployment(
        &state.db,
        NewDeployment {
            project_id: project.id,
            user_id: user.id,
            state: DeploymentState::PendingUpload,
            raw_bundle_id: Some(raw_bundle.id),
            checksum: Some(raw_bundle.checksum),
            js_env_vars: inherited_js_env_vars(&state.db, project).await?,
        },
    )
    .await?)
}

/// Creates a deployment from a multipart `payload` upload or from the
/// checksum of a bundle uploaded before.
#[instrument(skip_all, fields(project = %project.name))]
pub async fn post_deployment(
    state: State<Arc<ServerState>>,
    Extension(user): Extension<MUser>,
    Extension(project): Extension<MProject>,
    headers: HeaderMap,
    req: Request,
) -> WebResult<(StatusCode, Json<Value>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    let deployment = if content_type.starts_with("multipart/form-data") {
        create_from_upload(&state, &user, &project, &headers, req).await?
    } else {
        create_from_checksum(&state, &user, &project, req).await?
    };

    let deployment = start_deployment(&state, &project, &deployment).await?;

    info!(
        deployment_id = deployment.id,
        version = deployment.version,
        checksum = deployment.checksum.as_deref().unwrap_or_default(),
        "Deployment created"
    );

    Ok((
        StatusCode::ACCEPTED,
        deployment_response(&deployment, &project),
    ))
}

pub async fn get_deployments(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
) -> WebResult<Json<Value>> {
    let limit = project.max_deploys_kept.max(0) as u64;
    let deployments = completed_deployments(&state.db, project.id, limit)
        .await?
        .iter()
        .map(|d| DeploymentJson::new(d, project.active_deployment_id))
        .collect::<Vec<_>>();

    Ok(Json(json!({ "deployments": deployments })))
}

pub async fn get_deployment(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
    Path((_, deployment_id)): Path<(String, String)>,
) -> WebResult<Json<Value>> {
    let id = deployment_id
        .parse::<i64>()
        .map_err(|_| WebError::not_found("deployment"))?;

    let deployment = EDeployment::find()
        .filter(CDeployment::Id.eq(id))
        .filter(CDeployment::ProjectId.eq(project.id))
        .filter(CDeployment::DeletedAt.is_null())
        .one(&state.db)
        .await?
        .ok_or_else(|| WebError::not_found("deployment"))?;

    Ok(deployment_response(&deployment, &project))
}

pub async fn get_active_deployment(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
) -> WebResult<Json<Value>> {
    let deployment = active_deployment(&state.db, &project)
        .await?
        .ok_or_else(|| WebError::not_found("active deployment"))?;

    Ok(deployment_response(&deployment, &project))
}

async fn rollback_target(
    state: &ServerState,
    project: &MProject,
    active: &MDeployment,
    version: &str,
) -> WebResult<MDeployment> {
    if version.is_empty() {
        return previous_completed_deployment(&state.db, active)
            .await?
            .ok_or_else(|| {
                WebError::PreconditionFailed(
                    "previous completed deployment could not be found".to_string(),
                )
            });
    }

    let version = version
        .parse::<i64>()
        .map_err(|_| WebError::invalid_param("version", "is not a number"))?;

    let target = EDeployment::find()
        .filter(CDeployment::ProjectId.eq(project.id))
        .filter(CDeployment::Version.eq(version))
        .filter(CDeployment::State.eq(DeploymentState::Deployed))
        .filter(CDeployment::DeletedAt.is_null())
        .one(&state.db)
        .await?
        .ok_or_else(|| {
            WebError::UnprocessableEntity(
                "completed deployment with a given version could not be found".to_string(),
            )
        })?;

    if target.id == active.id {
        return Err(WebError::UnprocessableEntity(
            "the specified deployment is already active".to_string(),
        ));
    }

    Ok(target)
}

/// Points the project back at an earlier deployment, by default the one
/// that was live before the active deployment.
#[instrument(skip_all, fields(project = %project.name))]
pub async fn post_rollback(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
    form: Result<Form<RollbackRequest>, FormRejection>,
) -> WebResult<(StatusCode, Json<Value>)> {
    let form = form.map(|Form(f)| f).unwrap_or_default();

    let active = active_deployment(&state.db, &project)
        .await?
        .ok_or_else(|| {
            WebError::PreconditionFailed("active deployment could not be found".to_string())
        })?;

    let target = rollback_target(&state, &project, &active, form.version.trim()).await?;
    let target = transition(&state.db, &target, DeploymentState::PendingRollback).await?;
    enqueue(state.bus.as_ref(), &DeployJobData::rollback(target.id)).await?;

    info!(
        from_version = active.version,
        to_version = target.version,
        "Rollback requested"
    );

    Ok((StatusCode::ACCEPTED, deployment_response(&target, &project)))
}
