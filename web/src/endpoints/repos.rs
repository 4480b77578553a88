/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Form, Json};
use chrono::Utc;
use common::consts::DEFAULT_BRANCH;
use common::input::random_hex;
use common::types::*;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::error::{WebError, WebResult};
use crate::views::RepoJson;

#[derive(Deserialize, Debug, Default)]
pub struct LinkRepoRequest {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default, alias = "secret")]
    pub webhook_secret: String,
}

async fn find_repo(state: &ServerState, project: &MProject) -> WebResult<Option<MRepo>> {
    Ok(ERepo::find()
        .filter(CRepo::ProjectId.eq(project.id))
        .one(&state.db)
        .await?)
}

pub async fn get_repo(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
) -> WebResult<Json<Value>> {
    let repo = find_repo(&state, &project)
        .await?
        .ok_or_else(|| WebError::not_found("repo"))?;

    Ok(Json(json!({ "repo": RepoJson::new(&repo, &state.cli.webhook_host) })))
}

/// Links a GitHub repository. Pushes to `branch` reach the project through
/// the returned webhook URL.
pub async fn post_repo(
    state: State<Arc<ServerState>>,
    Extension(user): Extension<MUser>,
    Extension(project): Extension<MProject>,
    form: Result<Form<LinkRepoRequest>, FormRejection>,
) -> WebResult<(StatusCode, Json<Value>)> {
    let form = form.map(|Form(f)| f).unwrap_or_default();

    let uri = form.uri.trim();
    if uri.is_empty() {
        return Err(WebError::invalid_param("uri", "is required"));
    }

    if find_repo(&state, &project).await?.is_some() {
        return Err(WebError::Conflict(
            "project is already linked to a repo".to_string(),
        ));
    }

    let branch = match form.branch.trim() {
        "" => DEFAULT_BRANCH.to_string(),
        branch => branch.to_string(),
    };

    let webhook_secret = Some(form.webhook_secret).filter(|s| !s.is_empty());

    let repo = ARepo {
        project_id: Set(project.id),
        user_id: Set(user.id),
        uri: Set(uri.to_string()),
        branch: Set(branch),
        webhook_path: Set(random_hex(16)),
        webhook_secret: Set(webhook_secret),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    info!(project_id = project.id, uri = %repo.uri, branch = %repo.branch, "Repository linked");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "repo": RepoJson::new(&repo, &state.cli.webhook_host) })),
    ))
}

pub async fn delete_repo(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
) -> WebResult<Json<Value>> {
    let repo = find_repo(&state, &project).await?.ok_or_else(|| {
        WebError::NotFound("project not linked to any repository".to_string())
    })?;

    ERepo::delete_by_id(repo.id).exec(&state.db).await?;

    info!(project_id = project.id, uri = %repo.uri, "Repository unlinked");

    Ok(Json(json!({ "deleted": true })))
}
