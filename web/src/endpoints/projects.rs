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
use common::consts::DEFAULT_MAX_DEPLOYS_KEPT;
use common::input::{default_domain_name, validate_project_name};
use common::messages::{DeployJobData, enqueue, publish_invalidation};
use common::paths;
use common::types::*;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

use super::parse_bool;
use crate::error::{FieldErrors, WebError, WebResult};
use crate::views::ProjectJson;

#[derive(Deserialize, Debug, Default)]
pub struct MakeProjectRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct BasicAuthRequest {
    #[serde(default)]
    pub basic_auth_username: String,
    #[serde(default)]
    pub basic_auth_password: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct PatchProjectRequest {
    pub default_domain_enabled: Option<String>,
    pub force_https: Option<String>,
    pub skip_build: Option<String>,
}

pub async fn post_projects(
    state: State<Arc<ServerState>>,
    Extension(user): Extension<MUser>,
    form: Result<Form<MakeProjectRequest>, FormRejection>,
) -> WebResult<(StatusCode, Json<Value>)> {
    let form = form.map(|Form(f)| f).unwrap_or_default();
    let name = validate_project_name(&form.name).map_err(|e| WebError::invalid_param("name", e))?;

    let existing = EProject::find()
        .filter(CProject::Name.eq(name.as_str()))
        .one(&state.db)
        .await?;

    if existing.is_some() {
        return Err(WebError::invalid_param("name", "is taken"));
    }

    let now = Utc::now().naive_utc();
    let project = AProject {
        user_id: Set(user.id),
        name: Set(name),
        active_deployment_id: Set(None),
        locked_at: Set(None),
        skip_build: Set(false),
        max_deploys_kept: Set(DEFAULT_MAX_DEPLOYS_KEPT),
        default_domain_enabled: Set(true),
        force_https: Set(false),
        watermark: Set(true),
        basic_auth_username: Set(None),
        encrypted_basic_auth_password: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    info!(project_id = project.id, user_id = user.id, "Project created");

    Ok((
        StatusCode::CREATED,
        Json(json!({ "project": ProjectJson::from(&project) })),
    ))
}

pub async fn get_projects(
    state: State<Arc<ServerState>>,
    Extension(user): Extension<MUser>,
) -> WebResult<Json<Value>> {
    let projects = EProject::find()
        .filter(CProject::UserId.eq(user.id))
        .filter(CProject::DeletedAt.is_null())
        .order_by_asc(CProject::Name)
        .all(&state.db)
        .await?;

    let shared_ids = ECollab::find()
        .filter(CCollab::UserId.eq(user.id))
        .all(&state.db)
        .await?
        .into_iter()
        .map(|c| c.project_id)
        .collect::<Vec<i64>>();

    let shared_projects = if shared_ids.is_empty() {
        Vec::new()
    } else {
        EProject::find()
            .filter(CProject::Id.is_in(shared_ids))
            .filter(CProject::DeletedAt.is_null())
            .order_by_asc(CProject::Name)
            .all(&state.db)
            .await?
    };

    Ok(Json(json!({
        "projects": projects.iter().map(ProjectJson::from).collect::<Vec<_>>(),
        "shared_projects": shared_projects.iter().map(ProjectJson::from).collect::<Vec<_>>(),
    })))
}

pub async fn get_project(Extension(project): Extension<MProject>) -> WebResult<Json<Value>> {
    Ok(Json(json!({ "project": ProjectJson::from(&project) })))
}

fn parse_flag(errors: &mut FieldErrors, field: &str, value: Option<&String>) -> Option<bool> {
    let value = value.filter(|v| !v.is_empty())?;
    let parsed = parse_bool(value);

    if parsed.is_none() {
        errors.insert(field.to_string(), "is invalid".to_string());
    }

    parsed
}

/// Updates project flags. Toggling the default domain of a live project
/// rewrites or removes its pointer right away.
pub async fn put_project(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
    form: Result<Form<PatchProjectRequest>, FormRejection>,
) -> WebResult<Json<Value>> {
    let form = form.map(|Form(f)| f).unwrap_or_default();

    let mut errors = FieldErrors::new();
    let default_domain_enabled = parse_flag(
        &mut errors,
        "default_domain_enabled",
        form.default_domain_enabled.as_ref(),
    );
    let force_https = parse_flag(&mut errors, "force_https", form.force_https.as_ref());
    let skip_build = parse_flag(&mut errors, "skip_build", form.skip_build.as_ref());

    if !errors.is_empty() {
        return Err(WebError::InvalidParams(errors));
    }

    let mut updated = project.clone();
    updated.default_domain_enabled = default_domain_enabled.unwrap_or(project.default_domain_enabled);
    updated.force_https = force_https.unwrap_or(project.force_https);
    updated.skip_build = skip_build.unwrap_or(project.skip_build);

    if updated == project {
        return Ok(Json(json!({ "project": ProjectJson::from(&project) })));
    }

    let mut aproject: AProject = project.clone().into();
    aproject.default_domain_enabled = Set(updated.default_domain_enabled);
    aproject.force_https = Set(updated.force_https);
    aproject.skip_build = Set(updated.skip_build);
    aproject.updated_at = Set(Utc::now().naive_utc());
    let saved = aproject.update(&state.db).await?;

    if let Some(active_id) = project.active_deployment_id {
        let enabled = !project.default_domain_enabled && saved.default_domain_enabled;
        let disabled = project.default_domain_enabled && !saved.default_domain_enabled;

        if disabled {
            let domain = default_domain_name(&project.name, &state.cli.default_domain);
            state
                .storage
                .delete(&paths::domain_meta_key(&domain))
                .await?;
            publish_invalidation(state.bus.as_ref(), vec![domain]).await?;
        }

        if enabled || project.force_https != saved.force_https {
            enqueue(state.bus.as_ref(), &DeployJobData::pointer_refresh(active_id)).await?;
        }
    }

    Ok(Json(json!({ "project": ProjectJson::from(&saved) })))
}

/// Hex SHA-256 of `username:password`, the form the edge compares against.
pub fn hash_basic_auth(username: &str, password: &str) -> String {
    hex::encode(Sha256::digest(format!("{}:{}", username, password)))
}

/// Makes a live project pick up changed credentials right away.
async fn refresh_live_pointer(state: &ServerState, project: &MProject) -> WebResult<()> {
    if let Some(active_id) = project.active_deployment_id {
        // Pointer rewrite plus cache invalidation, no webroot upload.
        enqueue(state.bus.as_ref(), &DeployJobData::rollback(active_id)).await?;
    }

    Ok(())
}

/// Protects the site with HTTP basic auth.
pub async fn post_auth(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
    form: Result<Form<BasicAuthRequest>, FormRejection>,
) -> WebResult<Json<Value>> {
    let form = form.map(|Form(f)| f).unwrap_or_default();
    let username = form.basic_auth_username.trim();

    let mut errors = FieldErrors::new();
    if username.is_empty() {
        errors.insert("basic_auth_username".to_string(), "is required".to_string());
    } else if form.basic_auth_password.is_empty() {
        errors.insert("basic_auth_password".to_string(), "is required".to_string());
    }

    if !errors.is_empty() {
        return Err(WebError::InvalidParams(errors));
    }

    let mut aproject: AProject = project.clone().into();
    aproject.basic_auth_username = Set(Some(username.to_string()));
    aproject.encrypted_basic_auth_password =
        Set(Some(hash_basic_auth(username, &form.basic_auth_password)));
    aproject.updated_at = Set(Utc::now().naive_utc());
    let saved = aproject.update(&state.db).await?;

    refresh_live_pointer(&state, &saved).await?;

    info!(project = %saved.name, "Basic auth enabled");
    Ok(Json(json!({ "project": ProjectJson::from(&saved) })))
}

pub async fn delete_auth(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
) -> WebResult<Json<Value>> {
    if project.basic_auth_username.is_none() && project.encrypted_basic_auth_password.is_none() {
        return Ok(Json(json!({ "project": ProjectJson::from(&project) })));
    }

    let mut aproject: AProject = project.clone().into();
    aproject.basic_auth_username = Set(None);
    aproject.encrypted_basic_auth_password = Set(None);
    aproject.updated_at = Set(Utc::now().naive_utc());
    let saved = aproject.update(&state.db).await?;

    refresh_live_pointer(&state, &saved).await?;

    info!(project = %saved.name, "Basic auth disabled");
    Ok(Json(json!({ "project": ProjectJson::from(&saved) })))
}
