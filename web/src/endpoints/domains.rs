/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::extract::rejection::FormRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Form, Json};
use chrono::Utc;
use common::consts::MAX_DOMAINS_PER_PROJECT;
use common::database::{count_domains, domain_names, find_domain};
use common::input::{sanitize_domain, validate_domain};
use common::messages::{DeployJobData, enqueue, publish_invalidation};
use common::paths;
use common::types::*;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

use crate::error::{WebError, WebResult};
use crate::views::DomainJson;

#[derive(Deserialize, Debug, Default)]
pub struct MakeDomainRequest {
    #[serde(default)]
    pub name: String,
}

pub async fn get_domains(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
) -> WebResult<Json<Value>> {
    let names = domain_names(&state.db, &project, &state.cli.default_domain).await?;
    Ok(Json(json!({ "domains": names })))
}

pub async fn post_domain(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
    form: Result<Form<MakeDomainRequest>, FormRejection>,
) -> WebResult<(StatusCode, Json<Value>)> {
    let form = form.map(|Form(f)| f).unwrap_or_default();

    if form.name.trim().is_empty() {
        return Err(WebError::invalid_param("name", "is required"));
    }

    let name = sanitize_domain(&form.name).map_err(|e| WebError::invalid_param("name", e))?;
    validate_domain(&name, &state.cli.default_domain)
        .map_err(|e| WebError::invalid_param("name", e))?;

    if count_domains(&state.db, project.id).await? >= MAX_DOMAINS_PER_PROJECT {
        return Err(WebError::UnprocessableEntity(format!(
            "project cannot have more than {} domains",
            MAX_DOMAINS_PER_PROJECT
        )));
    }

    let taken = EDomain::find()
        .filter(CDomain::Name.eq(name.as_str()))
        .one(&state.db)
        .await?;

    if taken.is_some() {
        return Err(WebError::invalid_param("name", "is taken"));
    }

    let domain = ADomain {
        project_id: Set(project.id),
        name: Set(name),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(&state.db)
    .await?;

    info!(project_id = project.id, domain = %domain.name, "Domain added");

    if let Some(active_id) = project.active_deployment_id {
        enqueue(state.bus.as_ref(), &DeployJobData::pointer_refresh(active_id)).await?;
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "domain": DomainJson { name: domain.name } })),
    ))
}

/// Removes a custom domain together with its pointer and certificate.
pub async fn delete_domain(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
    Path((_, domain_name)): Path<(String, String)>,
) -> WebResult<Json<Value>> {
    let domain = find_domain(&state.db, project.id, &domain_name)
        .await?
        .ok_or_else(|| WebError::not_found("domain"))?;

    EDomain::delete_by_id(domain.id).exec(&state.db).await?;

    for key in [
        paths::domain_meta_key(&domain.name),
        paths::cert_key(&domain.name),
        paths::cert_private_key_key(&domain.name),
    ] {
        state.storage.delete(&key).await?;
    }

    publish_invalidation(state.bus.as_ref(), vec![domain.name.clone()]).await?;

    info!(project_id = project.id, domain = %domain.name, "Domain removed");

    Ok(Json(json!({ "deleted": true })))
}
