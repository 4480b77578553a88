/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod acme;
pub mod certs;
pub mod deployments;
pub mod domains;
pub mod hooks;
pub mod jsenvvars;
pub mod oauth;
pub mod projects;
pub mod raw_bundles;
pub mod repos;
pub mod stats;
pub mod users;

use axum::http::{StatusCode, Uri};
use axum::response::IntoResponse;
use common::types::*;
use sea_orm::{ConnectionTrait, EntityTrait};

use crate::error::{WebError, WebResult};

pub async fn handle_404(uri: Uri) -> impl IntoResponse {
    WebError::Api {
        status: StatusCode::NOT_FOUND,
        error: "not_found",
        description: format!("{} could not be found", uri.path()),
    }
}

/// Accepts the spellings `strconv.ParseBool` style clients send.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

pub async fn active_deployment<C: ConnectionTrait>(
    db: &C,
    project: &MProject,
) -> WebResult<Option<MDeployment>> {
    let Some(id) = project.active_deployment_id else {
        return Ok(None);
    };

    Ok(EDeployment::find_by_id(id).one(db).await?)
}

/// Env vars a new deployment inherits from the active one.
pub async fn inherited_js_env_vars<C: ConnectionTrait>(
    db: &C,
    project: &MProject,
) -> WebResult<serde_json::Value> {
    Ok(active_deployment(db, project)
        .await?
        .map(|d| d.js_env_vars)
        .unwrap_or_else(|| serde_json::json!({})))
}
