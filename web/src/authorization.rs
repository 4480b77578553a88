/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::Response;
use axum::Extension;
use common::database::{ProjectLock, get_project_by_name, is_collaborator};
use common::types::*;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::error;

use super::error::{WebError, WebResult};

/// Loads `{project_name}` and makes sure the current user owns it or
/// collaborates on it. Anyone else gets the same 404 as for a missing project.
pub async fn require_project(
    state: State<Arc<ServerState>>,
    Extension(user): Extension<MUser>,
    Path(params): Path<HashMap<String, String>>,
    mut req: Request,
    next: Next,
) -> WebResult<Response<Body>> {
    let name = params
        .get("project_name")
        .ok_or_else(|| WebError::not_found("project"))?;

    let project = get_project_by_name(&state.db, name)
        .await?
        .ok_or_else(|| WebError::not_found("project"))?;

    if !is_collaborator(&state.db, &project, user.id).await? {
        return Err(WebError::not_found("project"));
    }

    req.extensions_mut().insert(project);
    Ok(next.run(req).await)
}

/// Holds the project lock for the duration of the handler. The lock is
/// released on every exit path, panics and dropped requests included.
pub async fn project_lock(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
    req: Request,
    next: Next,
) -> WebResult<Response<Body>> {
    let Some(lock) = ProjectLock::acquire(&state, project.id).await? else {
        return Err(WebError::Locked);
    };

    let result = AssertUnwindSafe(next.run(req)).catch_unwind().await;

    if let Err(e) = lock.release().await {
        error!(error = %e, project_id = project.id, "Failed to unlock project");
    }

    result.map_err(|_| {
        WebError::Internal(anyhow::anyhow!(
            "handler panicked while holding the lock of project {}",
            project.name
        ))
    })
}

/// Any origin, credentials allowed, requested headers echoed back.
pub fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
