/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod auth;
pub mod authorization;
pub mod endpoints;
pub mod error;
pub mod views;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::{Router, middleware};
use common::types::*;
use endpoints::*;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Routes that hold the project lock while they run.
fn locked_project_routes(state: &Arc<ServerState>) -> Router<Arc<ServerState>> {
    Router::new()
        .route("/projects/{project_name}", put(projects::put_project))
        .route(
            "/projects/{project_name}/auth",
            post(projects::post_auth).delete(projects::delete_auth),
        )
        .route(
            "/projects/{project_name}/deployments",
            post(deployments::post_deployment).layer(DefaultBodyLimit::disable()),
        )
        .route("/projects/{project_name}/domains", post(domains::post_domain))
        .route(
            "/projects/{project_name}/domains/{domain_name}",
            axum::routing::delete(domains::delete_domain),
        )
        .route(
            "/projects/{project_name}/rollback",
            post(deployments::post_rollback),
        )
        .route(
            "/projects/{project_name}/jsenvvars/add",
            put(jsenvvars::put_js_env_vars_add),
        )
        .route(
            "/projects/{project_name}/jsenvvars/delete",
            put(jsenvvars::put_js_env_vars_delete).delete(jsenvvars::put_js_env_vars_delete),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(state),
            authorization::project_lock,
        ))
}

/// Routes open to the owner and collaborators of `{project_name}`.
fn project_routes(state: &Arc<ServerState>) -> Router<Arc<ServerState>> {
    Router::new()
        .route("/projects/{project_name}", get(projects::get_project))
        .route(
            "/projects/{project_name}/deployments",
            get(deployments::get_deployments),
        )
        .route(
            "/projects/{project_name}/deployments/{deployment_id}",
            get(deployments::get_deployment),
        )
        .route(
            "/projects/{project_name}/active_deployment",
            get(deployments::get_active_deployment),
        )
        .route("/projects/{project_name}/domains", get(domains::get_domains))
        .route(
            "/projects/{project_name}/domains/{domain_name}/cert",
            get(certs::get_cert)
                .post(certs::post_cert)
                .delete(certs::delete_cert),
        )
        .route(
            "/projects/{project_name}/domains/{domain_name}/cert/letsencrypt",
            post(certs::post_letsencrypt),
        )
        .route(
            "/projects/{project_name}/repos",
            get(repos::get_repo)
                .post(repos::post_repo)
                .delete(repos::delete_repo),
        )
        .route(
            "/projects/{project_name}/raw_bundles/{bundle_checksum}",
            get(raw_bundles::get_raw_bundle),
        )
        .route(
            "/projects/{project_name}/jsenvvars",
            get(jsenvvars::get_js_env_vars),
        )
        .merge(locked_project_routes(state))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(state),
            authorization::require_project,
        ))
}

fn authorized_routes(state: &Arc<ServerState>) -> Router<Arc<ServerState>> {
    Router::new()
        .route("/oauth/token", axum::routing::delete(oauth::delete_token))
        .route("/user", get(users::get_user).put(users::put_user))
        .route(
            "/projects",
            get(projects::get_projects).post(projects::post_projects),
        )
        .merge(project_routes(state))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(state),
            auth::authorize,
        ))
}

pub fn app(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/oauth/token", post(oauth::post_token))
        .route("/users", post(users::post_users))
        .route("/user/confirm", post(users::post_confirm))
        .route("/user/confirm/resend", post(users::post_confirm_resend))
        .route("/hooks/github/{path}", post(hooks::post_github))
        .route(
            "/.well-known/acme-challenge/{token}",
            get(acme::get_challenge),
        )
        .route("/admin/stats", get(stats::get_stats))
        .merge(authorized_routes(&state))
        .fallback(handle_404)
        .layer(authorization::cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve_web(state: Arc<ServerState>) -> Result<()> {
    let _sentry = common::init_sentry(&state.cli);
    let server_url = format!("{}:{}", state.cli.ip, state.cli.port);

    let listener = tokio::net::TcpListener::bind(&server_url)
        .await
        .with_context(|| format!("Failed to bind {}", server_url))?;

    info!(address = %server_url, "Starting PubStorm API server");

    axum::serve(listener, app(Arc::clone(&state)))
        .with_graceful_shutdown(common::shutdown_signal())
        .await
        .context("API server failed")?;

    info!("API server stopped");
    Ok(())
}
