/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use chrono::Utc;
use common::database::{NewDeployment, insert_deployment};
use common::messages::{PushJobData, enqueue};
use common::types::*;
use entity::deployment::DeploymentState;
use hmac::{Hmac, Mac};
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, TransactionTrait};
use serde::Deserialize;
use sha1::Sha1;
use std::sync::Arc;
use tracing::{error, info};

use super::inherited_js_env_vars;

type HmacSha1 = Hmac<Sha1>;

const EVENT_HEADER: &str = "X-GitHub-Event";
const SIGNATURE_HEADER: &str = "X-Hub-Signature";

#[derive(Deserialize, Debug, Default)]
pub struct PushPayload {
    #[serde(rename = "ref", default)]
    pub git_ref: String,
    #[serde(default)]
    pub after: String,
}

impl PushPayload {
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum HookReply {
    Ignored(String),
    Initiated,
}

impl IntoResponse for HookReply {
    fn into_response(self) -> Response {
        match self {
            HookReply::Ignored(msg) => (StatusCode::ACCEPTED, msg).into_response(),
            HookReply::Initiated => (
                StatusCode::OK,
                "A deployment has been initiated by this push.",
            )
                .into_response(),
        }
    }
}

fn ignored(msg: &str) -> HookReply {
    HookReply::Ignored(msg.to_string())
}

/// Checks a `sha1=<hex>` signature of `body` against `secret`.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Some(digest) = signature
        .strip_prefix("sha1=")
        .and_then(|hex_digest| hex::decode(hex_digest).ok())
    else {
        return false;
    };

    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return false;
    };

    mac.update(body);
    mac.verify_slice(&digest).is_ok()
}

/// Creates the deployment and push rows of one push event and queues the
/// push for the worker.
async fn initiate(state: &ServerState, repo: &MRepo, payload: &PushPayload, body: &[u8]) -> Result<()> {
    let txn = state.db.begin().await.context("Failed to begin transaction")?;

    let project = EProject::find_by_id(repo.project_id)
        .one(&txn)
        .await?
        .with_context(|| format!("Project {} not found", repo.project_id))?;

    let js_env_vars = inherited_js_env_vars(&txn, &project)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load js env vars: {}", e))?;

    let deployment = insert_deployment(
        &txn,
        NewDeployment {
            project_id: project.id,
            user_id: repo.user_id,
            state: DeploymentState::PendingUpload,
            raw_bundle_id: None,
            checksum: None,
            js_env_vars,
        },
    )
    .await?;

    let push = APush {
        repo_id: Set(repo.id),
        deployment_id: Set(deployment.id),
        git_ref: Set(payload.after.clone()),
        payload: Set(String::from_utf8_lossy(body).into_owned()),
        processed_at: Set(None),
        created_at: Set(Utc::now().naive_utc()),
        ..Default::default()
    }
    .insert(&txn)
    .await
    .context("Failed to insert push")?;

    txn.commit().await.context("Failed to commit push")?;

    enqueue(state.bus.as_ref(), &PushJobData { push_id: push.id }).await?;

    info!(
        project = %project.name,
        deployment_id = deployment.id,
        push_id = push.id,
        git_ref = %push.git_ref,
        "Deployment initiated by GitHub push"
    );

    Ok(())
}

async fn handle_push(
    state: &ServerState,
    path: &str,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<HookReply> {
    let Ok(payload) = serde_json::from_slice::<PushPayload>(body) else {
        return Ok(ignored("Payload is empty or is in an unexpected format."));
    };

    let event = headers
        .get(EVENT_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    if event != "push" {
        return Ok(ignored("Only push events are processed."));
    }

    let Some(repo) = ERepo::find()
        .filter(CRepo::WebhookPath.eq(path))
        .one(&state.db)
        .await?
    else {
        return Ok(ignored(
            "Payload URL unknown. Are you using the correct Webhook URL for your PubStorm project?",
        ));
    };

    if repo.branch != payload.branch() {
        return Ok(HookReply::Ignored(format!(
            "Payload is not for the \"{}\" branch, aborting.",
            repo.branch
        )));
    }

    if let Some(secret) = repo.webhook_secret.as_deref().filter(|s| !s.is_empty()) {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();

        if signature.is_empty() {
            return Ok(ignored(
                "Webhook secret empty. Please enter the Webhook Secret into the Secret textbox of your webhook on GitHub.",
            ));
        }

        if !verify_signature(secret, body, signature) {
            return Ok(ignored(
                "Webhook secret incorrect. Please enter the Webhook Secret into the Secret textbox of your webhook on GitHub.",
            ));
        }
    }

    initiate(state, &repo, &payload, body).await?;
    Ok(HookReply::Initiated)
}

/// Receives GitHub push webhooks. GitHub only needs to know the payload
/// arrived, so every outcome other than a started deployment answers 202.
pub async fn post_github(
    state: State<Arc<ServerState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handle_push(&state, &path, &headers, &body).await {
        Ok(reply) => reply.into_response(),
        Err(e) => {
            error!(error = %e, webhook_path = %path, "GitHub push could not be processed");
            ignored("An unexpected error has occurred. If this problem persists, please contact PubStorm support.")
                .into_response()
        }
    }
}
