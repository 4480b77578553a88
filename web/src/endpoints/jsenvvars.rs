/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use bytes::Bytes;
use common::database::{NewDeployment, create_deployment};
use common::paths;
use common::storage::Acl;
use common::types::*;
use entity::deployment::DeploymentState;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::active_deployment;
use super::deployments::{deployment_response, start_deployment};
use crate::error::{WebError, WebResult};

type EnvVars = Map<String, Value>;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> WebResult<T> {
    serde_json::from_slice(body)
        .map_err(|_| WebError::BadRequest("request body is in invalid format".to_string()))
}

fn current_env_vars(deployment: &MDeployment) -> EnvVars {
    match &deployment.js_env_vars {
        Value::Object(map) => map.clone(),
        _ => EnvVars::new(),
    }
}

/// Sets each key, returning how many values actually changed.
fn merge_env_vars(env: &mut EnvVars, updates: BTreeMap<String, String>) -> usize {
    let mut changed = 0;

    for (key, value) in updates {
        let value = Value::String(value);
        if env.get(&key) != Some(&value) {
            env.insert(key, value);
            changed += 1;
        }
    }

    changed
}

fn remove_env_vars(env: &mut EnvVars, keys: Vec<String>) -> usize {
    keys.iter().filter(|key| env.remove(*key).is_some()).count()
}

/// Clones the active deployment with a modified env var map. Nothing is
/// created when `change` reports no modification.
async fn redeploy_with<F>(
    state: &ServerState,
    user: &MUser,
    project: &MProject,
    change: F,
) -> WebResult<(StatusCode, Json<Value>)>
where
    F: FnOnce(&mut EnvVars) -> usize,
{
    let active = active_deployment(&state.db, project).await?.ok_or_else(|| {
        WebError::PreconditionFailed("current active deployment could not be found".to_string())
    })?;

    let mut env = current_env_vars(&active);
    if change(&mut env) == 0 {
        return Ok((StatusCode::ACCEPTED, deployment_response(&active, project)));
    }

    let deployment = create_deployment(
        &state.db,
        NewDeployment {
            project_id: project.id,
            user_id: user.id,
            state: DeploymentState::PendingUpload,
            raw_bundle_id: active.raw_bundle_id,
            checksum: active.checksum.clone(),
            js_env_vars: Value::Object(env),
        },
    )
    .await?;

    if active.raw_bundle_id.is_none() {
        state
            .storage
            .copy(
                &paths::raw_bundle_key(&active.prefix_id()),
                &paths::raw_bundle_key(&deployment.prefix_id()),
                Acl::Private,
            )
            .await?;
    }

    let deployment = start_deployment(state, project, &deployment).await?;

    info!(
        project = %project.name,
        deployment_id = deployment.id,
        from_deployment_id = active.id,
        "Redeploying with updated js env vars"
    );

    Ok((StatusCode::ACCEPTED, deployment_response(&deployment, project)))
}

pub async fn get_js_env_vars(
    state: State<Arc<ServerState>>,
    Extension(project): Extension<MProject>,
) -> WebResult<Json<Value>> {
    let env = active_deployment(&state.db, &project)
        .await?
        .map(|d| current_env_vars(&d))
        .unwrap_or_default();

    Ok(Json(json!({ "js_env_vars": env })))
}

pub async fn put_js_env_vars_add(
    state: State<Arc<ServerState>>,
    Extension(user): Extension<MUser>,
    Extension(project): Extension<MProject>,
    body: Bytes,
) -> WebResult<(StatusCode, Json<Value>)> {
    let updates: BTreeMap<String, String> = parse_body(&body)?;
    if updates.is_empty() {
        return Err(WebError::invalid_params_description("request body is empty"));
    }

    redeploy_with(&state, &user, &project, |env| merge_env_vars(env, updates)).await
}

pub async fn put_js_env_vars_delete(
    state: State<Arc<ServerState>>,
    Extension(user): Extension<MUser>,
    Extension(project): Extension<MProject>,
    body: Bytes,
) -> WebResult<(StatusCode, Json<Value>)> {
    let keys: Vec<String> = parse_body(&body)?;
    if keys.is_empty() {
        return Err(WebError::invalid_params_description("request body is empty"));
    }

    redeploy_with(&state, &user, &project, |env| remove_env_vars(env, keys)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(value: Value) -> EnvVars {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn test_merge_counts_changed_values() {
        let mut vars = env(json!({ "foo": "bar", "baz": "qux" }));
        let updates = BTreeMap::from([
            ("foo".to_string(), "bar".to_string()),
            ("baz".to_string(), "quux".to_string()),
            ("new".to_string(), "1".to_string()),
        ]);

        assert_eq!(merge_env_vars(&mut vars, updates), 2);
        assert_eq!(
            Value::Object(vars),
            json!({ "foo": "bar", "baz": "quux", "new": "1" })
        );
    }

    #[test]
    fn test_remove_counts_present_keys() {
        let mut vars = env(json!({ "foo": "bar", "baz": "qux" }));
        let removed = remove_env_vars(&mut vars, vec!["foo".to_string(), "missing".to_string()]);

        assert_eq!(removed, 1);
        assert_eq!(Value::Object(vars), json!({ "baz": "qux" }));
    }

    #[test]
    fn test_parse_body_rejects_non_string_values() {
        let body = Bytes::from_static(br#"{"foo": 1}"#);
        let parsed: WebResult<BTreeMap<String, String>> = parse_body(&body);
        assert!(matches!(parsed, Err(WebError::BadRequest(_))));
    }
}
