/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use async_trait::async_trait;
use bytes::Bytes;
use common::archive::{UnpackedFile, unpack_tar_gz};
use common::consts::*;
use common::database::{domain_names, raw_bundle_key};
use common::error::{ErrorKind, JobError, JobResult};
use common::messages::{DeployJobData, publish_invalidation};
use common::mime::content_type_for;
use common::paths;
use common::state::{fail, mark_deployed};
use common::storage::{Acl, StorageError};
use common::types::*;
use entity::deployment::DeploymentState;
use futures::{StreamExt, TryStreamExt};
use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};
use tracing::{info, instrument, warn};

use super::consumer::Handler;
use super::{decode, load_deployment, load_project, with_project_lock};

const UPLOAD_CONCURRENCY: usize = 8;

static INVALID_PATH_ELEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^0-9A-Za-z,!_'()\.\*\-@]+").unwrap());

/// Public pointer read by the edge. Never put secrets in here.
#[derive(Debug, Serialize)]
struct DomainMeta<'a> {
    prefix: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    force_https: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    basic_auth_username: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    basic_auth_password: Option<&'a str>,
}

/// Whether a path is safe to use as an object key below the webroot.
pub fn is_valid_webroot_path(path: &str) -> bool {
    !path
        .split('/')
        .any(|element| INVALID_PATH_ELEMENT.is_match(element))
}

/// Inserts the watermark before the last `</body>`. Text only, no HTML parsing.
pub fn inject_watermark(html: &[u8]) -> Vec<u8> {
    const CLOSING: &[u8] = b"</body>";

    let position = html
        .windows(CLOSING.len())
        .rposition(|window| window.eq_ignore_ascii_case(CLOSING));

    match position {
        Some(index) => {
            let mut out = Vec::with_capacity(html.len() + WATERMARK_SCRIPT.len());
            out.extend_from_slice(&html[..index]);
            out.extend_from_slice(WATERMARK_SCRIPT.as_bytes());
            out.extend_from_slice(&html[index..]);
            out
        }
        None => html.to_vec(),
    }
}

/// UMD module exposing the env vars as `JSENV` or `module.exports`. `None`
/// when the deployment has none.
pub fn render_jsenv(vars: &serde_json::Value) -> Option<String> {
    let map = vars.as_object().filter(|map| !map.is_empty())?;
    let json = serde_json::to_string(map).ok()?;

    Some(format!(
        r#"(function(global, env) {{
	if (typeof module === "object" && typeof module.exports === "object") {{
		module.exports = env;
	}} else {{
		global.JSENV = env;
	}}
}}(this, {}));
"#,
        json
    ))
}

/// Whether a deploy job may run against a deployment in `state`.
pub fn accepts(state: DeploymentState, job: &DeployJobData) -> bool {
    match state {
        DeploymentState::PendingDeploy => !job.skip_webroot_upload,
        DeploymentState::BuildFailed => !job.skip_webroot_upload,
        DeploymentState::PendingRollback | DeploymentState::Deployed => job.skip_webroot_upload,
        _ => false,
    }
}

fn unexpected_state(deployment: &MDeployment) -> JobError {
    JobError::new(
        ErrorKind::Precondition,
        format!(
            "deployment {} is in unexpected state {}",
            deployment.id, deployment.state
        ),
    )
}

/// Explodes a bundle into the webroot and points the project's domains at it.
pub struct DeployWorker {
    state: Arc<ServerState>,
}

impl DeployWorker {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    #[instrument(skip(self), fields(deployment_id = job.deployment_id))]
    pub async fn work(&self, job: DeployJobData) -> JobResult {
        let deployment = load_deployment(&self.state, job.deployment_id).await?;
        if !accepts(deployment.state, &job) {
            return Err(unexpected_state(&deployment));
        }

        let project = load_project(&self.state, deployment.project_id).await?;

        with_project_lock(&self.state, project.id, self.deploy(job, &project)).await
    }

    async fn deploy(&self, job: DeployJobData, project: &MProject) -> JobResult {
        let state = &self.state;

        let deployment = load_deployment(state, job.deployment_id).await?;
        if !accepts(deployment.state, &job) {
            return Err(unexpected_state(&deployment));
        }

        // A deployed deployment is only re-pointed while it is the live one.
        let refresh_only = deployment.state == DeploymentState::Deployed;
        if refresh_only && project.active_deployment_id != Some(deployment.id) {
            return Err(unexpected_state(&deployment));
        }

        let prefix_id = deployment.prefix_id();

        if !job.skip_webroot_upload {
            let bundle_key = if job.use_raw_bundle {
                raw_bundle_key(&state.db, &deployment).await?
            } else {
                paths::optimized_bundle_key(&prefix_id)
            };

            let tmp = tempfile::tempdir()
                .map_err(|e| JobError::internal(format!("Failed to create temp dir: {}", e)))?;
            let bundle_path = tmp.path().join("bundle.tar.gz");
            let webroot_dir = tmp.path().join("webroot");

            state
                .storage
                .download_to(&bundle_key, &bundle_path)
                .await
                .map_err(|e| match e {
                    StorageError::NotFound(key) => {
                        JobError::not_found(format!("bundle {} not found", key))
                    }
                    e => JobError::transient(e.to_string()),
                })?;

            let unpacked = tokio::task::spawn_blocking(move || unpack_tar_gz(&bundle_path, &webroot_dir))
                .await
                .map_err(|e| JobError::internal(format!("unpack task failed: {}", e)))?;

            let files = match unpacked {
                Ok(files) => files,
                Err(e) => {
                    fail(&state.db, &deployment, DeploymentState::DeployFailed, "Failed to unarchive file")
                        .await?;
                    return Err(JobError::new(ErrorKind::PermanentExternal, e.to_string()));
                }
            };

            let upload = self.upload_webroot(&prefix_id, project.watermark, files);
            match tokio::time::timeout(WEBROOT_UPLOAD_TIMEOUT, upload).await {
                Ok(result) => result?,
                Err(_) => {
                    fail(&state.db, &deployment, DeploymentState::DeployFailed, MSG_UPLOAD_TIMEOUT)
                        .await?;
                    return Err(JobError::new(ErrorKind::PermanentExternal, MSG_UPLOAD_TIMEOUT));
                }
            }

            if let Some(jsenv) = render_jsenv(&deployment.js_env_vars) {
                state
                    .storage
                    .upload(
                        &paths::webroot_key(&prefix_id, JSENV_FILE),
                        Bytes::from(jsenv),
                        Acl::PublicRead,
                        "application/javascript",
                    )
                    .await
                    .map_err(|e| JobError::transient(e.to_string()))?;
            }
        }

        let domains = domain_names(&state.db, project, &state.cli.default_domain).await?;
        let meta = serde_json::to_vec(&DomainMeta {
            prefix: prefix_id.clone(),
            force_https: project.force_https,
            basic_auth_username: project.basic_auth_username.as_deref(),
            basic_auth_password: project.encrypted_basic_auth_password.as_deref(),
        })
        .map_err(|e| JobError::internal(e.to_string()))?;
        let meta = Bytes::from(meta);

        for domain in &domains {
            state
                .storage
                .upload(
                    &paths::domain_meta_key(domain),
                    meta.clone(),
                    Acl::PublicRead,
                    "application/json",
                )
                .await
                .map_err(|e| JobError::transient(e.to_string()))?;
        }

        if !refresh_only {
            mark_deployed(&state.db, &deployment, project).await?;
        }

        if !job.skip_invalidation {
            publish_invalidation(state.bus.as_ref(), domains.clone()).await?;
        }

        info!(prefix_id = %prefix_id, domains = ?domains, "Deployment is live");
        Ok(())
    }

    async fn upload_webroot(
        &self,
        prefix_id: &str,
        watermark: bool,
        files: Vec<UnpackedFile>,
    ) -> JobResult {
        let total = files.len();
        let storage = &self.state.storage;

        futures::stream::iter(files.into_iter().filter(|file| {
            let valid = is_valid_webroot_path(&file.relative);
            if !valid {
                warn!(path = %file.relative, "Skipping file with invalid name");
            }
            valid
        }))
        .map(Ok::<UnpackedFile, JobError>)
        .try_for_each_concurrent(UPLOAD_CONCURRENCY, |file| async move {
            let content_type = content_type_for(&file.relative);
            let mut body = tokio::fs::read(&file.absolute)
                .await
                .map_err(|e| JobError::internal(format!("Failed to read {}: {}", file.relative, e)))?;

            if watermark && content_type == "text/html" && file.size <= MAX_WATERMARK_FILE_SIZE {
                body = inject_watermark(&body);
            }

            storage
                .upload(
                    &paths::webroot_key(prefix_id, &file.relative),
                    Bytes::from(body),
                    Acl::PublicRead,
                    content_type,
                )
                .await
                .map_err(|e| JobError::transient(e.to_string()))
        })
        .await?;

        info!(files = total, "Uploaded webroot");
        Ok(())
    }
}

#[async_trait]
impl Handler for DeployWorker {
    fn name(&self) -> &'static str {
        "deploy"
    }

    async fn handle(&self, data: &[u8]) -> JobResult {
        self.work(decode(data)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inject_watermark() {
        let html = b"<html><body><p>hi</p></body></html>";
        let out = String::from_utf8(inject_watermark(html)).unwrap();

        assert!(out.starts_with("<html><body><p>hi</p><!-- PubStorm -->"));
        assert!(out.ends_with("<!-- END PubStorm --></body></html>"));
    }

    #[test]
    fn test_inject_watermark_uses_last_body() {
        let html = b"<body><pre></body></pre></BODY>";
        let out = String::from_utf8(inject_watermark(html)).unwrap();

        assert!(out.starts_with("<body><pre></body></pre><!-- PubStorm -->"));
        assert!(out.ends_with("</BODY>"));
    }

    #[test]
    fn test_inject_watermark_without_body() {
        assert_eq!(inject_watermark(b"<p>hi</p>"), b"<p>hi</p>".to_vec());
    }

    #[test]
    fn test_valid_webroot_path() {
        assert!(is_valid_webroot_path("index.html"));
        assert!(is_valid_webroot_path("images/logo@2x.png"));
        assert!(is_valid_webroot_path("docs/(draft)/a-b_c.txt"));
        assert!(!is_valid_webroot_path("my file.html"));
        assert!(!is_valid_webroot_path("docs/what?.html"));
        assert!(!is_valid_webroot_path("caf\u{e9}/index.html"));
    }

    #[test]
    fn test_render_jsenv() {
        assert_eq!(render_jsenv(&json!({})), None);
        assert_eq!(render_jsenv(&json!(null)), None);

        let js = render_jsenv(&json!({"API_HOST": "https://api.foo.com"})).unwrap();
        assert!(js.contains("global.JSENV = env;"));
        assert!(js.ends_with("}(this, {\"API_HOST\":\"https://api.foo.com\"}));\n"));
    }

    #[test]
    fn test_accepts() {
        let deploy = DeployJobData::new(1);
        let raw = DeployJobData::raw(1);
        let rollback = DeployJobData::rollback(1);
        let refresh = DeployJobData::pointer_refresh(1);

        assert!(accepts(DeploymentState::PendingDeploy, &deploy));
        assert!(accepts(DeploymentState::PendingDeploy, &raw));
        assert!(accepts(DeploymentState::BuildFailed, &deploy));
        assert!(!accepts(DeploymentState::BuildFailed, &rollback));
        assert!(accepts(DeploymentState::BuildFailed, &raw));
        assert!(accepts(DeploymentState::PendingRollback, &rollback));
        assert!(accepts(DeploymentState::Deployed, &refresh));
        assert!(!accepts(DeploymentState::Deployed, &deploy));
        assert!(!accepts(DeploymentState::PendingBuild, &deploy));
        assert!(!accepts(DeploymentState::Uploaded, &raw));
        assert!(!accepts(DeploymentState::DeployFailed, &rollback));
    }

    #[test]
    fn test_domain_meta() {
        let meta = DomainMeta {
            prefix: "a1b2-5".to_string(),
            force_https: false,
            basic_auth_username: None,
            basic_auth_password: None,
        };
        assert_eq!(
            serde_json::to_value(&meta).unwrap(),
            json!({"prefix": "a1b2-5"})
        );

        let meta = DomainMeta {
            prefix: "a1b2-5".to_string(),
            force_https: true,
            basic_auth_username: Some("admin"),
            basic_auth_password: Some("c2VjcmV0"),
        };
        assert_eq!(
            serde_json::to_value(&meta).unwrap(),
            json!({
                "prefix": "a1b2-5",
                "force_https": true,
                "basic_auth_username": "admin",
                "basic_auth_password": "c2VjcmV0"
            })
        );
    }
}
