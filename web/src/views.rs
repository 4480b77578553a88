/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! JSON representations returned by the API.

use chrono::{DateTime, NaiveDateTime, Utc};
use common::types::*;
use entity::deployment::DeploymentState;
use serde::{Deserialize, Serialize};

fn utc(t: NaiveDateTime) -> DateTime<Utc> {
    t.and_utc()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserJson {
    pub email: String,
    pub name: String,
    pub organization: String,
}

impl From<&MUser> for UserJson {
    fn from(user: &MUser) -> Self {
        Self {
            email: user.email.clone(),
            name: user.name.clone().unwrap_or_default(),
            organization: user.organization.clone().unwrap_or_default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProjectJson {
    pub name: String,
    pub default_domain_enabled: bool,
    pub force_https: bool,
    pub skip_build: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth_username: Option<String>,
}

impl From<&MProject> for ProjectJson {
    fn from(project: &MProject) -> Self {
        Self {
            name: project.name.clone(),
            default_domain_enabled: project.default_domain_enabled,
            force_https: project.force_https,
            skip_build: project.skip_build,
            basic_auth_username: project.basic_auth_username.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeploymentJson {
    pub id: i64,
    pub state: DeploymentState,
    pub version: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl DeploymentJson {
    pub fn new(deployment: &MDeployment, active_deployment_id: Option<i64>) -> Self {
        Self {
            id: deployment.id,
            state: deployment.state,
            version: deployment.version,
            active: active_deployment_id == Some(deployment.id),
            deployed_at: deployment.deployed_at.map(utc),
            error_message: deployment.error_message.clone(),
            checksum: deployment.checksum.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DomainJson {
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CertJson {
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub common_name: Option<String>,
    pub issuer: Option<String>,
    pub subject: Option<String>,
}

impl From<&MCert> for CertJson {
    fn from(cert: &MCert) -> Self {
        Self {
            starts_at: utc(cert.starts_at),
            expires_at: utc(cert.expires_at),
            common_name: cert.common_name.clone(),
            issuer: cert.issuer.clone(),
            subject: cert.subject.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RepoJson {
    pub project_id: i64,
    pub uri: String,
    pub branch: String,
    pub webhook_url: String,
    pub webhook_secret: String,
}

impl RepoJson {
    pub fn new(repo: &MRepo, webhook_host: &str) -> Self {
        Self {
            project_id: repo.project_id,
            uri: repo.uri.clone(),
            branch: repo.branch.clone(),
            webhook_url: format!(
                "{}/hooks/github/{}",
                webhook_host.trim_end_matches('/'),
                repo.webhook_path
            ),
            webhook_secret: repo.webhook_secret.clone().unwrap_or_default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RawBundleJson {
    pub id: i64,
    pub checksum: String,
    pub uploaded_path: String,
}

impl From<&MRawBundle> for RawBundleJson {
    fn from(bundle: &MRawBundle) -> Self {
        Self {
            id: bundle.id,
            checksum: bundle.checksum.clone(),
            uploaded_path: bundle.uploaded_path.clone(),
        }
    }
}
