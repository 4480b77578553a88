/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use chrono::NaiveDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a deployment.
///
/// ```text
/// pending_upload -> uploaded -> pending_build -> built -> pending_deploy -> deployed
///                            \-> pending_deploy (skip_build)
/// pending_deploy | deployed -> pending_rollback -> deployed
/// non-terminal -> build_failed | deploy_failed
/// build_failed -> deployed (shipped despite the failed build)
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, DeriveActiveEnum, EnumIter, Deserialize, Serialize,
)]
#[sea_orm(rs_type = "i32", db_type = "Integer")]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    #[sea_orm(num_value = 0)]
    PendingUpload,
    #[sea_orm(num_value = 1)]
    Uploaded,
    #[sea_orm(num_value = 2)]
    PendingBuild,
    #[sea_orm(num_value = 3)]
    Built,
    #[sea_orm(num_value = 4)]
    PendingDeploy,
    #[sea_orm(num_value = 5)]
    Deployed,
    #[sea_orm(num_value = 6)]
    PendingRollback,
    #[sea_orm(num_value = 7)]
    BuildFailed,
    #[sea_orm(num_value = 8)]
    DeployFailed,
}

impl DeploymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::PendingUpload => "pending_upload",
            DeploymentState::Uploaded => "uploaded",
            DeploymentState::PendingBuild => "pending_build",
            DeploymentState::Built => "built",
            DeploymentState::PendingDeploy => "pending_deploy",
            DeploymentState::Deployed => "deployed",
            DeploymentState::PendingRollback => "pending_rollback",
            DeploymentState::BuildFailed => "build_failed",
            DeploymentState::DeployFailed => "deploy_failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            DeploymentState::BuildFailed | DeploymentState::DeployFailed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentState::Deployed | DeploymentState::BuildFailed | DeploymentState::DeployFailed
        )
    }

    pub fn can_transition_to(&self, next: DeploymentState) -> bool {
        use DeploymentState::*;

        if next.is_failure() {
            return match self {
                DeployFailed => false,
                BuildFailed => next == DeployFailed,
                Deployed => false,
                _ => true,
            };
        }

        matches!(
            (self, next),
            (PendingUpload, Uploaded)
                | (Uploaded, PendingBuild)
                | (Uploaded, PendingDeploy)
                | (PendingBuild, Built)
                | (Built, PendingDeploy)
                | (PendingDeploy, Deployed)
                | (PendingDeploy, PendingRollback)
                | (Deployed, PendingRollback)
                | (PendingRollback, Deployed)
                | (BuildFailed, Deployed)
        )
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "deployment")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub project_id: i64,
    pub user_id: i64,
    pub state: DeploymentState,
    pub prefix: String,
    pub version: i64,
    pub raw_bundle_id: Option<i64>,
    pub checksum: Option<String>,
    #[sea_orm(column_type = "JsonBinary")]
    pub js_env_vars: Json,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub deployed_at: Option<NaiveDateTime>,
    pub purged_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

impl Model {
    /// External identifier, also the blob store key segment.
    pub fn prefix_id(&self) -> String {
        format!("{}-{}", self.prefix, self.id)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
    #[sea_orm(
        belongs_to = "super::raw_bundle::Entity",
        from = "Column::RawBundleId",
        to = "super::raw_bundle::Column::Id"
    )]
    RawBundle,
}

impl ActiveModelBehavior for ActiveModel {}
