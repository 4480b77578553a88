/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use chrono::NaiveDateTime;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "project")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    #[sea_orm(unique)]
    pub name: String,
    pub active_deployment_id: Option<i64>,
    /// Advisory single-writer lock, set by compare-and-set from NULL.
    pub locked_at: Option<NaiveDateTime>,
    pub skip_build: bool,
    pub max_deploys_kept: i32,
    pub default_domain_enabled: bool,
    pub force_https: bool,
    pub watermark: bool,
    pub basic_auth_username: Option<String>,
    #[serde(skip_serializing)]
    pub encrypted_basic_auth_password: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::deployment::Entity",
        from = "Column::ActiveDeploymentId",
        to = "super::deployment::Column::Id"
    )]
    ActiveDeployment,
}

impl ActiveModelBehavior for ActiveModel {}
