/*
 * SPDX-FileCopyrightText: 2026 Wavelens GmbH <info@wavelens.io>
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Deployment::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Deployment::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Deployment::ProjectId).big_integer().not_null())
                    .col(ColumnDef::new(Deployment::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Deployment::State).integer().not_null())
                    .col(ColumnDef::new(Deployment::Prefix).string_len(4).not_null())
                    .col(ColumnDef::new(Deployment::Version).big_integer().not_null())
                    .col(ColumnDef::new(Deployment::RawBundleId).big_integer())
                    .col(ColumnDef::new(Deployment::Checksum).string())
                    .col(
                        ColumnDef::new(Deployment::JsEnvVars)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'{}'::jsonb")),
                    )
                    .col(ColumnDef::new(Deployment::ErrorMessage).text())
                    .col(ColumnDef::new(Deployment::DeployedAt).date_time())
                    .col(ColumnDef::new(Deployment::PurgedAt).date_time())
                    .col(ColumnDef::new(Deployment::CreatedAt).date_time().not_null())
                    .col(ColumnDef::new(Deployment::UpdatedAt).date_time().not_null())
                    .col(ColumnDef::new(Deployment::DeletedAt).date_time())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-deployment-project_id")
                            .from(Deployment::Table, Deployment::ProjectId)
                            .to(Project::Table, Project::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-deployment-user_id")
                            .from(Deployment::Table, Deployment::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-deployment-raw_bundle_id")
                            .from(Deployment::Table, Deployment::RawBundleId)
                            .to(RawBundle::Table, RawBundle::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .index(
                        Index::create()
                            .name("idx-deployment-project_id-version")
                            .col(Deployment::ProjectId)
                            .col(Deployment::Version)
                            .unique(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Deployment::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Deployment {
    Table,
    Id,
    ProjectId,
    UserId,
    State,
    Prefix,
    Version,
    RawBundleId,
    Checksum,
    JsEnvVars,
    ErrorMessage,
    DeployedAt,
    PurgedAt,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum Project {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum User {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum RawBundle {
    Table,
    Id,
}
