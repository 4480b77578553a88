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
                    .table(Project::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Project::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Project::UserId).big_integer().not_null())
                    .col(ColumnDef::new(Project::Name).string().not_null().unique_key())
                    .col(ColumnDef::new(Project::ActiveDeploymentId).big_integer())
                    .col(ColumnDef::new(Project::LockedAt).date_time())
                    .col(
                        ColumnDef::new(Project::SkipBuild)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Project::MaxDeploysKept)
                            .integer()
                            .not_null()
                            .default(10),
                    )
                    .col(
                        ColumnDef::new(Project::DefaultDomainEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Project::ForceHttps)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Project::Watermark)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Project::BasicAuthUsername).string())
                    .col(ColumnDef::new(Project::EncryptedBasicAuthPassword).string())
                    .col(ColumnDef::new(Project::CreatedAt).date_time().not_null())
                    .col(ColumnDef::new(Project::UpdatedAt).date_time().not_null())
                    .col(ColumnDef::new(Project::DeletedAt).date_time())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-project-user_id")
                            .from(Project::Table, Project::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Project::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Project {
    Table,
    Id,
    UserId,
    Name,
    ActiveDeploymentId,
    LockedAt,
    SkipBuild,
    MaxDeploysKept,
    DefaultDomainEnabled,
    ForceHttps,
    Watermark,
    BasicAuthUsername,
    EncryptedBasicAuthPassword,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum User {
    Table,
    Id,
}
