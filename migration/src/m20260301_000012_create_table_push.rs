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
                    .table(Push::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Push::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Push::RepoId).big_integer().not_null())
                    .col(ColumnDef::new(Push::DeploymentId).big_integer().not_null())
                    .col(ColumnDef::new(Push::Ref).string().not_null())
                    .col(ColumnDef::new(Push::Payload).text().not_null())
                    .col(ColumnDef::new(Push::ProcessedAt).date_time())
                    .col(ColumnDef::new(Push::CreatedAt).date_time().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-push-repo_id")
                            .from(Push::Table, Push::RepoId)
                            .to(Repo::Table, Repo::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-push-deployment_id")
                            .from(Push::Table, Push::DeploymentId)
                            .to(Deployment::Table, Deployment::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Push::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Push {
    Table,
    Id,
    RepoId,
    DeploymentId,
    Ref,
    Payload,
    ProcessedAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Repo {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Deployment {
    Table,
    Id,
}
