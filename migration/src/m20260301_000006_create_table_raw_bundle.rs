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
                    .table(RawBundle::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RawBundle::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RawBundle::ProjectId).big_integer().not_null())
                    .col(ColumnDef::new(RawBundle::Checksum).string().not_null())
                    .col(ColumnDef::new(RawBundle::UploadedPath).string().not_null())
                    .col(ColumnDef::new(RawBundle::CreatedAt).date_time().not_null())
                    .col(ColumnDef::new(RawBundle::DeletedAt).date_time())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-raw_bundle-project_id")
                            .from(RawBundle::Table, RawBundle::ProjectId)
                            .to(Project::Table, Project::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .index(
                        Index::create()
                            .name("idx-raw_bundle-project_id-checksum")
                            .col(RawBundle::ProjectId)
                            .col(RawBundle::Checksum),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(RawBundle::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RawBundle {
    Table,
    Id,
    ProjectId,
    Checksum,
    UploadedPath,
    CreatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum Project {
    Table,
    Id,
}
