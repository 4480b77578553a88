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
                    .table(OauthClient::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OauthClient::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OauthClient::ClientId)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(OauthClient::ClientSecret).string().not_null())
                    .col(ColumnDef::new(OauthClient::Email).string().not_null())
                    .col(ColumnDef::new(OauthClient::Name).string().not_null())
                    .col(ColumnDef::new(OauthClient::Organization).string().not_null())
                    .col(ColumnDef::new(OauthClient::CreatedAt).date_time().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OauthClient::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OauthClient {
    Table,
    Id,
    ClientId,
    ClientSecret,
    Email,
    Name,
    Organization,
    CreatedAt,
}
