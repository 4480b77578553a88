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
                    .table(Cert::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Cert::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Cert::DomainId)
                            .big_integer()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Cert::CertificatePath).string().not_null())
                    .col(ColumnDef::new(Cert::PrivateKeyPath).string().not_null())
                    .col(ColumnDef::new(Cert::StartsAt).date_time().not_null())
                    .col(ColumnDef::new(Cert::ExpiresAt).date_time().not_null())
                    .col(ColumnDef::new(Cert::CommonName).string())
                    .col(ColumnDef::new(Cert::Issuer).text())
                    .col(ColumnDef::new(Cert::Subject).text())
                    .col(ColumnDef::new(Cert::CreatedAt).date_time().not_null())
                    .col(ColumnDef::new(Cert::UpdatedAt).date_time().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-cert-domain_id")
                            .from(Cert::Table, Cert::DomainId)
                            .to(Domain::Table, Domain::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Cert::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Cert {
    Table,
    Id,
    DomainId,
    CertificatePath,
    PrivateKeyPath,
    StartsAt,
    ExpiresAt,
    CommonName,
    Issuer,
    Subject,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Domain {
    Table,
    Id,
}
