use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // One row per asset distribution request. The status column holds the
        // small integer lifecycle enum (10 new .. 45 unmet).
        manager
            .create_table(
                Table::create()
                    .table(Requests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Requests::Idx)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Requests::Timestamp).big_integer().not_null())
                    .col(ColumnDef::new(Requests::Status).small_integer().not_null())
                    .col(
                        ColumnDef::new(Requests::WalletId)
                            .string_len(256)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Requests::RecipientId)
                            .string_len(256)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Requests::Invoice).string_len(512).not_null())
                    .col(
                        ColumnDef::new(Requests::AssetGroup)
                            .string_len(256)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Requests::AssetId).string_len(256).null())
                    .col(ColumnDef::new(Requests::Amount).big_integer().null())
                    .to_owned(),
            )
            .await?;

        // Eligibility lookups filter on (wallet, group)
        manager
            .create_index(
                Index::create()
                    .name("idx_requests_wallet_group")
                    .table(Requests::Table)
                    .col(Requests::WalletId)
                    .col(Requests::AssetGroup)
                    .to_owned(),
            )
            .await?;

        // Scheduler scans filter on status and order by idx
        manager
            .create_index(
                Index::create()
                    .name("idx_requests_status")
                    .table(Requests::Table)
                    .col(Requests::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Requests::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Requests {
    Table,
    Idx,
    Timestamp,
    Status,
    WalletId,
    RecipientId,
    Invoice,
    AssetGroup,
    AssetId,
    Amount,
}
