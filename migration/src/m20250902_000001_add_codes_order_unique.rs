use sea_orm_migration::prelude::*;

#[derive(DeriveIden)]
enum Codes {
    Table,
    OrderId,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 一个订单最多绑定一个卡密; NULL (未售出) 不受约束
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("uq_codes_order_id")
                    .table(Codes::Table)
                    .col(Codes::OrderId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("uq_codes_order_id")
                    .table(Codes::Table)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}
