use sea_orm::Schema;
use sea_orm_migration::prelude::*;

use crate::entity::{
    AuditLogs, CartItems, Carts, OrderItems, Orders, Payments, ProductVariants, Products, Users,
    cart_items, carts, orders, payments,
};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let schema = Schema::new(manager.get_database_backend());

        // Parents before children so foreign keys resolve.
        manager.create_table(schema.create_table_from_entity(Users)).await?;
        manager.create_table(schema.create_table_from_entity(Products)).await?;
        manager
            .create_table(schema.create_table_from_entity(ProductVariants))
            .await?;
        manager.create_table(schema.create_table_from_entity(Carts)).await?;
        manager.create_table(schema.create_table_from_entity(CartItems)).await?;
        manager.create_table(schema.create_table_from_entity(Orders)).await?;
        manager.create_table(schema.create_table_from_entity(OrderItems)).await?;
        manager.create_table(schema.create_table_from_entity(Payments)).await?;
        manager.create_table(schema.create_table_from_entity(AuditLogs)).await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_cart_items_line")
                    .table(CartItems)
                    .col(cart_items::Column::CartId)
                    .col(cart_items::Column::ProductId)
                    .col(cart_items::Column::VariantId)
                    .unique()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_carts_status_created_at")
                    .table(Carts)
                    .col(carts::Column::Status)
                    .col(carts::Column::CreatedAt)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_orders_payment_intent_id")
                    .table(Orders)
                    .col(orders::Column::PaymentIntentId)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_payments_payment_intent_id")
                    .table(Payments)
                    .col(payments::Column::PaymentIntentId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(AuditLogs).to_owned()).await?;
        manager.drop_table(Table::drop().table(Payments).to_owned()).await?;
        manager.drop_table(Table::drop().table(OrderItems).to_owned()).await?;
        manager.drop_table(Table::drop().table(Orders).to_owned()).await?;
        manager.drop_table(Table::drop().table(CartItems).to_owned()).await?;
        manager.drop_table(Table::drop().table(Carts).to_owned()).await?;
        manager
            .drop_table(Table::drop().table(ProductVariants).to_owned())
            .await?;
        manager.drop_table(Table::drop().table(Products).to_owned()).await?;
        manager.drop_table(Table::drop().table(Users).to_owned()).await?;
        Ok(())
    }
}
