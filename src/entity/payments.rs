use sea_orm::entity::prelude::*;

use crate::domain::PaymentRecordStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub order_id: Uuid,
    pub payment_intent_id: String,
    /// Charge id reported by the gateway once the intent settles.
    pub external_payment_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentRecordStatus,
    pub gateway: String,
    pub captured: bool,
    pub authorized: bool,
    pub refunded_amount: i64,
    pub failure_reason: Option<String>,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn refundable_amount(&self) -> i64 {
        (self.amount - self.refunded_amount).max(0)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::orders::Entity",
        from = "Column::OrderId",
        to = "super::orders::Column::Id",
        on_delete = "Cascade"
    )]
    Orders,
}

impl Related<super::orders::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
