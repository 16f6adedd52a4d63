use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    domain::OrderStatus,
    models::{Order, Product},
    routes::params::Pagination,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderBulkAction {
    Confirm,
    Process,
    Ship,
    Deliver,
    Cancel,
}

impl OrderBulkAction {
    pub fn target(self) -> OrderStatus {
        match self {
            OrderBulkAction::Confirm => OrderStatus::Confirmed,
            OrderBulkAction::Process => OrderStatus::Processing,
            OrderBulkAction::Ship => OrderStatus::Shipped,
            OrderBulkAction::Deliver => OrderStatus::Delivered,
            OrderBulkAction::Cancel => OrderStatus::Cancelled,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkOrderRequest {
    pub ids: Vec<Uuid>,
    pub action: OrderBulkAction,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkActionResult {
    pub updated: u64,
    /// Ids that were missing or could not take the action.
    pub skipped: Vec<Uuid>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RefundRequest {
    /// Minor units; omit to refund everything still refundable.
    pub amount: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundResult {
    pub refunded: bool,
    pub order: Order,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct LowStockQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    /// Defaults to 5.
    pub threshold: Option<i32>,
}

impl LowStockQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            per_page: self.per_page,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InventoryAdjustRequest {
    pub delta: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LowStockList {
    pub items: Vec<Product>,
}
