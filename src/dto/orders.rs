use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{Order, OrderItem, Payment};

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentConfirmation {
    pub paid: bool,
    pub order: Order,
}
