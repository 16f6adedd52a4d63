//! Serializable views of persisted records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    domain::{FulfillmentStatus, OrderStatus, PaymentRecordStatus, PaymentStatus},
    entity::{order_items, orders, payments, products},
};

#[derive(Debug, Serialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub sku: String,
    pub description: Option<String>,
    pub price: i64,
    pub inventory_quantity: i32,
    pub track_inventory: bool,
    pub taxable: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<products::Model> for Product {
    fn from(model: products::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            sku: model.sku,
            description: model.description,
            price: model.price,
            inventory_quantity: model.inventory_quantity,
            track_inventory: model.track_inventory,
            taxable: model.taxable,
            active: model.active,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub email: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub subtotal: i64,
    pub tax_amount: i64,
    pub shipping_amount: i64,
    pub discount_amount: i64,
    pub total: i64,
    pub currency: String,
    #[schema(value_type = Option<Object>)]
    pub billing_address: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub shipping_address: Option<Value>,
    pub notes: Option<String>,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<orders::Model> for Order {
    fn from(model: orders::Model) -> Self {
        Self {
            id: model.id,
            order_number: model.order_number,
            user_id: model.user_id,
            email: model.email,
            status: model.status,
            payment_status: model.payment_status,
            fulfillment_status: model.fulfillment_status,
            subtotal: model.subtotal,
            tax_amount: model.tax_amount,
            shipping_amount: model.shipping_amount,
            discount_amount: model.discount_amount,
            total: model.total,
            currency: model.currency,
            billing_address: model.billing_address,
            shipping_address: model.shipping_address,
            notes: model.notes,
            payment_intent_id: model.payment_intent_id,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    pub product_name: String,
    pub product_sku: String,
    pub variant_name: Option<String>,
    pub quantity: i32,
    pub unit_price: i64,
    pub total_price: i64,
    pub taxable: bool,
    pub created_at: DateTime<Utc>,
}

impl From<order_items::Model> for OrderItem {
    fn from(model: order_items::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            product_id: model.product_id,
            variant_id: model.variant_id,
            product_name: model.product_name,
            product_sku: model.product_sku,
            variant_name: model.variant_name,
            quantity: model.quantity,
            unit_price: model.unit_price,
            total_price: model.total_price,
            taxable: model.taxable,
            created_at: model.created_at.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Payment {
    pub id: Uuid,
    pub payment_intent_id: String,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentRecordStatus,
    pub gateway: String,
    pub captured: bool,
    pub refunded_amount: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<payments::Model> for Payment {
    fn from(model: payments::Model) -> Self {
        Self {
            id: model.id,
            payment_intent_id: model.payment_intent_id,
            amount: model.amount,
            currency: model.currency,
            status: model.status,
            gateway: model.gateway,
            captured: model.captured,
            refunded_amount: model.refunded_amount,
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}
