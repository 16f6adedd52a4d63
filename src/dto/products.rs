use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Product;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProductRequest {
    pub name: String,
    pub sku: String,
    pub description: Option<String>,
    pub price: i64,
    pub inventory_quantity: i32,
    #[serde(default = "default_true")]
    pub track_inventory: bool,
    #[serde(default = "default_true")]
    pub taxable: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<i64>,
    pub track_inventory: Option<bool>,
    pub taxable: Option<bool>,
}

#[derive(Serialize, ToSchema)]
#[serde(transparent)]
pub struct ProductList {
    #[schema(value_type = Vec<Product>)]
    pub items: Vec<Product>,
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductBulkAction {
    Activate,
    Deactivate,
    Delete,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkProductRequest {
    pub ids: Vec<Uuid>,
    pub action: ProductBulkAction,
}
