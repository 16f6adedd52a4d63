use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Order, OrderItem};

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct AddressSnapshot {
    pub name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
}

impl AddressSnapshot {
    /// Messages for blank required fields, prefixed with `label`.
    pub fn validate(&self, label: &str) -> Vec<String> {
        [
            ("name", &self.name),
            ("line1", &self.line1),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| format!("{label} {field} can't be blank"))
        .collect()
    }
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    /// Required for guest checkout; ignored when signed in.
    pub email: Option<String>,
    pub billing_address: Option<AddressSnapshot>,
    pub shipping_address: Option<AddressSnapshot>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order: Order,
    pub items: Vec<OrderItem>,
    /// Handed to the storefront to confirm the payment client-side.
    pub client_secret: Option<String>,
}
