use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait, sea_query::Expr,
};
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    audit,
    db::now,
    domain::{CartStatus, FulfillmentStatus, OrderStatus, PaymentStatus},
    dto::checkout::{AddressSnapshot, CheckoutRequest},
    entity::{
        cart_items::{Column as CartItemCol, Entity as CartItems, Model as CartItemModel},
        carts::{ActiveModel as CartActive, Model as CartModel},
        order_items::{ActiveModel as OrderItemActive, Model as OrderItemModel},
        orders::{ActiveModel as OrderActive, Model as OrderModel},
        product_variants::{Column as VariantCol, Entity as ProductVariants},
        products::{Column as ProdCol, Entity as Products, Model as ProductModel},
        users::Model as UserModel,
    },
    pricing::{self, CartTotals, PricedLine},
    services::payment_service::{PaymentError, PaymentService},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockShortfall {
    pub product_id: Uuid,
    pub product_name: String,
    pub requested: i64,
    pub available: i32,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    CartEmpty,

    #[error("insufficient inventory for {} product(s)", .0.len())]
    InsufficientInventory(Vec<StockShortfall>),

    #[error("order validation failed: {}", .0.join(", "))]
    OrderValidationFailed(Vec<String>),

    #[error("transaction aborted: {0}")]
    TransactionAborted(String),
}

impl CheckoutError {
    /// Human-readable messages, one per problem.
    pub fn messages(&self) -> Vec<String> {
        match self {
            CheckoutError::CartEmpty => vec!["Cart is empty".to_string()],
            CheckoutError::InsufficientInventory(shortfalls) => shortfalls
                .iter()
                .map(|s| {
                    format!(
                        "Insufficient inventory for {}: requested {}, available {}",
                        s.product_name, s.requested, s.available
                    )
                })
                .collect(),
            CheckoutError::OrderValidationFailed(messages) => messages.clone(),
            CheckoutError::TransactionAborted(reason) => {
                vec![format!("Transaction failed: {reason}")]
            }
        }
    }
}

impl From<DbErr> for CheckoutError {
    fn from(err: DbErr) -> Self {
        CheckoutError::TransactionAborted(err.to_string())
    }
}

impl From<PaymentError> for CheckoutError {
    fn from(err: PaymentError) -> Self {
        CheckoutError::TransactionAborted(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckoutParams {
    pub email: Option<String>,
    pub billing_address: Option<AddressSnapshot>,
    pub shipping_address: Option<AddressSnapshot>,
    pub notes: Option<String>,
    pub currency: String,
}

impl CheckoutParams {
    pub fn from_request(request: CheckoutRequest, currency: &str) -> Self {
        Self {
            email: request.email,
            billing_address: request.billing_address,
            shipping_address: request.shipping_address,
            notes: request.notes,
            currency: currency.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct CheckoutOutcome {
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
    pub client_secret: Option<String>,
}

/// A cart line joined with its product and optional variant name.
struct CheckoutLine {
    item: CartItemModel,
    product: ProductModel,
    variant_name: Option<String>,
}

impl PricedLine for CheckoutLine {
    fn quantity(&self) -> i32 {
        self.item.quantity
    }

    fn unit_price(&self) -> i64 {
        self.item.unit_price
    }
}

pub fn calculate_totals(items: Option<&[CartItemModel]>) -> CartTotals {
    pricing::calculate_totals(items)
}

/// `ORD-YYYYMMDD-XXXXXXXX` with eight random uppercase hex characters.
pub fn generate_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD-{}-{suffix}", Utc::now().format("%Y%m%d"))
}

/// Turn a cart into a pending order with a payment intent attached.
///
/// Nothing is persisted unless every step succeeds. The cart is emptied but
/// its status is left for the caller to move to `converted`.
#[instrument(skip(db, payments, cart, user, params), fields(cart_id = %cart.id))]
pub async fn create_order_from_cart(
    db: &DatabaseConnection,
    payments: &PaymentService,
    cart: &CartModel,
    user: Option<&UserModel>,
    params: CheckoutParams,
) -> Result<CheckoutOutcome, CheckoutError> {
    if cart.status != CartStatus::Active {
        return Err(CheckoutError::OrderValidationFailed(vec![format!(
            "Cart is {} and can no longer be checked out",
            cart.status
        )]));
    }

    let lines = load_lines(db, cart.id).await?;
    if lines.is_empty() {
        return Err(CheckoutError::CartEmpty);
    }

    let shortfalls = find_shortfalls(&lines);
    if !shortfalls.is_empty() {
        tracing::info!(count = shortfalls.len(), "checkout blocked by inventory");
        return Err(CheckoutError::InsufficientInventory(shortfalls));
    }

    let email = user
        .map(|u| u.email.clone())
        .or_else(|| params.email.clone())
        .map(|email| email.trim().to_string())
        .unwrap_or_default();
    let problems = validate_contact(&email, &params);
    if !problems.is_empty() {
        return Err(CheckoutError::OrderValidationFailed(problems));
    }

    let outcome = place_order(db, payments, cart, user, email, &params, &lines).await?;

    tracing::info!(
        order_id = %outcome.order.id,
        order_number = %outcome.order.order_number,
        total = outcome.order.total,
        "order created"
    );
    audit::record(
        db,
        user.map(|u| u.id),
        "checkout",
        "orders",
        serde_json::json!({
            "order_id": outcome.order.id,
            "order_number": outcome.order.order_number,
            "total": outcome.order.total,
        }),
    )
    .await;

    Ok(outcome)
}

async fn load_lines(db: &DatabaseConnection, cart_id: Uuid) -> Result<Vec<CheckoutLine>, DbErr> {
    let rows = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart_id))
        .order_by_asc(CartItemCol::CreatedAt)
        .find_also_related(Products)
        .all(db)
        .await?;

    let variant_ids: Vec<Uuid> = rows.iter().filter_map(|(item, _)| item.variant_id).collect();
    let variant_names: HashMap<Uuid, String> = if variant_ids.is_empty() {
        HashMap::new()
    } else {
        ProductVariants::find()
            .filter(VariantCol::Id.is_in(variant_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|variant| (variant.id, variant.name))
            .collect()
    };

    let mut lines = Vec::with_capacity(rows.len());
    for (item, product) in rows {
        let Some(product) = product else {
            tracing::warn!(cart_item_id = %item.id, "cart item without product skipped");
            continue;
        };
        let variant_name = item.variant_id.and_then(|id| variant_names.get(&id).cloned());
        lines.push(CheckoutLine {
            item,
            product,
            variant_name,
        });
    }
    Ok(lines)
}

/// Tracked products whose stock cannot cover the cart, summed across lines.
fn find_shortfalls(lines: &[CheckoutLine]) -> Vec<StockShortfall> {
    let mut requested: BTreeMap<Uuid, (i64, &ProductModel)> = BTreeMap::new();
    for line in lines.iter().filter(|l| l.product.track_inventory) {
        let entry = requested.entry(line.product.id).or_insert((0, &line.product));
        entry.0 = entry.0.saturating_add(i64::from(line.item.quantity));
    }

    requested
        .into_values()
        .filter(|(quantity, product)| !product.has_stock_for(*quantity))
        .map(|(quantity, product)| StockShortfall {
            product_id: product.id,
            product_name: product.name.clone(),
            requested: quantity,
            available: product.inventory_quantity,
        })
        .collect()
}

fn validate_contact(email: &str, params: &CheckoutParams) -> Vec<String> {
    let mut problems = Vec::new();
    if email.is_empty() {
        problems.push("Email can't be blank".to_string());
    } else if !email.contains('@') {
        problems.push("Email is invalid".to_string());
    }
    if let Some(address) = &params.billing_address {
        problems.extend(address.validate("Billing address"));
    }
    if let Some(address) = &params.shipping_address {
        problems.extend(address.validate("Shipping address"));
    }
    problems
}

/// Run [`write_order`] in its own transaction. On any error every write of
/// the attempt is rolled back.
async fn place_order(
    db: &DatabaseConnection,
    payments: &PaymentService,
    cart: &CartModel,
    user: Option<&UserModel>,
    email: String,
    params: &CheckoutParams,
    lines: &[CheckoutLine],
) -> Result<CheckoutOutcome, CheckoutError> {
    let txn = db.begin().await?;
    match write_order(&txn, payments, cart, user, email, params, lines).await {
        Ok(outcome) => {
            txn.commit().await?;
            Ok(outcome)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                tracing::warn!(error = %rollback_err, "checkout rollback failed");
            }
            if let CheckoutError::TransactionAborted(reason) = &err {
                tracing::error!(%reason, "checkout transaction aborted");
            }
            Err(err)
        }
    }
}

async fn write_order(
    txn: &DatabaseTransaction,
    payments: &PaymentService,
    cart: &CartModel,
    user: Option<&UserModel>,
    email: String,
    params: &CheckoutParams,
    lines: &[CheckoutLine],
) -> Result<CheckoutOutcome, CheckoutError> {
    let totals = pricing::calculate_totals(Some(lines));
    let timestamp = now();

    let to_json = |address: &Option<AddressSnapshot>| {
        address
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|err| CheckoutError::TransactionAborted(err.to_string()))
    };

    let order = OrderActive {
        id: Set(Uuid::new_v4()),
        order_number: Set(generate_order_number()),
        user_id: Set(user.map(|u| u.id)),
        email: Set(email),
        status: Set(OrderStatus::Pending),
        payment_status: Set(PaymentStatus::PaymentPending),
        fulfillment_status: Set(FulfillmentStatus::Unfulfilled),
        subtotal: Set(totals.subtotal),
        tax_amount: Set(totals.tax),
        shipping_amount: Set(totals.shipping),
        discount_amount: Set(0),
        total: Set(totals.total),
        currency: Set(params.currency.clone()),
        billing_address: Set(to_json(&params.billing_address)?),
        shipping_address: Set(to_json(&params.shipping_address)?),
        notes: Set(params.notes.clone().filter(|n| !n.trim().is_empty())),
        payment_intent_id: Set(None),
        gateway_customer_id: Set(None),
        created_at: Set(timestamp),
        updated_at: Set(timestamp),
    }
    .insert(txn)
    .await?;

    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(Some(line.product.id)),
            variant_id: Set(line.item.variant_id),
            product_name: Set(line.product.name.clone()),
            product_sku: Set(line.product.sku.clone()),
            variant_name: Set(line.variant_name.clone()),
            quantity: Set(line.item.quantity),
            unit_price: Set(line.item.unit_price),
            total_price: Set(line.line_total()),
            taxable: Set(line.product.taxable),
            created_at: Set(timestamp),
        }
        .insert(txn)
        .await?;
        items.push(item);

        if line.product.track_inventory {
            decrement_inventory(txn, &line.product, line.item.quantity).await?;
        }
    }

    let (order, intent) = payments.create_payment_intent(txn, order).await?;

    CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(txn)
        .await?;
    let mut cart: CartActive = cart.clone().into();
    cart.subtotal = Set(0);
    cart.tax_amount = Set(0);
    cart.shipping_amount = Set(0);
    cart.discount_amount = Set(0);
    cart.total = Set(0);
    cart.updated_at = Set(timestamp);
    cart.update(txn).await?;

    Ok(CheckoutOutcome {
        order,
        items,
        client_secret: intent.client_secret,
    })
}

/// Conditional decrement; a concurrent checkout that got there first makes
/// this match no row.
async fn decrement_inventory(
    txn: &DatabaseTransaction,
    product: &ProductModel,
    quantity: i32,
) -> Result<(), CheckoutError> {
    let result = Products::update_many()
        .col_expr(
            ProdCol::InventoryQuantity,
            Expr::col(ProdCol::InventoryQuantity).sub(quantity),
        )
        .col_expr(ProdCol::UpdatedAt, Expr::value(now()))
        .filter(ProdCol::Id.eq(product.id))
        .filter(ProdCol::InventoryQuantity.gte(quantity))
        .exec(txn)
        .await?;

    if result.rows_affected == 0 {
        let available = Products::find_by_id(product.id)
            .one(txn)
            .await?
            .map_or(0, |p| p.inventory_quantity);
        return Err(CheckoutError::InsufficientInventory(vec![StockShortfall {
            product_id: product.id,
            product_name: product.name.clone(),
            requested: i64::from(quantity),
            available,
        }]));
    }
    Ok(())
}
