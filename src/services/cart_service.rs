use chrono::Duration;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    audit,
    db::now,
    domain::CartStatus,
    dto::cart::{AddToCartRequest, CartItemDto, CartView, UpdateCartItemRequest},
    entity::{
        cart_items::{
            ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems,
            Model as CartItemModel,
        },
        carts::{ActiveModel as CartActive, Column as CartCol, Entity as Carts, Model as CartModel},
        product_variants::Entity as ProductVariants,
        products::Entity as Products,
    },
    error::{AppError, AppResult},
    pricing::{PricedLine, calculate_totals},
};

/// Largest quantity a single cart line may hold.
pub const MAX_LINE_QUANTITY: i32 = 10_000;

/// Who a cart belongs to: a signed-in user or an anonymous session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOwner {
    User(Uuid),
    Session(String),
}

impl CartOwner {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            CartOwner::User(id) => Some(*id),
            CartOwner::Session(_) => None,
        }
    }

    fn condition(&self) -> Condition {
        match self {
            CartOwner::User(id) => Condition::all().add(CartCol::UserId.eq(*id)),
            CartOwner::Session(session) => Condition::all()
                .add(CartCol::UserId.is_null())
                .add(CartCol::SessionId.eq(session.as_str())),
        }
    }
}

pub async fn find_active_cart<C: ConnectionTrait>(
    conn: &C,
    owner: &CartOwner,
) -> Result<Option<CartModel>, DbErr> {
    Carts::find()
        .filter(owner.condition())
        .filter(CartCol::Status.eq(CartStatus::Active))
        .order_by_desc(CartCol::CreatedAt)
        .one(conn)
        .await
}

pub async fn find_or_create_cart<C: ConnectionTrait>(
    conn: &C,
    owner: &CartOwner,
    ttl: Duration,
) -> Result<CartModel, DbErr> {
    if let Some(cart) = find_active_cart(conn, owner).await? {
        return Ok(cart);
    }

    let timestamp = now();
    let (user_id, session_id) = match owner {
        CartOwner::User(id) => (Some(*id), None),
        CartOwner::Session(session) => (None, Some(session.clone())),
    };
    let cart = CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        session_id: Set(session_id),
        status: Set(CartStatus::Active),
        subtotal: Set(0),
        tax_amount: Set(0),
        shipping_amount: Set(0),
        discount_amount: Set(0),
        total: Set(0),
        expires_at: Set(timestamp + ttl),
        created_at: Set(timestamp),
        updated_at: Set(timestamp),
    }
    .insert(conn)
    .await?;

    tracing::debug!(cart_id = %cart.id, "cart created");
    Ok(cart)
}

/// Put a product in the cart. An existing line for the same product and
/// variant gets the new quantity instead of a second row.
pub async fn add_item(
    db: &DatabaseConnection,
    owner: &CartOwner,
    ttl: Duration,
    payload: AddToCartRequest,
) -> AppResult<CartView> {
    if payload.quantity <= 0 {
        return Err(AppError::BadRequest(
            "quantity must be greater than 0".to_string(),
        ));
    }
    check_line_limit(payload.quantity)?;

    let product = Products::find_by_id(payload.product_id)
        .one(db)
        .await?
        .filter(|p| p.active)
        .ok_or_else(|| AppError::BadRequest("product not found".to_string()))?;

    let unit_price = match payload.variant_id {
        Some(variant_id) => {
            ProductVariants::find_by_id(variant_id)
                .one(db)
                .await?
                .filter(|v| v.product_id == product.id)
                .ok_or_else(|| AppError::BadRequest("variant not found".to_string()))?
                .price
        }
        None => product.price,
    };

    let txn = db.begin().await?;
    let cart = find_or_create_cart(&txn, owner, ttl).await?;
    let timestamp = now();

    match find_line(&txn, cart.id, product.id, payload.variant_id).await? {
        Some(line) => {
            let mut line: CartItemActive = line.into();
            line.quantity = Set(payload.quantity);
            line.unit_price = Set(unit_price);
            line.updated_at = Set(timestamp);
            line.update(&txn).await?;
        }
        None => {
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                variant_id: Set(payload.variant_id),
                quantity: Set(payload.quantity),
                unit_price: Set(unit_price),
                created_at: Set(timestamp),
                updated_at: Set(timestamp),
            }
            .insert(&txn)
            .await?;
        }
    }
    let cart = refresh_totals(&txn, &cart).await?;
    txn.commit().await?;

    audit::record(
        db,
        owner.user_id(),
        "cart_update",
        "cart_items",
        serde_json::json!({
            "cart_id": cart.id,
            "product_id": product.id,
            "quantity": payload.quantity,
        }),
    )
    .await;

    build_view(db, Some(cart)).await
}

fn check_line_limit(quantity: i32) -> AppResult<()> {
    if quantity > MAX_LINE_QUANTITY {
        return Err(AppError::BadRequest(format!(
            "quantity must not exceed {MAX_LINE_QUANTITY}"
        )));
    }
    Ok(())
}

/// Change a line's quantity; zero removes the line.
pub async fn update_item(
    db: &DatabaseConnection,
    owner: &CartOwner,
    product_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<CartView> {
    if payload.quantity < 0 {
        return Err(AppError::BadRequest(
            "quantity must not be negative".to_string(),
        ));
    }
    if payload.quantity == 0 {
        return remove_item(db, owner, product_id, payload.variant_id).await;
    }
    check_line_limit(payload.quantity)?;

    let cart = find_active_cart(db, owner)
        .await?
        .ok_or(AppError::NotFound)?;
    let line = find_line(db, cart.id, product_id, payload.variant_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let txn = db.begin().await?;
    let mut line: CartItemActive = line.into();
    line.quantity = Set(payload.quantity);
    line.updated_at = Set(now());
    line.update(&txn).await?;
    let cart = refresh_totals(&txn, &cart).await?;
    txn.commit().await?;

    build_view(db, Some(cart)).await
}

/// Drop the product from the cart. Without a variant every line of the
/// product goes.
pub async fn remove_item(
    db: &DatabaseConnection,
    owner: &CartOwner,
    product_id: Uuid,
    variant_id: Option<Uuid>,
) -> AppResult<CartView> {
    let cart = find_active_cart(db, owner)
        .await?
        .ok_or(AppError::NotFound)?;

    let txn = db.begin().await?;
    let mut delete = CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(product_id));
    if let Some(variant_id) = variant_id {
        delete = delete.filter(CartItemCol::VariantId.eq(variant_id));
    }
    let result = delete.exec(&txn).await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }
    let cart = refresh_totals(&txn, &cart).await?;
    txn.commit().await?;

    audit::record(
        db,
        owner.user_id(),
        "cart_remove",
        "cart_items",
        serde_json::json!({ "cart_id": cart.id, "product_id": product_id }),
    )
    .await;

    build_view(db, Some(cart)).await
}

pub async fn view_cart(db: &DatabaseConnection, owner: &CartOwner) -> AppResult<CartView> {
    let cart = find_active_cart(db, owner).await?;
    build_view(db, cart).await
}

/// Recompute and store the cart's derived totals from its items.
pub async fn refresh_totals<C: ConnectionTrait>(
    conn: &C,
    cart: &CartModel,
) -> Result<CartModel, DbErr> {
    let items = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .all(conn)
        .await?;
    let totals = calculate_totals(Some(items.as_slice()));

    let mut active: CartActive = cart.clone().into();
    active.subtotal = Set(totals.subtotal);
    active.tax_amount = Set(totals.tax);
    active.shipping_amount = Set(totals.shipping);
    active.discount_amount = Set(0);
    active.total = Set(totals.total);
    active.updated_at = Set(now());
    active.update(conn).await
}

/// Move an active cart to `converted`. Returns `false` when the cart is gone
/// or no longer active.
pub async fn mark_converted<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<bool, DbErr> {
    let Some(cart) = Carts::find_by_id(cart_id).one(conn).await? else {
        return Ok(false);
    };
    if cart.status == CartStatus::Converted {
        return Ok(true);
    }
    let status = match cart.status.transition_to(CartStatus::Converted) {
        Ok(status) => status,
        Err(err) => {
            tracing::warn!(error = %err, cart_id = %cart.id, "cart not converted");
            return Ok(false);
        }
    };

    let mut active: CartActive = cart.into();
    active.status = Set(status);
    active.updated_at = Set(now());
    active.update(conn).await?;
    Ok(true)
}

async fn find_line<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    product_id: Uuid,
    variant_id: Option<Uuid>,
) -> Result<Option<CartItemModel>, DbErr> {
    let variant = match variant_id {
        Some(id) => CartItemCol::VariantId.eq(id),
        None => CartItemCol::VariantId.is_null(),
    };
    CartItems::find()
        .filter(CartItemCol::CartId.eq(cart_id))
        .filter(CartItemCol::ProductId.eq(product_id))
        .filter(variant)
        .one(conn)
        .await
}

async fn build_view(db: &DatabaseConnection, cart: Option<CartModel>) -> AppResult<CartView> {
    let Some(cart) = cart else {
        return Ok(CartView {
            cart_id: None,
            status: CartStatus::Active,
            items: Vec::new(),
            totals: Default::default(),
        });
    };

    let rows = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::CreatedAt)
        .find_also_related(Products)
        .all(db)
        .await?;

    let lines: Vec<CartItemModel> = rows.iter().map(|(item, _)| item.clone()).collect();
    let totals = calculate_totals(Some(lines.as_slice()));
    let items = rows
        .into_iter()
        .map(|(item, product)| {
            let (product_name, sku) = product
                .map(|p| (p.name, p.sku))
                .unwrap_or_default();
            CartItemDto {
                id: item.id,
                product_id: item.product_id,
                variant_id: item.variant_id,
                product_name,
                sku,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total(),
            }
        })
        .collect();

    Ok(CartView {
        cart_id: Some(cart.id),
        status: cart.status,
        items,
        totals,
    })
}
