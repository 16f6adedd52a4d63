use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    db::now,
    dto::{
        admin::BulkActionResult,
        products::{
            BulkProductRequest, CreateProductRequest, ProductBulkAction, ProductList,
            UpdateProductRequest,
        },
    },
    entity::products::{ActiveModel, Column, Entity as Products},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Product,
    response::{ApiResponse, Meta},
    routes::params::{ProductQuery, ProductSortBy, SortOrder},
    state::AppState,
};

pub async fn list_products(
    state: &AppState,
    query: ProductQuery,
) -> AppResult<ApiResponse<ProductList>> {
    let (page, limit, offset) = query.pagination().normalize();
    let mut condition = Condition::all().add(Column::Active.eq(true));

    if let Some(search) = query.q.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        condition = condition.add(
            Condition::any()
                .add(Column::Name.contains(search))
                .add(Column::Sku.contains(search))
                .add(Column::Description.contains(search)),
        );
    }
    if let Some(min_price) = query.min_price {
        condition = condition.add(Column::Price.gte(min_price));
    }
    if let Some(max_price) = query.max_price {
        condition = condition.add(Column::Price.lte(max_price));
    }

    let sort_col = match query.sort_by.unwrap_or(ProductSortBy::CreatedAt) {
        ProductSortBy::CreatedAt => Column::CreatedAt,
        ProductSortBy::Price => Column::Price,
        ProductSortBy::Name => Column::Name,
    };
    let mut finder = Products::find().filter(condition);
    finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(sort_col),
        SortOrder::Desc => finder.order_by_desc(sort_col),
    };

    let total = finder.clone().count(&state.orm).await?;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    Ok(ApiResponse::paginated(
        "Products",
        ProductList { items },
        page,
        limit,
        total,
    ))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let product = Products::find_by_id(id)
        .filter(Column::Active.eq(true))
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(ApiResponse::success("Product", product.into(), None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let mut problems = Vec::new();
    if payload.name.trim().is_empty() {
        problems.push("name can't be blank".to_string());
    }
    if payload.sku.trim().is_empty() {
        problems.push("sku can't be blank".to_string());
    }
    if payload.price < 0 {
        problems.push("price must not be negative".to_string());
    }
    if payload.inventory_quantity < 0 {
        problems.push("inventory_quantity must not be negative".to_string());
    }
    if !problems.is_empty() {
        return Err(AppError::Unprocessable(problems));
    }

    let sku = payload.sku.trim().to_string();
    let taken = Products::find()
        .filter(Column::Sku.eq(sku.as_str()))
        .count(&state.orm)
        .await?;
    if taken > 0 {
        return Err(AppError::Unprocessable(vec![format!(
            "sku {sku} is already taken"
        )]));
    }

    let timestamp = now();
    let product = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name.trim().to_string()),
        sku: Set(sku),
        description: Set(payload.description),
        price: Set(payload.price),
        inventory_quantity: Set(payload.inventory_quantity),
        track_inventory: Set(payload.track_inventory),
        taxable: Set(payload.taxable),
        active: Set(true),
        created_at: Set(timestamp),
        updated_at: Set(timestamp),
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id, "sku": product.sku }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product created",
        product.into(),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    if payload.price.is_some_and(|price| price < 0) {
        return Err(AppError::Unprocessable(vec![
            "price must not be negative".to_string(),
        ]));
    }

    let existing = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::NotFound)?;

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name.filter(|n| !n.trim().is_empty()) {
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(track_inventory) = payload.track_inventory {
        active.track_inventory = Set(track_inventory);
    }
    if let Some(taxable) = payload.taxable {
        active.taxable = Set(taxable);
    }
    active.updated_at = Set(now());
    let product = active.update(&state.orm).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        product.into(),
        Some(Meta::empty()),
    ))
}

/// Activate, deactivate or delete several products at once. Deleting keeps
/// order history intact; order items only lose their product reference.
pub async fn bulk_products(
    state: &AppState,
    user: &AuthUser,
    payload: BulkProductRequest,
) -> AppResult<ApiResponse<BulkActionResult>> {
    ensure_admin(user)?;
    if payload.ids.is_empty() {
        return Err(AppError::BadRequest("ids must not be empty".into()));
    }

    let existing: Vec<Uuid> = Products::find()
        .filter(Column::Id.is_in(payload.ids.clone()))
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();
    let skipped: Vec<Uuid> = payload
        .ids
        .iter()
        .filter(|id| !existing.contains(id))
        .copied()
        .collect();

    let updated = match payload.action {
        ProductBulkAction::Activate | ProductBulkAction::Deactivate => {
            let active = matches!(payload.action, ProductBulkAction::Activate);
            Products::update_many()
                .set(ActiveModel {
                    active: Set(active),
                    updated_at: Set(now()),
                    ..Default::default()
                })
                .filter(Column::Id.is_in(existing.clone()))
                .exec(&state.orm)
                .await?
                .rows_affected
        }
        ProductBulkAction::Delete => {
            Products::delete_many()
                .filter(Column::Id.is_in(existing.clone()))
                .exec(&state.orm)
                .await?
                .rows_affected
        }
    };

    audit::record(
        &state.orm,
        Some(user.user_id),
        "product_bulk",
        "products",
        serde_json::json!({ "action": format!("{:?}", payload.action), "ids": existing }),
    )
    .await;

    Ok(ApiResponse::success(
        "Products updated",
        BulkActionResult { updated, skipped },
        Some(Meta::empty()),
    ))
}
