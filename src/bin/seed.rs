use chrono::Duration;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use storefront_api::{
    config::AppConfig,
    db::{create_orm_conn, now, run_migrations},
    entity::{product_variants, products, users},
    middleware::auth::issue_token,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let orm = create_orm_conn(&config.database_url).await?;
    run_migrations(&orm).await?;

    let admin_id = ensure_user(&orm, "admin@example.com", "Store Admin", "admin").await?;
    let user_id = ensure_user(&orm, "user@example.com", "Sample Shopper", "user").await?;
    seed_products(&orm).await?;

    let token = issue_token(&config.jwt_secret, admin_id, "admin", Duration::days(7))?;
    println!("Seed completed. Admin ID: {admin_id}, User ID: {user_id}");
    println!("Admin bearer token (7 days): {token}");
    Ok(())
}

async fn ensure_user(
    orm: &DatabaseConnection,
    email: &str,
    name: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let existing = users::Entity::find()
        .filter(users::Column::Email.eq(email))
        .one(orm)
        .await?;

    let user_id = match existing {
        Some(user) if user.role == role => user.id,
        Some(user) => {
            let mut active: users::ActiveModel = user.into();
            active.role = Set(role.to_string());
            active.update(orm).await?.id
        }
        None => {
            users::ActiveModel {
                id: Set(Uuid::new_v4()),
                email: Set(email.to_string()),
                name: Set(Some(name.to_string())),
                role: Set(role.to_string()),
                created_at: Set(now()),
            }
            .insert(orm)
            .await?
            .id
        }
    };

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn seed_products(orm: &DatabaseConnection) -> anyhow::Result<()> {
    let catalogue = [
        ("Axum Hoodie", "HOODIE-AXUM", "Warm hoodie for Rustaceans", 5_500, 50),
        ("Ferris Mug", "MUG-FERRIS", "Coffee tastes better with Ferris", 1_200, 100),
        ("Rust Sticker Pack", "STICKERS-RUST", "Decorate your laptop", 500, 200),
        ("E-book: Async Rust", "EBOOK-ASYNC", "Learn async Rust patterns", 2_500, 0),
    ];

    for (name, sku, description, price, stock) in catalogue {
        let exists = products::Entity::find()
            .filter(products::Column::Sku.eq(sku))
            .one(orm)
            .await?;
        if exists.is_some() {
            continue;
        }

        let timestamp = now();
        let digital = sku.starts_with("EBOOK");
        let product = products::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            sku: Set(sku.to_string()),
            description: Set(Some(description.to_string())),
            price: Set(price),
            inventory_quantity: Set(stock),
            track_inventory: Set(!digital),
            taxable: Set(true),
            active: Set(true),
            created_at: Set(timestamp),
            updated_at: Set(timestamp),
        }
        .insert(orm)
        .await?;

        if sku == "HOODIE-AXUM" {
            product_variants::ActiveModel {
                id: Set(Uuid::new_v4()),
                product_id: Set(product.id),
                name: Set("XL".to_string()),
                sku: Set("HOODIE-AXUM-XL".to_string()),
                price: Set(5_900),
                created_at: Set(timestamp),
            }
            .insert(orm)
            .await?;
        }
    }

    println!("Seeded products");
    Ok(())
}
