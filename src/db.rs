use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, prelude::DateTimeWithTimeZone};
use sea_orm_migration::MigratorTrait;

use crate::migration::Migrator;

/// Create a SeaORM connection.
pub async fn create_orm_conn(database_url: &str) -> Result<DatabaseConnection> {
    let mut options = ConnectOptions::new(database_url.to_owned());
    options
        .max_connections(20)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    let conn = Database::connect(options).await?;
    Ok(conn)
}

/// Apply all pending migrations.
pub async fn run_migrations(conn: &DatabaseConnection) -> Result<()> {
    Migrator::up(conn, None).await?;
    tracing::info!("database migrations applied");
    Ok(())
}

/// Current time in the representation stored in timestamp columns.
pub fn now() -> DateTimeWithTimeZone {
    Utc::now().fixed_offset()
}
