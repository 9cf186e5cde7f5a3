//! # Catalog Repository
//!
//! Categories and suppliers, both keyed by name across instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use stockbridge_core::validation::validate_reference_name;
use stockbridge_core::{new_id, Category, Supplier};

/// Descriptive supplier fields, as created locally or received from the cloud.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplierDetails {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

impl SupplierDetails {
    pub fn named(name: impl Into<String>) -> Self {
        SupplierDetails {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Repository for categories and suppliers.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CatalogRepository { pool }
    }

    /// Inserts or updates a category by name.
    pub async fn upsert_category(&self, name: &str, description: Option<&str>) -> DbResult<Category> {
        let mut conn = self.pool.acquire().await?;
        upsert_category(&mut conn, name, description, Utc::now()).await?;
        fetch_category(&mut conn, name).await
    }

    pub async fn get_category(&self, name: &str) -> DbResult<Option<Category>> {
        let category = sqlx::query_as::<_, Category>(
            "SELECT id, name, description, created_at, updated_at FROM categories WHERE name = ?",
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(category)
    }

    pub async fn list_categories(&self) -> DbResult<Vec<Category>> {
        let categories = sqlx::query_as::<_, Category>(
            "SELECT id, name, description, created_at, updated_at FROM categories ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(categories)
    }

    /// Inserts or updates a supplier by name.
    pub async fn upsert_supplier(&self, details: &SupplierDetails) -> DbResult<Supplier> {
        let mut conn = self.pool.acquire().await?;
        upsert_supplier(&mut conn, details, Utc::now()).await?;
        fetch_supplier(&mut conn, &details.name).await
    }

    pub async fn get_supplier(&self, name: &str) -> DbResult<Option<Supplier>> {
        let supplier = sqlx::query_as::<_, Supplier>(
            r#"
            SELECT id, name, email, phone, address, created_at, updated_at
            FROM suppliers WHERE name = ?
            "#,
        )
        .bind(name.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(supplier)
    }

    pub async fn list_suppliers(&self) -> DbResult<Vec<Supplier>> {
        let suppliers = sqlx::query_as::<_, Supplier>(
            r#"
            SELECT id, name, email, phone, address, created_at, updated_at
            FROM suppliers ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(suppliers)
    }
}

// =============================================================================
// Connection-level helpers
// =============================================================================

/// Upserts a category and returns its row id.
pub(crate) async fn upsert_category(
    conn: &mut SqliteConnection,
    name: &str,
    description: Option<&str>,
    now: DateTime<Utc>,
) -> DbResult<String> {
    validate_reference_name("category", name)?;

    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO categories (id, name, description, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            description = excluded.description,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(new_id())
    .bind(name.trim())
    .bind(description)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    debug!(category = %name, "Category upserted");
    Ok(id)
}

/// Returns the id of the named category, creating it when missing.
pub(crate) async fn ensure_category(
    conn: &mut SqliteConnection,
    name: &str,
    now: DateTime<Utc>,
) -> DbResult<String> {
    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM categories WHERE name = ?")
        .bind(name.trim())
        .fetch_optional(&mut *conn)
        .await?;

    match existing {
        Some(id) => Ok(id),
        None => upsert_category(conn, name, None, now).await,
    }
}

/// Upserts a supplier and returns its row id.
pub(crate) async fn upsert_supplier(
    conn: &mut SqliteConnection,
    details: &SupplierDetails,
    now: DateTime<Utc>,
) -> DbResult<String> {
    validate_reference_name("supplier", &details.name)?;

    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO suppliers (id, name, email, phone, address, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            email = excluded.email,
            phone = excluded.phone,
            address = excluded.address,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(new_id())
    .bind(details.name.trim())
    .bind(&details.email)
    .bind(&details.phone)
    .bind(&details.address)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    debug!(supplier = %details.name, "Supplier upserted");
    Ok(id)
}

/// Returns the id of the named supplier, creating it when missing.
pub(crate) async fn ensure_supplier(
    conn: &mut SqliteConnection,
    name: &str,
    now: DateTime<Utc>,
) -> DbResult<String> {
    let existing: Option<String> = sqlx::query_scalar("SELECT id FROM suppliers WHERE name = ?")
        .bind(name.trim())
        .fetch_optional(&mut *conn)
        .await?;

    match existing {
        Some(id) => Ok(id),
        None => upsert_supplier(conn, &SupplierDetails::named(name), now).await,
    }
}

async fn fetch_category(conn: &mut SqliteConnection, name: &str) -> DbResult<Category> {
    let category = sqlx::query_as::<_, Category>(
        "SELECT id, name, description, created_at, updated_at FROM categories WHERE name = ?",
    )
    .bind(name.trim())
    .fetch_one(&mut *conn)
    .await?;
    Ok(category)
}

async fn fetch_supplier(conn: &mut SqliteConnection, name: &str) -> DbResult<Supplier> {
    let supplier = sqlx::query_as::<_, Supplier>(
        r#"
        SELECT id, name, email, phone, address, created_at, updated_at
        FROM suppliers WHERE name = ?
        "#,
    )
    .bind(name.trim())
    .fetch_one(&mut *conn)
    .await?;
    Ok(supplier)
}

#[cfg(test)]
mod tests {
    use super::SupplierDetails;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_category_upsert_keeps_identity() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();

        let first = catalog.upsert_category("Dairy", None).await.unwrap();
        let second = catalog.upsert_category("Dairy", Some("Milk and cheese")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.description.as_deref(), Some("Milk and cheese"));
        assert_eq!(catalog.list_categories().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_supplier_upsert_overwrites_contact() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let catalog = db.catalog();

        let mut details = SupplierDetails::named("Atlas Foods");
        details.phone = Some("0522000000".into());
        catalog.upsert_supplier(&details).await.unwrap();

        details.phone = Some("0522111111".into());
        details.email = Some("orders@atlas.example".into());
        let updated = catalog.upsert_supplier(&details).await.unwrap();

        assert_eq!(updated.phone.as_deref(), Some("0522111111"));
        assert_eq!(updated.email.as_deref(), Some("orders@atlas.example"));
        assert!(catalog.get_supplier("Atlas Foods").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_blank_category_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.catalog().upsert_category("  ", None).await.is_err());
    }
}
