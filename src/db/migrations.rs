//! Database migrations and initialization.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Initialize the SQLite database with schema and pragmas.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    init_db_with_timeout(db_path, DEFAULT_ACQUIRE_TIMEOUT).await
}

/// Same as [`init_db`] with an explicit bound on waiting for a pooled connection.
pub async fn init_db_with_timeout(
    db_path: &str,
    acquire_timeout: Duration,
) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let busy_timeout_ms = acquire_timeout.as_millis().min(i64::MAX as u128) as i64;
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(acquire_timeout)
        .after_connect(move |conn, _meta| {
            Box::pin(async move { configure_pragmas_conn(conn, busy_timeout_ms).await })
        })
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully at {}", db_path);
    Ok(pool)
}

/// Run all database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    info!("Running database migrations...");
    let schema_sql = include_str!("schema.sql");

    for statement in schema_sql.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }

    info!("Migrations completed successfully");
    Ok(())
}

async fn configure_pragmas_conn(
    conn: &mut SqliteConnection,
    busy_timeout_ms: i64,
) -> Result<(), sqlx::Error> {
    use sqlx::Row;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // journal_mode returns the actual mode set; must use fetch to get result
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.get(0);
    tracing::debug!(journal_mode = %journal_mode, "SQLite journal mode");

    // PRAGMA does not take bound parameters.
    sqlx::query(&format!("PRAGMA busy_timeout = {}", busy_timeout_ms))
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn fresh_pool() -> (SqlitePool, TempDir, String) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (pool, temp_dir, db_path)
    }

    #[tokio::test]
    async fn test_init_db_creates_database() {
        let (pool, _temp, db_path) = fresh_pool().await;
        assert!(Path::new(&db_path).exists());

        let result: (i64,) = sqlx::query_as("SELECT 1")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1);
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let (pool, _temp, _) = fresh_pool().await;

        for table in [
            "participants",
            "shop_relationships",
            "orders",
            "order_items",
            "device_sales",
            "device_accumulators",
            "product_sales_metrics",
            "shop_sales_metrics",
            "cohort_versions",
            "monthly_rollups",
        ] {
            let result: (String,) =
                sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
                    .bind(table)
                    .fetch_one(&pool)
                    .await
                    .unwrap_or_else(|e| panic!("{table} missing: {e}"));
            assert_eq!(result.0, table);
        }
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let (pool, _temp, _) = fresh_pool().await;

        run_migrations(&pool)
            .await
            .expect("second migration run failed");

        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='table'")
                .fetch_one(&pool)
                .await
                .expect("query failed");
        assert!(result.0 >= 10);
    }

    #[tokio::test]
    async fn test_pragmas_configured() {
        let (pool, _temp, _) = fresh_pool().await;

        let result: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1);

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        // `journal_mode=WAL` is best-effort; SQLite can fall back depending on environment.
        assert!(
            matches!(result.0.as_str(), "wal" | "delete"),
            "unexpected journal_mode: {}",
            result.0
        );
    }

    #[tokio::test]
    async fn test_single_active_relationship_enforced() {
        let (pool, _temp, _) = fresh_pool().await;

        for (id, role) in [("shop-1", "shop"), ("kol-a", "kol"), ("kol-b", "kol")] {
            sqlx::query("INSERT INTO participants (id, name, role, created_at) VALUES (?, ?, ?, 0)")
                .bind(id)
                .bind(id)
                .bind(role)
                .execute(&pool)
                .await
                .unwrap();
        }

        let insert = "INSERT INTO shop_relationships \
            (id, shop_id, sponsor_id, started_at, is_active, kind, created_at) \
            VALUES (?, 'shop-1', ?, ?, 1, 'direct', 0)";
        sqlx::query(insert)
            .bind("r1")
            .bind("kol-a")
            .bind("2024-01-01")
            .execute(&pool)
            .await
            .unwrap();
        let second = sqlx::query(insert)
            .bind("r2")
            .bind("kol-b")
            .bind("2024-07-01")
            .execute(&pool)
            .await;
        assert!(second.is_err());
    }
}
