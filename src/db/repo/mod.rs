//! Repository layer for database operations.
//!
//! Methods are organized across submodules by domain:
//! - `participants.rs` - Sponsors and shops
//! - `relationships.rs` - Shop to sponsor validity intervals
//! - `orders.rs` - Orders and their line items
//! - `devices.rs` - Device sales and per-sponsor accumulators
//! - `metrics.rs` - Ratio cohorts and their version rows
//! - `rollups.rs` - Monthly reporting rows
//!
//! Write paths are associated functions over `&mut SqliteConnection` so the orchestration
//! layer can compose several of them inside one transaction.

mod devices;
mod metrics;
mod orders;
mod participants;
mod relationships;
mod rollups;

pub use orders::OrderFigures;
pub use metrics::CohortVersion;

use crate::domain::{Day, Decimal};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqlitePool, SqliteRow};
use sqlx::{Row, Transaction};
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Stored value that no longer parses into its domain type.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoredValueError(String);

fn decode_error(column: &str, detail: impl Display) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(StoredValueError(detail.to_string())),
    }
}

pub(crate) fn parsed<T>(row: &SqliteRow, column: &str) -> Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| decode_error(column, format!("{raw:?}: {e}")))
}

pub(crate) fn parsed_opt<T>(row: &SqliteRow, column: &str) -> Result<Option<T>, sqlx::Error>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|raw| {
        raw.parse::<T>()
            .map_err(|e| decode_error(column, format!("{raw:?}: {e}")))
    })
    .transpose()
}

pub(crate) fn decimal(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    parsed::<Decimal>(row, column)
}

pub(crate) fn day(row: &SqliteRow, column: &str) -> Result<Day, sqlx::Error> {
    parsed::<Day>(row, column)
}

pub(crate) fn timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    let ms: i64 = row.try_get(column)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| decode_error(column, ms))
}

pub(crate) fn timestamp_opt(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let ms: Option<i64> = row.try_get(column)?;
    ms.map(|ms| DateTime::from_timestamp_millis(ms).ok_or_else(|| decode_error(column, ms)))
        .transpose()
}

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Start a transaction. Dropping it without commit rolls back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Cheap round trip used by readiness checks.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
