//! Ratio cohort operations for the repository.
//!
//! Both ratio tables share a column layout, so every query is parameterized by
//! [`RatioTable::table_name`]. Historical rows may carry the compact `YYYYMM` period.
//! Both spellings belong to the same cohort: reads take the canonical row for an item and
//! the compact one only for items without a canonical row, and a rebalance re-keys the
//! compact rows to the canonical period before it recomputes.

use super::{decimal, parsed, timestamp, Repository};
use crate::domain::{
    CohortKey, Decimal, ParticipantId, RatioRecord, RatioTable, RecordId, YearMonth,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

/// Version row written by each cohort rebalance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CohortVersion {
    pub version: i64,
    pub checksum: String,
    pub rebalanced_at: DateTime<Utc>,
}

fn record_from_row(row: &SqliteRow) -> Result<RatioRecord, sqlx::Error> {
    Ok(RatioRecord {
        id: RecordId::new(row.try_get::<String, _>("id")?),
        entity_id: ParticipantId::new(row.try_get::<String, _>("entity_id")?),
        period: parsed::<YearMonth>(row, "period")?,
        item_id: row.try_get("item_id")?,
        quantity: row.try_get("quantity")?,
        amount: decimal(row, "amount")?,
        ratio: decimal(row, "ratio")?,
    })
}

impl Repository {
    async fn cohort_rows_stored_as(
        conn: &mut SqliteConnection,
        table: RatioTable,
        entity_id: &ParticipantId,
        period_text: &str,
    ) -> Result<Vec<RatioRecord>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT id, entity_id, period, item_id, quantity, amount, ratio
            FROM {}
            WHERE entity_id = ? AND period = ?
            ORDER BY item_id ASC, id ASC
            "#,
            table.table_name()
        ))
        .bind(entity_id.as_str())
        .bind(period_text)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Sibling rows of a cohort across both period spellings. An item present in both
    /// keeps only its canonical row.
    pub async fn cohort_rows(
        conn: &mut SqliteConnection,
        key: &CohortKey,
    ) -> Result<Vec<RatioRecord>, sqlx::Error> {
        let mut rows =
            Self::cohort_rows_stored_as(conn, key.table, &key.entity_id, &key.period.canonical())
                .await?;
        let legacy =
            Self::cohort_rows_stored_as(conn, key.table, &key.entity_id, &key.period.compact())
                .await?;
        for row in legacy {
            if !rows.iter().any(|r| r.item_id == row.item_id) {
                rows.push(row);
            }
        }
        rows.sort_by(|a, b| a.item_id.cmp(&b.item_id).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    /// Move a cohort's compact-period rows onto the canonical period. A compact row whose
    /// item already has a canonical row is dropped. Returns the number of rows touched.
    pub async fn canonicalize_cohort(
        conn: &mut SqliteConnection,
        key: &CohortKey,
    ) -> Result<u64, sqlx::Error> {
        let table = key.table.table_name();
        let canonical = key.period.canonical();
        let compact = key.period.compact();

        let dropped = sqlx::query(&format!(
            r#"
            DELETE FROM {table}
            WHERE entity_id = ? AND period = ?
              AND item_id IN (SELECT item_id FROM {table} WHERE entity_id = ? AND period = ?)
            "#
        ))
        .bind(key.entity_id.as_str())
        .bind(&compact)
        .bind(key.entity_id.as_str())
        .bind(&canonical)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        let moved = sqlx::query(&format!(
            "UPDATE {table} SET period = ? WHERE entity_id = ? AND period = ?"
        ))
        .bind(&canonical)
        .bind(key.entity_id.as_str())
        .bind(&compact)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        Ok(dropped + moved)
    }

    pub async fn get_ratio_row(
        conn: &mut SqliteConnection,
        table: RatioTable,
        id: &RecordId,
    ) -> Result<Option<RatioRecord>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT id, entity_id, period, item_id, quantity, amount, ratio FROM {} WHERE id = ?",
            table.table_name()
        ))
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// Insert a new sibling row at the canonical period.
    pub async fn insert_ratio_row(
        conn: &mut SqliteConnection,
        table: RatioTable,
        record: &RatioRecord,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (id, entity_id, period, item_id, quantity, amount, ratio, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            table.table_name()
        ))
        .bind(record.id.as_str())
        .bind(record.entity_id.as_str())
        .bind(record.period.canonical())
        .bind(&record.item_id)
        .bind(record.quantity)
        .bind(record.amount.to_canonical_string())
        .bind(record.ratio.to_canonical_string())
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn update_ratio_amount(
        conn: &mut SqliteConnection,
        table: RatioTable,
        id: &RecordId,
        quantity: Option<i64>,
        amount: Decimal,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(&format!(
            "UPDATE {} SET quantity = ?, amount = ?, updated_at = ? WHERE id = ?",
            table.table_name()
        ))
        .bind(quantity)
        .bind(amount.to_canonical_string())
        .bind(Utc::now().timestamp_millis())
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_ratio_row(
        conn: &mut SqliteConnection,
        table: RatioTable,
        id: &RecordId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", table.table_name()))
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Set the derived shop-share amount for `(sponsor, period, shop)`.
    ///
    /// A zero amount removes the row, in either period spelling, so the shop drops out of
    /// the cohort.
    pub async fn set_shop_share(
        conn: &mut SqliteConnection,
        sponsor_id: &ParticipantId,
        period: YearMonth,
        shop_id: &ParticipantId,
        amount: Decimal,
    ) -> Result<(), sqlx::Error> {
        if amount.is_zero() {
            sqlx::query(
                "DELETE FROM shop_sales_metrics WHERE entity_id = ? AND period IN (?, ?) AND item_id = ?",
            )
            .bind(sponsor_id.as_str())
            .bind(period.canonical())
            .bind(period.compact())
            .bind(shop_id.as_str())
            .execute(&mut *conn)
            .await?;
            return Ok(());
        }

        sqlx::query(
            r#"
            INSERT INTO shop_sales_metrics (id, entity_id, period, item_id, quantity, amount, ratio, updated_at)
            VALUES (?, ?, ?, ?, NULL, ?, '0', ?)
            ON CONFLICT(entity_id, period, item_id) DO UPDATE SET
                amount = excluded.amount,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(RecordId::generate().as_str())
        .bind(sponsor_id.as_str())
        .bind(period.canonical())
        .bind(shop_id.as_str())
        .bind(amount.to_canonical_string())
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Persist recomputed ratios for every row of a cohort.
    pub async fn write_ratios(
        conn: &mut SqliteConnection,
        table: RatioTable,
        records: &[RatioRecord],
    ) -> Result<(), sqlx::Error> {
        let sql = format!("UPDATE {} SET ratio = ? WHERE id = ?", table.table_name());
        for record in records {
            sqlx::query(&sql)
                .bind(record.ratio.to_canonical_string())
                .bind(record.id.as_str())
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    pub async fn get_cohort_version(
        conn: &mut SqliteConnection,
        key: &CohortKey,
    ) -> Result<Option<CohortVersion>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT version, checksum, rebalanced_at FROM cohort_versions
            WHERE table_name = ? AND entity_id = ? AND period = ?
            "#,
        )
        .bind(key.table.table_name())
        .bind(key.entity_id.as_str())
        .bind(key.period.canonical())
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|row| -> Result<CohortVersion, sqlx::Error> {
            Ok(CohortVersion {
                version: row.try_get("version")?,
                checksum: row.try_get("checksum")?,
                rebalanced_at: timestamp(&row, "rebalanced_at")?,
            })
        })
        .transpose()
    }

    /// Record a completed rebalance and return the new version number.
    pub async fn bump_cohort_version(
        conn: &mut SqliteConnection,
        key: &CohortKey,
        checksum: &str,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            INSERT INTO cohort_versions (table_name, entity_id, period, version, checksum, rebalanced_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(table_name, entity_id, period) DO UPDATE SET
                version = cohort_versions.version + 1,
                checksum = excluded.checksum,
                rebalanced_at = excluded.rebalanced_at
            RETURNING version
            "#,
        )
        .bind(key.table.table_name())
        .bind(key.entity_id.as_str())
        .bind(key.period.canonical())
        .bind(checksum)
        .bind(Utc::now().timestamp_millis())
        .fetch_one(&mut *conn)
        .await?;

        row.try_get("version")
    }
}
