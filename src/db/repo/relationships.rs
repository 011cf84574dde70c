//! Shop relationship interval operations for the repository.

use super::{day, parsed, parsed_opt, Repository};
use crate::domain::{Day, ParticipantId, RecordId, RelationshipKind, ShopRelationship};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

const COLUMNS: &str = "id, shop_id, sponsor_id, started_at, ended_at, is_active, kind, reason";

fn relationship_from_row(row: &SqliteRow) -> Result<ShopRelationship, sqlx::Error> {
    Ok(ShopRelationship {
        id: RecordId::new(row.try_get::<String, _>("id")?),
        shop_id: ParticipantId::new(row.try_get::<String, _>("shop_id")?),
        sponsor_id: ParticipantId::new(row.try_get::<String, _>("sponsor_id")?),
        started_at: day(row, "started_at")?,
        ended_at: parsed_opt::<Day>(row, "ended_at")?,
        is_active: row.try_get::<i64, _>("is_active")? != 0,
        kind: parsed::<RelationshipKind>(row, "kind")?,
        reason: row.try_get("reason")?,
    })
}

impl Repository {
    /// All intervals recorded for a shop, oldest first.
    pub async fn shop_relationships(
        conn: &mut SqliteConnection,
        shop_id: &ParticipantId,
    ) -> Result<Vec<ShopRelationship>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM shop_relationships WHERE shop_id = ? ORDER BY started_at ASC, id ASC"
        ))
        .bind(shop_id.as_str())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(relationship_from_row).collect()
    }

    pub async fn insert_relationship(
        conn: &mut SqliteConnection,
        relationship: &ShopRelationship,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO shop_relationships
            (id, shop_id, sponsor_id, started_at, ended_at, is_active, kind, reason, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(relationship.id.as_str())
        .bind(relationship.shop_id.as_str())
        .bind(relationship.sponsor_id.as_str())
        .bind(relationship.started_at.as_string())
        .bind(relationship.ended_at.map(|d| d.as_string()))
        .bind(i64::from(relationship.is_active))
        .bind(relationship.kind.as_str())
        .bind(relationship.reason.as_deref())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Close an open interval on `ended_at` and clear its active flag.
    ///
    /// Returns false when the row was already closed.
    pub async fn close_relationship(
        conn: &mut SqliteConnection,
        id: &RecordId,
        ended_at: Day,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE shop_relationships
            SET ended_at = ?, is_active = 0
            WHERE id = ? AND is_active = 1
            "#,
        )
        .bind(ended_at.as_string())
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Intervals under `sponsor_id` that contain `as_of`.
    pub async fn sponsor_relationships_at(
        conn: &mut SqliteConnection,
        sponsor_id: &ParticipantId,
        as_of: Day,
    ) -> Result<Vec<ShopRelationship>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS}
            FROM shop_relationships
            WHERE sponsor_id = ?
              AND started_at <= ?
              AND (ended_at IS NULL OR ended_at >= ?)
            ORDER BY shop_id ASC
            "#
        ))
        .bind(sponsor_id.as_str())
        .bind(as_of.as_string())
        .bind(as_of.as_string())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(relationship_from_row).collect()
    }
}
