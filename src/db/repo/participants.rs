//! Participant registry operations for the repository.

use super::{parsed, parsed_opt, Repository};
use crate::domain::{Decimal, Participant, ParticipantId, Role};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

fn participant_from_row(row: &SqliteRow) -> Result<Participant, sqlx::Error> {
    Ok(Participant {
        id: ParticipantId::new(row.try_get::<String, _>("id")?),
        name: row.try_get("name")?,
        role: parsed::<Role>(row, "role")?,
        commission_rate: parsed_opt::<Decimal>(row, "commission_rate")?,
        self_shop_rate: parsed_opt::<Decimal>(row, "self_shop_rate")?,
    })
}

impl Repository {
    /// Insert or replace a participant's profile.
    pub async fn insert_participant(
        conn: &mut SqliteConnection,
        participant: &Participant,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO participants (id, name, role, commission_rate, self_shop_rate, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                role = excluded.role,
                commission_rate = excluded.commission_rate,
                self_shop_rate = excluded.self_shop_rate
            "#,
        )
        .bind(participant.id.as_str())
        .bind(&participant.name)
        .bind(participant.role.as_str())
        .bind(participant.commission_rate.map(|d| d.to_canonical_string()))
        .bind(participant.self_shop_rate.map(|d| d.to_canonical_string()))
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn get_participant(
        conn: &mut SqliteConnection,
        id: &ParticipantId,
    ) -> Result<Option<Participant>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, name, role, commission_rate, self_shop_rate FROM participants WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(participant_from_row).transpose()
    }

    /// Rows anywhere in the ledger that point at `id`.
    pub async fn participant_references(
        conn: &mut SqliteConnection,
        id: &ParticipantId,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            WITH target(id) AS (SELECT ?)
            SELECT
                (SELECT COUNT(*) FROM shop_relationships r, target t
                    WHERE r.shop_id = t.id OR r.sponsor_id = t.id)
              + (SELECT COUNT(*) FROM orders o, target t
                    WHERE o.shop_id = t.id OR o.sponsor_id = t.id)
              + (SELECT COUNT(*) FROM device_sales d, target t
                    WHERE d.shop_id = t.id OR d.sponsor_id = t.id)
              + (SELECT COUNT(*) FROM device_accumulators a, target t
                    WHERE a.sponsor_id = t.id)
              + (SELECT COUNT(*) FROM product_sales_metrics m, target t
                    WHERE m.entity_id = t.id)
              AS refs
            "#,
        )
        .bind(id.as_str())
        .fetch_one(&mut *conn)
        .await?;

        row.try_get("refs")
    }

    /// Every participant able to sponsor shops, ordered by id.
    pub async fn list_sponsors(
        conn: &mut SqliteConnection,
    ) -> Result<Vec<Participant>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, role, commission_rate, self_shop_rate
            FROM participants
            WHERE role IN ('kol', 'ol')
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(participant_from_row).collect()
    }
}
