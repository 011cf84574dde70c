//! Monthly rollup operations for the repository.

use super::{decimal, parsed, timestamp, Repository};
use crate::domain::{MonthlyRollup, ParticipantId, YearMonth};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::collections::BTreeMap;

const COLUMNS: &str = "sponsor_id, period, subordinate_sales, subordinate_commission, \
    self_shop_sales, self_shop_commission, device_units_net, device_commission, \
    total_commission, computed_at";

/// A stored rollup and whether its period text was the canonical form.
fn rollup_from_row(row: &SqliteRow, period: &YearMonth) -> Result<(MonthlyRollup, bool), sqlx::Error> {
    let stored: String = row.try_get("period")?;
    let rollup = MonthlyRollup {
        sponsor_id: ParticipantId::new(row.try_get::<String, _>("sponsor_id")?),
        period: parsed::<YearMonth>(row, "period")?,
        subordinate_sales: decimal(row, "subordinate_sales")?,
        subordinate_commission: decimal(row, "subordinate_commission")?,
        self_shop_sales: decimal(row, "self_shop_sales")?,
        self_shop_commission: decimal(row, "self_shop_commission")?,
        device_units_net: row.try_get("device_units_net")?,
        device_commission: decimal(row, "device_commission")?,
        total_commission: decimal(row, "total_commission")?,
        computed_at: timestamp(row, "computed_at")?,
    };
    Ok((rollup, stored == period.canonical()))
}

impl Repository {
    /// Write a rollup at its canonical period key.
    pub async fn upsert_rollup(
        conn: &mut SqliteConnection,
        rollup: &MonthlyRollup,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            r#"
            INSERT INTO monthly_rollups ({COLUMNS})
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(sponsor_id, period) DO UPDATE SET
                subordinate_sales = excluded.subordinate_sales,
                subordinate_commission = excluded.subordinate_commission,
                self_shop_sales = excluded.self_shop_sales,
                self_shop_commission = excluded.self_shop_commission,
                device_units_net = excluded.device_units_net,
                device_commission = excluded.device_commission,
                total_commission = excluded.total_commission,
                computed_at = excluded.computed_at
            "#
        ))
        .bind(rollup.sponsor_id.as_str())
        .bind(rollup.period.canonical())
        .bind(rollup.subordinate_sales.to_canonical_string())
        .bind(rollup.subordinate_commission.to_canonical_string())
        .bind(rollup.self_shop_sales.to_canonical_string())
        .bind(rollup.self_shop_commission.to_canonical_string())
        .bind(rollup.device_units_net)
        .bind(rollup.device_commission.to_canonical_string())
        .bind(rollup.total_commission.to_canonical_string())
        .bind(rollup.computed_at.timestamp_millis())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Rollups for a month, one per sponsor. Where both the canonical and compact
    /// period keys exist for a sponsor, the canonical row wins and the other is ignored.
    pub async fn rollups_for_period(
        conn: &mut SqliteConnection,
        period: YearMonth,
    ) -> Result<Vec<MonthlyRollup>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM monthly_rollups WHERE period IN (?, ?) ORDER BY sponsor_id ASC"
        ))
        .bind(period.canonical())
        .bind(period.compact())
        .fetch_all(&mut *conn)
        .await?;

        let mut by_sponsor: BTreeMap<ParticipantId, (MonthlyRollup, bool)> = BTreeMap::new();
        for row in &rows {
            let (rollup, canonical) = rollup_from_row(row, &period)?;
            match by_sponsor.get(&rollup.sponsor_id) {
                Some((_, true)) => {}
                _ => {
                    by_sponsor.insert(rollup.sponsor_id.clone(), (rollup, canonical));
                }
            }
        }

        Ok(by_sponsor.into_values().map(|(rollup, _)| rollup).collect())
    }

    pub async fn get_rollup(
        conn: &mut SqliteConnection,
        sponsor_id: &ParticipantId,
        period: YearMonth,
    ) -> Result<Option<MonthlyRollup>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM monthly_rollups
            WHERE sponsor_id = ? AND period IN (?, ?)
            "#
        ))
        .bind(sponsor_id.as_str())
        .bind(period.canonical())
        .bind(period.compact())
        .fetch_all(&mut *conn)
        .await?;

        let mut fallback = None;
        for row in &rows {
            let (rollup, canonical) = rollup_from_row(row, &period)?;
            if canonical {
                return Ok(Some(rollup));
            }
            fallback = Some(rollup);
        }
        Ok(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use super::*;
    use crate::domain::Decimal;

    async fn insert_raw(conn: &mut SqliteConnection, sponsor: &str, period: &str, total: &str) {
        sqlx::query(&format!(
            "INSERT INTO monthly_rollups ({COLUMNS}) VALUES (?, ?, '0', '0', '0', '0', 0, '0', ?, 0)"
        ))
        .bind(sponsor)
        .bind(period)
        .bind(total)
        .execute(&mut *conn)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_lookup_prefers_canonical_and_never_sums() {
        let (repo, _temp) = setup_test_db().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        let may = YearMonth::new(2025, 5).unwrap();

        insert_raw(&mut conn, "kol-a", "202505", "111").await;
        let compact_only = Repository::get_rollup(&mut conn, &ParticipantId::new("kol-a"), may)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(compact_only.total_commission, Decimal::from_i64(111));
        assert_eq!(compact_only.period.canonical(), "2025-05");

        insert_raw(&mut conn, "kol-a", "2025-05", "222").await;
        let both = Repository::get_rollup(&mut conn, &ParticipantId::new("kol-a"), may)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(both.total_commission, Decimal::from_i64(222));

        insert_raw(&mut conn, "kol-b", "202505", "5").await;
        let listed = Repository::rollups_for_period(&mut conn, may).await.unwrap();
        assert_eq!(listed.len(), 2);
        let totals: Vec<Decimal> = listed.iter().map(|r| r.total_commission).collect();
        assert_eq!(totals, vec![Decimal::from_i64(222), Decimal::from_i64(5)]);
    }
}
