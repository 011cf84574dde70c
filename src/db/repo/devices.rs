//! Device sale and accumulator operations for the repository.

use super::{day, decimal, decode_error, parsed, timestamp, timestamp_opt, Repository};
use crate::domain::{
    Day, DeviceAccumulatorSnapshot, DeviceSale, ListFilter, ParticipantId, RecordId, Tier,
};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

const SALE_COLUMNS: &str = "id, shop_id, sponsor_id, sale_date, quantity, device_name, \
    serial_numbers, tier_at_sale, standard_commission, actual_commission, notes, \
    created_at, updated_at";

fn sale_from_row(row: &SqliteRow) -> Result<DeviceSale, sqlx::Error> {
    let serials: String = row.try_get("serial_numbers")?;
    let serial_numbers: Vec<String> =
        serde_json::from_str(&serials).map_err(|e| decode_error("serial_numbers", e))?;

    Ok(DeviceSale {
        id: RecordId::new(row.try_get::<String, _>("id")?),
        shop_id: ParticipantId::new(row.try_get::<String, _>("shop_id")?),
        sponsor_id: ParticipantId::new(row.try_get::<String, _>("sponsor_id")?),
        sale_date: day(row, "sale_date")?,
        quantity: row.try_get("quantity")?,
        device_name: row.try_get("device_name")?,
        serial_numbers,
        tier_at_sale: parsed::<Tier>(row, "tier_at_sale")?,
        standard_commission: decimal(row, "standard_commission")?,
        actual_commission: decimal(row, "actual_commission")?,
        notes: row.try_get("notes")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn accumulator_from_row(row: &SqliteRow) -> Result<DeviceAccumulatorSnapshot, sqlx::Error> {
    Ok(DeviceAccumulatorSnapshot {
        sponsor_id: ParticipantId::new(row.try_get::<String, _>("sponsor_id")?),
        total_devices_sold: row.try_get("total_devices_sold")?,
        total_devices_returned: row.try_get("total_devices_returned")?,
        current_tier: parsed::<Tier>(row, "current_tier")?,
        tier_changed_at: timestamp_opt(row, "tier_changed_at")?,
        version: row.try_get("version")?,
    })
}

fn serials_json(sale: &DeviceSale) -> String {
    serde_json::to_string(&sale.serial_numbers).unwrap_or_else(|_| "[]".to_string())
}

impl Repository {
    pub async fn get_device_sale(
        conn: &mut SqliteConnection,
        id: &RecordId,
    ) -> Result<Option<DeviceSale>, sqlx::Error> {
        let row = sqlx::query(&format!("SELECT {SALE_COLUMNS} FROM device_sales WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await?;

        row.as_ref().map(sale_from_row).transpose()
    }

    pub async fn insert_device_sale(
        conn: &mut SqliteConnection,
        sale: &DeviceSale,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(&format!(
            "INSERT INTO device_sales ({SALE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(sale.id.as_str())
        .bind(sale.shop_id.as_str())
        .bind(sale.sponsor_id.as_str())
        .bind(sale.sale_date.as_string())
        .bind(sale.quantity)
        .bind(&sale.device_name)
        .bind(serials_json(sale))
        .bind(sale.tier_at_sale.as_str())
        .bind(sale.standard_commission.to_canonical_string())
        .bind(sale.actual_commission.to_canonical_string())
        .bind(sale.notes.as_deref())
        .bind(sale.created_at.timestamp_millis())
        .bind(sale.updated_at.timestamp_millis())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn update_device_sale(
        conn: &mut SqliteConnection,
        sale: &DeviceSale,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE device_sales SET
                quantity = ?, device_name = ?, serial_numbers = ?, tier_at_sale = ?,
                standard_commission = ?, actual_commission = ?, notes = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(sale.quantity)
        .bind(&sale.device_name)
        .bind(serials_json(sale))
        .bind(sale.tier_at_sale.as_str())
        .bind(sale.standard_commission.to_canonical_string())
        .bind(sale.actual_commission.to_canonical_string())
        .bind(sale.notes.as_deref())
        .bind(sale.updated_at.timestamp_millis())
        .bind(sale.id.as_str())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_device_sale(
        conn: &mut SqliteConnection,
        id: &RecordId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM device_sales WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Every recorded quantity for a sponsor in recording order.
    pub async fn sponsor_device_quantities(
        conn: &mut SqliteConnection,
        sponsor_id: &ParticipantId,
    ) -> Result<Vec<i64>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT quantity FROM device_sales
            WHERE sponsor_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(sponsor_id.as_str())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(|row| row.try_get("quantity")).collect()
    }

    /// Device sales for a sponsor with `sale_date` in `[from, to]`.
    pub async fn sponsor_device_sales_between(
        conn: &mut SqliteConnection,
        sponsor_id: &ParticipantId,
        from: Day,
        to: Day,
    ) -> Result<Vec<DeviceSale>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SALE_COLUMNS} FROM device_sales
            WHERE sponsor_id = ? AND sale_date >= ? AND sale_date <= ?
            ORDER BY sale_date ASC, created_at ASC, id ASC
            "#
        ))
        .bind(sponsor_id.as_str())
        .bind(from.as_string())
        .bind(to.as_string())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(sale_from_row).collect()
    }

    /// Newest-first device sales matching `filter`, at most `filter.effective_limit()` rows.
    pub async fn list_device_sales(
        conn: &mut SqliteConnection,
        filter: &ListFilter,
    ) -> Result<Vec<DeviceSale>, sqlx::Error> {
        let sponsor = filter.sponsor_id.as_ref().map(|p| p.as_str());
        let shop = filter.shop_id.as_ref().map(|p| p.as_str());
        let from = filter.from.map(|d| d.as_string());
        let to = filter.to.map(|d| d.as_string());

        let rows = sqlx::query(&format!(
            r#"
            SELECT {SALE_COLUMNS} FROM device_sales
            WHERE (? IS NULL OR sponsor_id = ?)
              AND (? IS NULL OR shop_id = ?)
              AND (? IS NULL OR sale_date >= ?)
              AND (? IS NULL OR sale_date <= ?)
            ORDER BY sale_date DESC, created_at DESC, id DESC
            LIMIT ?
            "#
        ))
        .bind(sponsor)
        .bind(sponsor)
        .bind(shop)
        .bind(shop)
        .bind(from.as_deref())
        .bind(from.as_deref())
        .bind(to.as_deref())
        .bind(to.as_deref())
        .bind(i64::from(filter.effective_limit()))
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(sale_from_row).collect()
    }

    /// Every device sale with `sale_date` inside the optional inclusive bounds.
    pub async fn device_sales_in_range(
        conn: &mut SqliteConnection,
        from: Option<Day>,
        to: Option<Day>,
    ) -> Result<Vec<DeviceSale>, sqlx::Error> {
        let from = from.map(|d| d.as_string());
        let to = to.map(|d| d.as_string());

        let rows = sqlx::query(&format!(
            r#"
            SELECT {SALE_COLUMNS} FROM device_sales
            WHERE (? IS NULL OR sale_date >= ?)
              AND (? IS NULL OR sale_date <= ?)
            ORDER BY sale_date ASC, id ASC
            "#
        ))
        .bind(from.as_deref())
        .bind(from.as_deref())
        .bind(to.as_deref())
        .bind(to.as_deref())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(sale_from_row).collect()
    }

    /// Accumulators with the highest net device count.
    pub async fn top_accumulators(
        conn: &mut SqliteConnection,
        limit: u32,
    ) -> Result<Vec<DeviceAccumulatorSnapshot>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT sponsor_id, total_devices_sold, total_devices_returned, current_tier,
                   tier_changed_at, version
            FROM device_accumulators
            ORDER BY (total_devices_sold - total_devices_returned) DESC, sponsor_id ASC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(accumulator_from_row).collect()
    }

    pub async fn get_accumulator(
        conn: &mut SqliteConnection,
        sponsor_id: &ParticipantId,
    ) -> Result<Option<DeviceAccumulatorSnapshot>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT sponsor_id, total_devices_sold, total_devices_returned, current_tier,
                   tier_changed_at, version
            FROM device_accumulators WHERE sponsor_id = ?
            "#,
        )
        .bind(sponsor_id.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        row.as_ref().map(accumulator_from_row).transpose()
    }

    /// Create the accumulator row. Fails on a primary-key conflict if another writer got there first.
    pub async fn insert_accumulator(
        conn: &mut SqliteConnection,
        snapshot: &DeviceAccumulatorSnapshot,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO device_accumulators
            (sponsor_id, total_devices_sold, total_devices_returned, current_tier,
             tier_changed_at, version, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(snapshot.sponsor_id.as_str())
        .bind(snapshot.total_devices_sold)
        .bind(snapshot.total_devices_returned)
        .bind(snapshot.current_tier.as_str())
        .bind(snapshot.tier_changed_at.map(|t| t.timestamp_millis()))
        .bind(snapshot.version)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Write the accumulator only if its stored version is still `expected_version`.
    ///
    /// The stored version becomes `snapshot.version`. Returns false when another writer moved it.
    pub async fn update_accumulator_versioned(
        conn: &mut SqliteConnection,
        snapshot: &DeviceAccumulatorSnapshot,
        expected_version: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE device_accumulators SET
                total_devices_sold = ?, total_devices_returned = ?, current_tier = ?,
                tier_changed_at = ?, version = ?, updated_at = ?
            WHERE sponsor_id = ? AND version = ?
            "#,
        )
        .bind(snapshot.total_devices_sold)
        .bind(snapshot.total_devices_returned)
        .bind(snapshot.current_tier.as_str())
        .bind(snapshot.tier_changed_at.map(|t| t.timestamp_millis()))
        .bind(snapshot.version)
        .bind(chrono::Utc::now().timestamp_millis())
        .bind(snapshot.sponsor_id.as_str())
        .bind(expected_version)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
