//! Order and line item operations for the repository.

use super::{day, decimal, parsed, timestamp, Repository};
use crate::domain::{
    CommissionStatus, Day, Decimal, LineItem, ListFilter, Order, ParticipantId, RecordId,
};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;

/// Commission-relevant figures of one non-cancelled order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderFigures {
    pub shop_id: ParticipantId,
    pub total_amount: Decimal,
    pub commission_amount: Decimal,
    pub is_self_shop_order: bool,
}

fn order_from_row(row: &SqliteRow) -> Result<Order, sqlx::Error> {
    let sponsor_id: Option<String> = row.try_get("sponsor_id")?;
    Ok(Order {
        id: RecordId::new(row.try_get::<String, _>("id")?),
        shop_id: ParticipantId::new(row.try_get::<String, _>("shop_id")?),
        order_date: day(row, "order_date")?,
        total_amount: decimal(row, "total_amount")?,
        is_self_shop_order: row.try_get::<i64, _>("is_self_shop_order")? != 0,
        sponsor_id: sponsor_id.map(ParticipantId::new),
        commission_rate: decimal(row, "commission_rate")?,
        commission_amount: decimal(row, "commission_amount")?,
        commission_status: parsed::<CommissionStatus>(row, "commission_status")?,
        line_items: Vec::new(),
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<LineItem, sqlx::Error> {
    Ok(LineItem {
        product_id: row.try_get("product_id")?,
        product_name: row.try_get("product_name")?,
        quantity: row.try_get("quantity")?,
        unit_price: decimal(row, "unit_price")?,
    })
}

impl Repository {
    pub async fn get_order(
        conn: &mut SqliteConnection,
        id: &RecordId,
    ) -> Result<Option<Order>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, shop_id, order_date, total_amount, is_self_shop_order, sponsor_id,
                   commission_rate, commission_amount, commission_status, created_at, updated_at
            FROM orders WHERE id = ?
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut order = order_from_row(&row)?;
        order.line_items = Self::line_items(conn, id).await?;

        Ok(Some(order))
    }

    async fn line_items(
        conn: &mut SqliteConnection,
        order_id: &RecordId,
    ) -> Result<Vec<LineItem>, sqlx::Error> {
        let items = sqlx::query(
            r#"
            SELECT product_id, product_name, quantity, unit_price
            FROM order_items WHERE order_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(order_id.as_str())
        .fetch_all(&mut *conn)
        .await?;

        items.iter().map(item_from_row).collect()
    }

    /// Newest-first orders matching `filter`, line items included.
    pub async fn list_orders(
        conn: &mut SqliteConnection,
        filter: &ListFilter,
    ) -> Result<Vec<Order>, sqlx::Error> {
        let sponsor = filter.sponsor_id.as_ref().map(|p| p.as_str());
        let shop = filter.shop_id.as_ref().map(|p| p.as_str());
        let from = filter.from.map(|d| d.as_string());
        let to = filter.to.map(|d| d.as_string());

        let rows = sqlx::query(
            r#"
            SELECT id, shop_id, order_date, total_amount, is_self_shop_order, sponsor_id,
                   commission_rate, commission_amount, commission_status, created_at, updated_at
            FROM orders
            WHERE (? IS NULL OR sponsor_id = ?)
              AND (? IS NULL OR shop_id = ?)
              AND (? IS NULL OR order_date >= ?)
              AND (? IS NULL OR order_date <= ?)
            ORDER BY order_date DESC, created_at DESC, id DESC
            LIMIT ?
            "#,
        )
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

        let mut orders = rows.iter().map(order_from_row).collect::<Result<Vec<_>, _>>()?;
        for order in &mut orders {
            order.line_items = Self::line_items(conn, &order.id).await?;
        }
        Ok(orders)
    }

    /// Insert an order together with its line items.
    pub async fn insert_order(conn: &mut SqliteConnection, order: &Order) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, shop_id, order_date, total_amount, is_self_shop_order, sponsor_id,
                commission_rate, commission_amount, commission_status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(order.id.as_str())
        .bind(order.shop_id.as_str())
        .bind(order.order_date.as_string())
        .bind(order.total_amount.to_canonical_string())
        .bind(i64::from(order.is_self_shop_order))
        .bind(order.sponsor_id.as_ref().map(|s| s.as_str()))
        .bind(order.commission_rate.to_canonical_string())
        .bind(order.commission_amount.to_canonical_string())
        .bind(order.commission_status.as_str())
        .bind(order.created_at.timestamp_millis())
        .bind(order.updated_at.timestamp_millis())
        .execute(&mut *conn)
        .await?;

        Self::replace_line_items(conn, &order.id, &order.line_items).await
    }

    /// Overwrite every mutable column of an existing order and its line items.
    pub async fn update_order(conn: &mut SqliteConnection, order: &Order) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET
                shop_id = ?, order_date = ?, total_amount = ?, is_self_shop_order = ?,
                sponsor_id = ?, commission_rate = ?, commission_amount = ?,
                commission_status = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(order.shop_id.as_str())
        .bind(order.order_date.as_string())
        .bind(order.total_amount.to_canonical_string())
        .bind(i64::from(order.is_self_shop_order))
        .bind(order.sponsor_id.as_ref().map(|s| s.as_str()))
        .bind(order.commission_rate.to_canonical_string())
        .bind(order.commission_amount.to_canonical_string())
        .bind(order.commission_status.as_str())
        .bind(order.updated_at.timestamp_millis())
        .bind(order.id.as_str())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }
        Self::replace_line_items(conn, &order.id, &order.line_items).await?;
        Ok(true)
    }

    async fn replace_line_items(
        conn: &mut SqliteConnection,
        order_id: &RecordId,
        items: &[LineItem],
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM order_items WHERE order_id = ?")
            .bind(order_id.as_str())
            .execute(&mut *conn)
            .await?;

        for (position, item) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, position, product_id, product_name, quantity, unit_price)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(order_id.as_str())
            .bind(position as i64)
            .bind(item.product_id.as_deref())
            .bind(&item.product_name)
            .bind(item.quantity)
            .bind(item.unit_price.to_canonical_string())
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    pub async fn set_order_status(
        conn: &mut SqliteConnection,
        id: &RecordId,
        status: CommissionStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE orders SET commission_status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(updated_at.timestamp_millis())
        .bind(id.as_str())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete an order. Line items go with it through the cascade.
    pub async fn delete_order(conn: &mut SqliteConnection, id: &RecordId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM orders WHERE id = ?")
            .bind(id.as_str())
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Non-cancelled orders attributed to `sponsor_id` with `order_date` in `[from, to]`.
    pub async fn sponsor_order_figures(
        conn: &mut SqliteConnection,
        sponsor_id: &ParticipantId,
        from: Day,
        to: Day,
    ) -> Result<Vec<OrderFigures>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT shop_id, total_amount, commission_amount, is_self_shop_order
            FROM orders
            WHERE sponsor_id = ?
              AND order_date >= ? AND order_date <= ?
              AND commission_status <> 'cancelled'
            ORDER BY order_date ASC, id ASC
            "#,
        )
        .bind(sponsor_id.as_str())
        .bind(from.as_string())
        .bind(to.as_string())
        .fetch_all(&mut *conn)
        .await?;

        rows.iter()
            .map(|row| -> Result<OrderFigures, sqlx::Error> {
                Ok(OrderFigures {
                    shop_id: ParticipantId::new(row.try_get::<String, _>("shop_id")?),
                    total_amount: decimal(row, "total_amount")?,
                    commission_amount: decimal(row, "commission_amount")?,
                    is_self_shop_order: row.try_get::<i64, _>("is_self_shop_order")? != 0,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{seed, setup_test_db};
    use super::*;
    use crate::domain::Role;

    fn order(id: &str, date: &str, total: i64, status: CommissionStatus) -> Order {
        let now = Utc::now();
        Order {
            id: RecordId::new(id),
            shop_id: ParticipantId::new("shop-1"),
            order_date: date.parse().unwrap(),
            total_amount: Decimal::from_i64(total),
            is_self_shop_order: false,
            sponsor_id: Some(ParticipantId::new("kol-a")),
            commission_rate: Decimal::from_i64(30),
            commission_amount: Decimal::from_i64(total * 3 / 10),
            commission_status: status,
            line_items: vec![LineItem {
                product_id: Some("p-1".to_string()),
                product_name: "serum".to_string(),
                quantity: 1,
                unit_price: Decimal::from_i64(total),
            }],
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_order_roundtrip_with_items() {
        let (repo, _temp) = setup_test_db().await;
        seed(&repo, "shop-1", Role::Shop).await;
        seed(&repo, "kol-a", Role::Kol).await;
        let mut conn = repo.pool().acquire().await.unwrap();

        let stored = order("o-1", "2024-03-15", 1_000_000, CommissionStatus::Calculated);
        Repository::insert_order(&mut conn, &stored).await.unwrap();

        let loaded = Repository::get_order(&mut conn, &stored.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.line_items, stored.line_items);
        assert_eq!(loaded.commission_amount, Decimal::from_i64(300_000));
        assert_eq!(loaded.sponsor_id, stored.sponsor_id);

        assert!(Repository::delete_order(&mut conn, &stored.id).await.unwrap());
        let items: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM order_items")
            .fetch_one(&mut *conn)
            .await
            .unwrap();
        assert_eq!(items.0, 0);
    }

    #[tokio::test]
    async fn test_figures_skip_cancelled_and_out_of_range() {
        let (repo, _temp) = setup_test_db().await;
        seed(&repo, "shop-1", Role::Shop).await;
        seed(&repo, "kol-a", Role::Kol).await;
        let mut conn = repo.pool().acquire().await.unwrap();

        for stored in [
            order("o-1", "2024-03-01", 100, CommissionStatus::Calculated),
            order("o-2", "2024-03-31", 200, CommissionStatus::Paid),
            order("o-3", "2024-03-10", 400, CommissionStatus::Cancelled),
            order("o-4", "2024-04-01", 800, CommissionStatus::Calculated),
        ] {
            Repository::insert_order(&mut conn, &stored).await.unwrap();
        }

        let figures = Repository::sponsor_order_figures(
            &mut conn,
            &ParticipantId::new("kol-a"),
            "2024-03-01".parse().unwrap(),
            "2024-03-31".parse().unwrap(),
        )
        .await
        .unwrap();
        let total: Decimal = figures.iter().map(|f| f.total_amount).sum();
        assert_eq!(figures.len(), 2);
        assert_eq!(total, Decimal::from_i64(300));
    }

    #[tokio::test]
    async fn test_list_orders_newest_first_with_items() {
        let (repo, _temp) = setup_test_db().await;
        seed(&repo, "shop-1", Role::Shop).await;
        seed(&repo, "kol-a", Role::Kol).await;
        let mut conn = repo.pool().acquire().await.unwrap();

        for stored in [
            order("o-1", "2024-03-01", 100, CommissionStatus::Calculated),
            order("o-2", "2024-03-20", 200, CommissionStatus::Paid),
            order("o-3", "2024-04-02", 400, CommissionStatus::Calculated),
        ] {
            Repository::insert_order(&mut conn, &stored).await.unwrap();
        }

        let march = ListFilter {
            sponsor_id: Some(ParticipantId::new("kol-a")),
            shop_id: Some(ParticipantId::new("shop-1")),
            from: "2024-03-01".parse().ok(),
            to: "2024-03-31".parse().ok(),
            limit: None,
        };
        let listed = Repository::list_orders(&mut conn, &march).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["o-2", "o-1"]);
        assert_eq!(listed[0].line_items.len(), 1);

        let other_shop = ListFilter {
            shop_id: Some(ParticipantId::new("shop-9")),
            ..ListFilter::default()
        };
        assert!(Repository::list_orders(&mut conn, &other_shop).await.unwrap().is_empty());
    }
}
