//! Order lifecycle: sponsor resolution, commission pricing and shop-share upkeep.

use super::Ledger;
use crate::db::Repository;
use crate::domain::{
    CohortKey, CommissionStatus, Day, Decimal, ListFilter, Order, OrderRequest, ParticipantId,
    RatioTable, RecordId, YearMonth, MAX_QUANTITY,
};
use crate::engine::CommissionQuote;
use crate::error::EngineError;
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, info, warn};

/// Most orders one bulk status change may name.
pub const MAX_BULK_ORDERS: usize = 500;

/// Per-order results of a bulk status change. One failure never blocks the others.
#[derive(Debug, Serialize)]
pub struct BulkStatusOutcome {
    pub status: CommissionStatus,
    pub updated: Vec<Order>,
    pub failed: Vec<BulkStatusFailure>,
}

#[derive(Debug, Serialize)]
pub struct BulkStatusFailure {
    pub order_id: RecordId,
    pub kind: &'static str,
    pub error: String,
}

fn validate_request(
    request: &OrderRequest,
    entity: &str,
    operation: &'static str,
) -> Result<Decimal, EngineError> {
    for item in &request.line_items {
        if item.quantity <= 0 {
            return Err(EngineError::validation(
                entity,
                operation,
                format!("line item {:?} has non-positive quantity", item.product_name),
            ));
        }
        if item.quantity > MAX_QUANTITY {
            return Err(EngineError::validation(
                entity,
                operation,
                format!("line item {:?} quantity exceeds {}", item.product_name, MAX_QUANTITY),
            ));
        }
        if item.unit_price.is_negative() {
            return Err(EngineError::validation(
                entity,
                operation,
                format!("line item {:?} has a negative unit price", item.product_name),
            ));
        }
        if item.unit_price > Decimal::max_amount() {
            return Err(EngineError::validation(
                entity,
                operation,
                format!("line item {:?} unit price exceeds {}", item.product_name, Decimal::max_amount()),
            ));
        }
    }
    if request.line_items.is_empty() && request.total_amount.is_none() {
        return Err(EngineError::validation(
            entity,
            operation,
            "either total_amount or line_items is required",
        ));
    }

    let total = request.resolved_total().ok_or_else(|| {
        EngineError::validation(entity, operation, "order total overflows")
    })?;
    if total > Decimal::max_amount() {
        return Err(EngineError::validation(
            entity,
            operation,
            format!("total amount exceeds {}", Decimal::max_amount()),
        ));
    }
    if !total.is_positive() {
        return Err(EngineError::validation(
            entity,
            operation,
            format!("total amount must be positive, got {}", total),
        ));
    }
    Ok(total)
}

fn priced(
    quote: Option<CommissionQuote>,
    entity: &str,
    operation: &'static str,
) -> Result<CommissionQuote, EngineError> {
    quote.ok_or_else(|| EngineError::validation(entity, operation, "commission amount overflows"))
}

impl Ledger {
    /// Resolve the sponsor and price `total` inside the caller's transaction.
    async fn quote_in(
        &self,
        conn: &mut SqliteConnection,
        request: &OrderRequest,
        total: Decimal,
        operation: &'static str,
    ) -> Result<CommissionQuote, EngineError> {
        let shop = Self::require_participant(conn, &request.shop_id, operation).await?;

        if request.is_self_shop_order {
            if !shop.role.is_sponsor() {
                return Err(EngineError::invalid_reference(
                    &shop.id,
                    operation,
                    "self-shop orders must be placed by a kol or ol",
                ));
            }
            return priced(self.calculator.quote_self_shop(&shop, total), shop.id.as_str(), operation);
        }

        let Some(relationship) =
            Self::resolve_in(conn, &request.shop_id, request.order_date, operation).await?
        else {
            debug!(shop_id = %request.shop_id, order_date = %request.order_date, "No sponsor on order date");
            return priced(self.calculator.quote_sponsored(None, total), shop.id.as_str(), operation);
        };

        let sponsor = Self::require_participant(conn, &relationship.sponsor_id, operation).await?;
        if !sponsor.role.is_sponsor() {
            return Err(EngineError::invalid_reference(
                &sponsor.id,
                operation,
                format!(
                    "sponsor of {} on {} is a {}, not a kol or ol",
                    request.shop_id,
                    request.order_date,
                    sponsor.role.as_str()
                ),
            ));
        }
        priced(
            self.calculator.quote_sponsored(Some(&sponsor), total),
            shop.id.as_str(),
            operation,
        )
    }

    /// Recompute the shop's share row for `(sponsor, month)` and rebalance that cohort.
    async fn refresh_shop_share(
        conn: &mut SqliteConnection,
        sponsor_id: Option<&ParticipantId>,
        shop_id: &ParticipantId,
        order_date: Day,
    ) -> Result<(), EngineError> {
        let Some(sponsor_id) = sponsor_id else {
            return Ok(());
        };
        let period = YearMonth::of(order_date);
        let (from, to) = period.bounds();

        let figures = Repository::sponsor_order_figures(conn, sponsor_id, from, to).await?;
        let amount = Decimal::checked_sum(
            figures
                .iter()
                .filter(|f| &f.shop_id == shop_id)
                .map(|f| f.total_amount),
        )
        .ok_or_else(|| {
            EngineError::validation(shop_id.as_str(), "refresh_shop_share", "shop sales overflow")
        })?;
        Repository::set_shop_share(conn, sponsor_id, period, shop_id, amount).await?;

        let key = CohortKey::new(RatioTable::ShopSales, sponsor_id.clone(), period);
        Self::rebalance_in(conn, &key).await?;
        Ok(())
    }

    pub async fn create_order(&self, request: OrderRequest) -> Result<Order, EngineError> {
        const OP: &str = "create_order";
        let entity = request.shop_id.to_string();
        let total = validate_request(&request, &entity, OP)?;

        self.with_retry(&entity, OP, || {
            self.bounded(&entity, OP, async {
                let mut tx = self.repo.begin().await?;
                let quote = self.quote_in(&mut *tx, &request, total, OP).await?;

                let now = Utc::now();
                let order = Order {
                    id: RecordId::generate(),
                    shop_id: request.shop_id.clone(),
                    order_date: request.order_date,
                    total_amount: total,
                    is_self_shop_order: request.is_self_shop_order,
                    sponsor_id: quote.sponsor_id,
                    commission_rate: quote.rate,
                    commission_amount: quote.amount,
                    commission_status: CommissionStatus::Calculated,
                    line_items: request.line_items.clone(),
                    created_at: now,
                    updated_at: now,
                };
                Repository::insert_order(&mut *tx, &order).await?;
                Self::refresh_shop_share(
                    &mut *tx,
                    order.sponsor_id.as_ref(),
                    &order.shop_id,
                    order.order_date,
                )
                .await?;
                tx.commit().await?;

                info!(
                    order_id = %order.id,
                    shop_id = %order.shop_id,
                    sponsor_id = ?order.sponsor_id,
                    commission_amount = %order.commission_amount,
                    "Order priced"
                );
                Ok(order)
            })
        })
        .await
    }

    /// Replace an order's content. A changed shop, date or self-shop flag re-resolves the
    /// sponsor from scratch; otherwise the stored rate is reapplied to the new total.
    pub async fn update_order(
        &self,
        id: &RecordId,
        request: OrderRequest,
    ) -> Result<Order, EngineError> {
        const OP: &str = "update_order";
        let total = validate_request(&request, id.as_str(), OP)?;

        self.with_retry(id.as_str(), OP, || {
            self.bounded(id.as_str(), OP, async {
                let mut tx = self.repo.begin().await?;
                let existing = Repository::get_order(&mut *tx, id)
                    .await?
                    .ok_or_else(|| EngineError::not_found(id, OP))?;
                ensure_editable(&existing, OP)?;

                let reresolve = existing.shop_id != request.shop_id
                    || existing.order_date != request.order_date
                    || existing.is_self_shop_order != request.is_self_shop_order;
                let quote = if reresolve {
                    self.quote_in(&mut *tx, &request, total, OP).await?
                } else {
                    priced(
                        self.calculator.requote(
                            existing.sponsor_id.clone(),
                            existing.commission_rate,
                            total,
                        ),
                        id.as_str(),
                        OP,
                    )?
                };

                let order = Order {
                    shop_id: request.shop_id.clone(),
                    order_date: request.order_date,
                    total_amount: total,
                    is_self_shop_order: request.is_self_shop_order,
                    sponsor_id: quote.sponsor_id,
                    commission_rate: quote.rate,
                    commission_amount: quote.amount,
                    line_items: request.line_items.clone(),
                    updated_at: Utc::now(),
                    ..existing.clone()
                };
                Repository::update_order(&mut *tx, &order).await?;

                Self::refresh_shop_share(
                    &mut *tx,
                    existing.sponsor_id.as_ref(),
                    &existing.shop_id,
                    existing.order_date,
                )
                .await?;
                Self::refresh_shop_share(
                    &mut *tx,
                    order.sponsor_id.as_ref(),
                    &order.shop_id,
                    order.order_date,
                )
                .await?;
                tx.commit().await?;

                info!(
                    order_id = %order.id,
                    reresolved = reresolve,
                    commission_amount = %order.commission_amount,
                    "Order repriced"
                );
                Ok(order)
            })
        })
        .await
    }

    pub async fn delete_order(&self, id: &RecordId) -> Result<(), EngineError> {
        const OP: &str = "delete_order";
        self.with_retry(id.as_str(), OP, || {
            self.bounded(id.as_str(), OP, async {
                let mut tx = self.repo.begin().await?;
                let existing = Repository::get_order(&mut *tx, id)
                    .await?
                    .ok_or_else(|| EngineError::not_found(id, OP))?;
                if existing.commission_status.is_terminal() {
                    return Err(EngineError::terminal(id, OP, existing.commission_status));
                }

                Repository::delete_order(&mut *tx, id).await?;
                Self::refresh_shop_share(
                    &mut *tx,
                    existing.sponsor_id.as_ref(),
                    &existing.shop_id,
                    existing.order_date,
                )
                .await?;
                tx.commit().await?;

                info!(order_id = %id, "Order deleted");
                Ok(())
            })
        })
        .await
    }

    /// Move an order's commission status. Cancelling removes it from the shop shares.
    pub async fn set_order_status(
        &self,
        id: &RecordId,
        next: CommissionStatus,
    ) -> Result<Order, EngineError> {
        const OP: &str = "set_order_status";
        self.with_retry(id.as_str(), OP, || {
            self.bounded(id.as_str(), OP, async {
                let mut tx = self.repo.begin().await?;
                let existing = Repository::get_order(&mut *tx, id)
                    .await?
                    .ok_or_else(|| EngineError::not_found(id, OP))?;
                if existing.commission_status.is_terminal() {
                    return Err(EngineError::terminal(id, OP, existing.commission_status));
                }
                if !existing.commission_status.can_transition_to(next) {
                    return Err(EngineError::validation(
                        id,
                        OP,
                        format!(
                            "cannot move from {} to {}",
                            existing.commission_status.as_str(),
                            next.as_str()
                        ),
                    ));
                }

                let updated_at = Utc::now();
                Repository::set_order_status(&mut *tx, id, next, updated_at).await?;
                if next == CommissionStatus::Cancelled {
                    Self::refresh_shop_share(
                        &mut *tx,
                        existing.sponsor_id.as_ref(),
                        &existing.shop_id,
                        existing.order_date,
                    )
                    .await?;
                }
                tx.commit().await?;

                info!(order_id = %id, status = next.as_str(), "Order status changed");
                Ok(Order {
                    commission_status: next,
                    updated_at,
                    ..existing
                })
            })
        })
        .await
    }

    /// Apply the same status change to many orders, each in its own transaction with the
    /// checks of [`Ledger::set_order_status`].
    pub async fn bulk_set_order_status(
        &self,
        ids: &[RecordId],
        next: CommissionStatus,
    ) -> Result<BulkStatusOutcome, EngineError> {
        const OP: &str = "bulk_set_order_status";
        if ids.is_empty() || ids.len() > MAX_BULK_ORDERS {
            return Err(EngineError::validation(
                "orders",
                OP,
                format!("between 1 and {} order ids are required, got {}", MAX_BULK_ORDERS, ids.len()),
            ));
        }

        let mut outcome = BulkStatusOutcome {
            status: next,
            updated: Vec::with_capacity(ids.len()),
            failed: Vec::new(),
        };
        for id in ids {
            match self.set_order_status(id, next).await {
                Ok(order) => outcome.updated.push(order),
                Err(err) => {
                    warn!(order_id = %id, error = %err, "Bulk status change skipped order");
                    outcome.failed.push(BulkStatusFailure {
                        order_id: id.clone(),
                        kind: err.kind(),
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            status = next.as_str(),
            updated = outcome.updated.len(),
            failed = outcome.failed.len(),
            "Bulk order status change finished"
        );
        Ok(outcome)
    }

    pub async fn list_orders(&self, filter: &ListFilter) -> Result<Vec<Order>, EngineError> {
        const OP: &str = "list_orders";
        if !filter.has_valid_range() {
            return Err(EngineError::validation("orders", OP, "from must not be after to"));
        }
        self.bounded("orders", OP, async {
            let mut conn = self.repo.pool().acquire().await?;
            Ok(Repository::list_orders(&mut conn, filter).await?)
        })
        .await
    }

    pub async fn order(&self, id: &RecordId) -> Result<Order, EngineError> {
        const OP: &str = "get_order";
        self.bounded(id.as_str(), OP, async {
            let mut conn = self.repo.pool().acquire().await?;
            Repository::get_order(&mut conn, id)
                .await?
                .ok_or_else(|| EngineError::not_found(id, OP))
        })
        .await
    }
}

fn ensure_editable(order: &Order, operation: &'static str) -> Result<(), EngineError> {
    match order.commission_status {
        CommissionStatus::Paid => Err(EngineError::terminal(
            &order.id,
            operation,
            order.commission_status,
        )),
        CommissionStatus::Cancelled => Err(EngineError::validation(
            &order.id,
            operation,
            "cancelled orders cannot be edited",
        )),
        CommissionStatus::Calculated | CommissionStatus::Adjusted => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{register, setup_ledger};
    use super::*;
    use crate::domain::{LineItem, RelationshipRequest, Role};

    fn order_request(shop: &str, date: &str, total: i64) -> OrderRequest {
        OrderRequest {
            shop_id: ParticipantId::new(shop),
            order_date: date.parse().unwrap(),
            total_amount: Some(Decimal::from_i64(total)),
            is_self_shop_order: false,
            line_items: vec![],
        }
    }

    async fn two_sponsor_history(ledger: &Ledger) {
        register(ledger, "shop-1", Role::Shop).await;
        register(ledger, "kol-a", Role::Kol).await;
        register(ledger, "ol-b", Role::Ol).await;
        for (sponsor, date) in [("kol-a", "2024-01-01"), ("ol-b", "2024-07-01")] {
            ledger
                .reassign(RelationshipRequest {
                    shop_id: ParticipantId::new("shop-1"),
                    new_sponsor_id: ParticipantId::new(sponsor),
                    effective_date: date.parse().unwrap(),
                    reason: None,
                    kind: None,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_backdated_order_uses_historical_sponsor() {
        let (ledger, _temp) = setup_ledger().await;
        two_sponsor_history(&ledger).await;

        let order = ledger
            .create_order(order_request("shop-1", "2024-03-15", 1_000_000))
            .await
            .unwrap();
        assert_eq!(order.sponsor_id, Some(ParticipantId::new("kol-a")));
        assert_eq!(order.commission_rate, Decimal::from_i64(30));
        assert_eq!(order.commission_amount, Decimal::from_i64(300_000));
    }

    #[tokio::test]
    async fn test_date_change_reresolves_sponsor() {
        let (ledger, _temp) = setup_ledger().await;
        two_sponsor_history(&ledger).await;

        let order = ledger
            .create_order(order_request("shop-1", "2024-03-15", 1_000_000))
            .await
            .unwrap();
        let moved = ledger
            .update_order(&order.id, order_request("shop-1", "2024-08-01", 1_000_000))
            .await
            .unwrap();
        assert_eq!(moved.sponsor_id, Some(ParticipantId::new("ol-b")));
        assert_eq!(moved.commission_amount, Decimal::from_i64(200_000));
    }

    #[tokio::test]
    async fn test_amount_change_keeps_rate() {
        let (ledger, _temp) = setup_ledger().await;
        two_sponsor_history(&ledger).await;

        let order = ledger
            .create_order(order_request("shop-1", "2024-03-15", 1_000_000))
            .await
            .unwrap();

        // Rate override after the fact must not leak into an amount-only edit.
        ledger
            .register_participant(
                crate::domain::Participant::new(ParticipantId::new("kol-a"), "kol-a", Role::Kol)
                    .with_commission_rate(Decimal::from_i64(10)),
            )
            .await
            .unwrap();

        let mut request = order_request("shop-1", "2024-03-15", 0);
        request.total_amount = None;
        request.line_items = vec![LineItem {
            product_id: None,
            product_name: "serum".to_string(),
            quantity: 2,
            unit_price: Decimal::from_i64(1_000_000),
        }];
        let edited = ledger.update_order(&order.id, request).await.unwrap();
        assert_eq!(edited.commission_rate, Decimal::from_i64(30));
        assert_eq!(edited.commission_amount, Decimal::from_i64(600_000));
    }

    #[tokio::test]
    async fn test_unsponsored_shop_earns_nothing() {
        let (ledger, _temp) = setup_ledger().await;
        register(&ledger, "shop-1", Role::Shop).await;

        let order = ledger
            .create_order(order_request("shop-1", "2024-03-15", 1_000_000))
            .await
            .unwrap();
        assert_eq!(order.sponsor_id, None);
        assert!(order.commission_amount.is_zero());
    }

    #[tokio::test]
    async fn test_unknown_shop_is_invalid_reference() {
        let (ledger, _temp) = setup_ledger().await;
        let err = ledger
            .create_order(order_request("ghost", "2024-03-15", 1_000))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn test_self_shop_order_uses_owner_rate() {
        let (ledger, _temp) = setup_ledger().await;
        register(&ledger, "ol-b", Role::Ol).await;
        register(&ledger, "shop-1", Role::Shop).await;

        let mut request = order_request("ol-b", "2024-03-15", 500_000);
        request.is_self_shop_order = true;
        let order = ledger.create_order(request).await.unwrap();
        assert_eq!(order.sponsor_id, Some(ParticipantId::new("ol-b")));
        assert_eq!(order.commission_amount, Decimal::from_i64(100_000));

        let mut request = order_request("shop-1", "2024-03-15", 500_000);
        request.is_self_shop_order = true;
        let err = ledger.create_order(request).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn test_paid_order_is_frozen() {
        let (ledger, _temp) = setup_ledger().await;
        two_sponsor_history(&ledger).await;

        let order = ledger
            .create_order(order_request("shop-1", "2024-03-15", 1_000_000))
            .await
            .unwrap();
        ledger
            .set_order_status(&order.id, CommissionStatus::Paid)
            .await
            .unwrap();

        let err = ledger.delete_order(&order.id).await.unwrap_err();
        assert!(matches!(err, EngineError::TerminalStateViolation { .. }));
        let err = ledger
            .update_order(&order.id, order_request("shop-1", "2024-03-15", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TerminalStateViolation { .. }));
        let err = ledger
            .set_order_status(&order.id, CommissionStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TerminalStateViolation { .. }));
    }

    #[tokio::test]
    async fn test_non_positive_total_rejected() {
        let (ledger, _temp) = setup_ledger().await;
        register(&ledger, "shop-1", Role::Shop).await;
        let err = ledger
            .create_order(order_request("shop-1", "2024-03-15", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_oversized_amounts_are_rejected_not_panicking() {
        let (ledger, _temp) = setup_ledger().await;
        two_sponsor_history(&ledger).await;

        let mut request = order_request("shop-1", "2024-03-15", 1);
        request.total_amount = Some(Decimal::from_str_canonical("70000000000000000000000000000").unwrap());
        let err = ledger.create_order(request).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));

        let mut request = order_request("shop-1", "2024-03-15", 1);
        request.total_amount = None;
        request.line_items = vec![
            LineItem {
                product_id: None,
                product_name: "serum".to_string(),
                quantity: MAX_QUANTITY,
                unit_price: Decimal::max_amount(),
            },
            LineItem {
                product_id: None,
                product_name: "cream".to_string(),
                quantity: 1,
                unit_price: Decimal::from_i64(1),
            },
        ];
        let err = ledger.create_order(request).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));

        let mut request = order_request("shop-1", "2024-03-15", 1);
        request.line_items = vec![LineItem {
            product_id: None,
            product_name: "serum".to_string(),
            quantity: MAX_QUANTITY + 1,
            unit_price: Decimal::from_i64(1),
        }];
        let err = ledger.create_order(request).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));

        // The largest accepted total still prices.
        let order = ledger
            .create_order(order_request("shop-1", "2024-03-15", 1_000_000_000_000_000))
            .await
            .unwrap();
        assert_eq!(order.commission_amount, Decimal::from_i64(300_000_000_000_000));
    }

    #[tokio::test]
    async fn test_shop_registered_as_sponsor_target_is_invalid_reference() {
        let (ledger, _temp) = setup_ledger().await;
        register(&ledger, "shop-1", Role::Shop).await;
        register(&ledger, "shop-2", Role::Shop).await;

        // Legacy data can carry a shop in the sponsor column.
        let mut conn = ledger.repo().pool().acquire().await.unwrap();
        sqlx::query(
            "INSERT INTO shop_relationships (id, shop_id, sponsor_id, started_at, ended_at, is_active, kind, reason, created_at) \
             VALUES ('rel-1', 'shop-1', 'shop-2', '2024-01-01', NULL, 1, 'direct', NULL, 0)",
        )
        .execute(&mut *conn)
        .await
        .unwrap();
        drop(conn);

        let err = ledger
            .create_order(order_request("shop-1", "2024-03-15", 1_000_000))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn test_deleting_order_leaves_remaining_shop_at_full_share() {
        let (ledger, _temp) = setup_ledger().await;
        two_sponsor_history(&ledger).await;
        register(&ledger, "shop-2", Role::Shop).await;
        ledger
            .reassign(RelationshipRequest {
                shop_id: ParticipantId::new("shop-2"),
                new_sponsor_id: ParticipantId::new("kol-a"),
                effective_date: "2024-01-01".parse().unwrap(),
                reason: None,
                kind: None,
            })
            .await
            .unwrap();

        let first = ledger
            .create_order(order_request("shop-1", "2024-03-15", 3_000_000))
            .await
            .unwrap();
        ledger
            .create_order(order_request("shop-2", "2024-03-20", 1_000_000))
            .await
            .unwrap();
        let key = CohortKey::new(
            RatioTable::ShopSales,
            ParticipantId::new("kol-a"),
            YearMonth::of(first.order_date),
        );
        let rows = ledger.cohort(&key).await.unwrap();
        let shop_2 = rows.iter().find(|r| r.item_id == "shop-2").unwrap();
        assert_eq!(shop_2.ratio, Decimal::from_i64(25));

        ledger.delete_order(&first.id).await.unwrap();

        let rows = ledger.cohort(&key).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_id, "shop-2");
        assert_eq!(rows[0].ratio, Decimal::hundred());
    }

    #[tokio::test]
    async fn test_bulk_status_reports_each_order() {
        let (ledger, _temp) = setup_ledger().await;
        two_sponsor_history(&ledger).await;

        let open = ledger
            .create_order(order_request("shop-1", "2024-03-15", 1_000_000))
            .await
            .unwrap();
        let paid = ledger
            .create_order(order_request("shop-1", "2024-03-16", 2_000_000))
            .await
            .unwrap();
        ledger
            .set_order_status(&paid.id, CommissionStatus::Paid)
            .await
            .unwrap();
        let missing = RecordId::new("no-such-order");

        let outcome = ledger
            .bulk_set_order_status(
                &[open.id.clone(), paid.id.clone(), missing.clone()],
                CommissionStatus::Cancelled,
            )
            .await
            .unwrap();
        assert_eq!(outcome.updated.len(), 1);
        assert_eq!(outcome.updated[0].id, open.id);
        assert_eq!(outcome.updated[0].commission_status, CommissionStatus::Cancelled);
        assert_eq!(outcome.failed.len(), 2);
        assert_eq!(outcome.failed[0].order_id, paid.id);
        assert_eq!(outcome.failed[0].kind, "terminal_state_violation");
        assert_eq!(outcome.failed[1].order_id, missing);
        assert_eq!(outcome.failed[1].kind, "not_found");

        let stored = ledger.order(&open.id).await.unwrap();
        assert_eq!(stored.commission_status, CommissionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_bulk_status_needs_ids_within_cap() {
        let (ledger, _temp) = setup_ledger().await;
        let err = ledger
            .bulk_set_order_status(&[], CommissionStatus::Paid)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));

        let ids: Vec<RecordId> = (0..=MAX_BULK_ORDERS)
            .map(|i| RecordId::new(format!("order-{}", i)))
            .collect();
        let err = ledger
            .bulk_set_order_status(&ids, CommissionStatus::Paid)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_list_orders_filters_by_sponsor_and_range() {
        let (ledger, _temp) = setup_ledger().await;
        two_sponsor_history(&ledger).await;
        for date in ["2024-03-15", "2024-05-01", "2024-08-10"] {
            ledger
                .create_order(order_request("shop-1", date, 1_000_000))
                .await
                .unwrap();
        }

        let by_kol = ledger
            .list_orders(&ListFilter {
                sponsor_id: Some(ParticipantId::new("kol-a")),
                ..ListFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_kol.len(), 2);
        assert_eq!(by_kol[0].order_date, "2024-05-01".parse().unwrap());

        let in_range = ledger
            .list_orders(&ListFilter {
                from: Some("2024-04-01".parse().unwrap()),
                to: Some("2024-12-31".parse().unwrap()),
                limit: Some(1),
                ..ListFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(in_range.len(), 1);
        assert_eq!(in_range[0].order_date, "2024-08-10".parse().unwrap());

        let err = ledger
            .list_orders(&ListFilter {
                from: Some("2024-05-01".parse().unwrap()),
                to: Some("2024-04-01".parse().unwrap()),
                ..ListFilter::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }
}
