//! Device sales and the per-sponsor tier accumulator.
//!
//! Every write that moves an accumulator holds the sponsor's lock, re-reads the counters
//! inside the transaction and writes them back with a version check, so two sales for
//! the same sponsor can never both apply a delta to the same starting counters.

use super::Ledger;
use crate::db::Repository;
use crate::domain::device::DEFAULT_DEVICE_NAME;
use crate::domain::{
    Day, DeviceAccumulatorSnapshot, DeviceSale, DeviceSaleRequest, DeviceStatistics, ListFilter,
    ParticipantId, RecordId, Role, Tier, MAX_QUANTITY,
};
use crate::engine::{AccumulatorShift, DeviceAccumulator, TierPricing, TierProjection};
use crate::error::EngineError;
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use tracing::{info, warn};

/// A recorded or edited sale together with the accumulator state it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceSaleOutcome {
    pub sale: DeviceSale,
    pub accumulator: DeviceAccumulatorSnapshot,
}

/// Cached accumulator compared against a fold of the sponsor's full sale history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccumulatorAudit {
    pub sponsor_id: ParticipantId,
    pub cached: Option<DeviceAccumulatorSnapshot>,
    pub folded_sold: i64,
    pub folded_returned: i64,
    pub folded_tier: Tier,
    pub drift: bool,
}

fn validate_quantity(request: &DeviceSaleRequest, operation: &'static str) -> Result<(), EngineError> {
    if request.quantity == 0 {
        return Err(EngineError::validation(
            &request.shop_id,
            operation,
            "quantity must not be zero",
        ));
    }
    if request.quantity.unsigned_abs() > MAX_QUANTITY.unsigned_abs() {
        return Err(EngineError::validation(
            &request.shop_id,
            operation,
            format!("quantity magnitude exceeds {}", MAX_QUANTITY),
        ));
    }
    Ok(())
}

fn priced(
    pricing: Option<TierPricing>,
    entity: &str,
    operation: &'static str,
) -> Result<TierPricing, EngineError> {
    pricing.ok_or_else(|| EngineError::validation(entity, operation, "device commission overflows"))
}

const TOP_SPONSORS: u32 = 10;

fn empty_snapshot(sponsor_id: &ParticipantId) -> DeviceAccumulatorSnapshot {
    DeviceAccumulatorSnapshot {
        sponsor_id: sponsor_id.clone(),
        total_devices_sold: 0,
        total_devices_returned: 0,
        current_tier: Tier::Tier1To4,
        tier_changed_at: None,
        version: 0,
    }
}

impl Ledger {
    /// The sponsor a device sale by `shop_id` on `day` is credited to.
    async fn sale_sponsor(
        conn: &mut SqliteConnection,
        shop_id: &ParticipantId,
        day: Day,
        operation: &'static str,
    ) -> Result<ParticipantId, EngineError> {
        let shop = Self::require_participant(&mut *conn, shop_id, operation).await?;
        if shop.role != Role::Shop {
            return Err(EngineError::invalid_reference(
                shop_id,
                operation,
                "device sales are recorded against a shop",
            ));
        }

        Self::resolve_in(conn, shop_id, day, operation)
            .await?
            .map(|rel| rel.sponsor_id)
            .ok_or_else(|| {
                EngineError::invalid_reference(
                    shop_id,
                    operation,
                    format!("shop has no sponsor on {day}"),
                )
            })
    }

    /// Persist moved counters. A missing `previous` row is created, an existing one is
    /// only overwritten if nobody else moved it since it was read.
    async fn store_accumulator(
        conn: &mut SqliteConnection,
        sponsor_id: &ParticipantId,
        previous: Option<&DeviceAccumulatorSnapshot>,
        counters: DeviceAccumulator,
        shift: AccumulatorShift,
        operation: &'static str,
    ) -> Result<DeviceAccumulatorSnapshot, EngineError> {
        if shift.clamped {
            warn!(
                sponsor_id = %sponsor_id,
                sold = counters.sold,
                returned = counters.returned,
                "Device accumulator clamped at zero, history and cache disagree"
            );
        }

        let tier_changed_at = if shift.tier_changed() {
            info!(
                sponsor_id = %sponsor_id,
                from = shift.previous_tier.as_str(),
                to = shift.tier.as_str(),
                "Device tier changed"
            );
            Some(Utc::now())
        } else {
            previous.and_then(|p| p.tier_changed_at)
        };

        let snapshot = DeviceAccumulatorSnapshot {
            sponsor_id: sponsor_id.clone(),
            total_devices_sold: counters.sold,
            total_devices_returned: counters.returned,
            current_tier: counters.tier,
            tier_changed_at,
            version: previous.map_or(1, |p| p.version + 1),
        };

        match previous {
            None => Repository::insert_accumulator(conn, &snapshot)
                .await
                .map_err(|e| match EngineError::from_db(e, sponsor_id, operation) {
                    EngineError::IntegrityViolation { .. } => EngineError::conflict(
                        sponsor_id,
                        operation,
                        "accumulator created concurrently",
                    ),
                    other => other,
                })?,
            Some(p) => {
                if !Repository::update_accumulator_versioned(conn, &snapshot, p.version).await? {
                    return Err(EngineError::conflict(
                        sponsor_id,
                        operation,
                        format!("accumulator moved past version {}", p.version),
                    ));
                }
            }
        }

        Ok(snapshot)
    }

    async fn existing_accumulator(
        conn: &mut SqliteConnection,
        sponsor_id: &ParticipantId,
        operation: &'static str,
    ) -> Result<DeviceAccumulatorSnapshot, EngineError> {
        Repository::get_accumulator(conn, sponsor_id).await?.ok_or_else(|| {
            warn!(sponsor_id = %sponsor_id, "Recorded device sale without an accumulator row");
            EngineError::integrity(
                sponsor_id,
                operation,
                "accumulator missing for recorded sales, rebuild it",
            )
        })
    }

    async fn load_sale(&self, id: &RecordId, operation: &'static str) -> Result<DeviceSale, EngineError> {
        let mut conn = self.repo.pool().acquire().await?;
        Repository::get_device_sale(&mut conn, id)
            .await?
            .ok_or_else(|| EngineError::not_found(id, operation))
    }

    pub async fn record_device_sale(
        &self,
        request: DeviceSaleRequest,
    ) -> Result<DeviceSaleOutcome, EngineError> {
        const OP: &str = "record_device_sale";
        validate_quantity(&request, OP)?;
        let entity = request.shop_id.to_string();

        self.with_retry(&entity, OP, || {
            self.bounded(&entity, OP, async {
                let sponsor_id = {
                    let mut conn = self.repo.pool().acquire().await?;
                    Self::sale_sponsor(&mut conn, &request.shop_id, request.sale_date, OP).await?
                };
                let _guard = self.locks.acquire(&sponsor_id).await;

                let mut tx = self.repo.begin().await?;
                let current = Self::sale_sponsor(&mut *tx, &request.shop_id, request.sale_date, OP).await?;
                if current != sponsor_id {
                    return Err(EngineError::conflict(
                        &request.shop_id,
                        OP,
                        "sponsor changed while waiting for the accumulator lock",
                    ));
                }

                let previous = Repository::get_accumulator(&mut *tx, &sponsor_id).await?;
                let mut counters = previous
                    .as_ref()
                    .map(DeviceAccumulator::from_snapshot)
                    .unwrap_or_default();
                let pricing = priced(counters.price(&self.schedule, request.quantity), &entity, OP)?;
                let shift = counters.apply(&self.schedule, request.quantity);

                let now = Utc::now();
                let sale = DeviceSale {
                    id: RecordId::generate(),
                    shop_id: request.shop_id.clone(),
                    sponsor_id: sponsor_id.clone(),
                    sale_date: request.sale_date,
                    quantity: request.quantity,
                    device_name: request
                        .device_name
                        .clone()
                        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
                    serial_numbers: request.serial_numbers.clone(),
                    tier_at_sale: pricing.tier,
                    standard_commission: pricing.standard,
                    actual_commission: pricing.actual,
                    notes: request.notes.clone(),
                    created_at: now,
                    updated_at: now,
                };
                Repository::insert_device_sale(&mut *tx, &sale).await?;
                let accumulator = Self::store_accumulator(
                    &mut *tx,
                    &sponsor_id,
                    previous.as_ref(),
                    counters,
                    shift,
                    OP,
                )
                .await?;
                tx.commit().await?;

                info!(
                    sale_id = %sale.id,
                    sponsor_id = %sponsor_id,
                    quantity = sale.quantity,
                    tier = sale.tier_at_sale.as_str(),
                    "Device sale recorded"
                );
                Ok(DeviceSaleOutcome { sale, accumulator })
            })
        })
        .await
    }

    /// Change a sale's quantity or details. The counters move by the quantity difference
    /// only and the sale keeps the tier it was recorded at.
    pub async fn update_device_sale(
        &self,
        id: &RecordId,
        request: DeviceSaleRequest,
    ) -> Result<DeviceSaleOutcome, EngineError> {
        const OP: &str = "update_device_sale";
        validate_quantity(&request, OP)?;

        self.with_retry(id.as_str(), OP, || {
            self.bounded(id.as_str(), OP, async {
                let recorded = self.load_sale(id, OP).await?;
                if recorded.shop_id != request.shop_id || recorded.sale_date != request.sale_date {
                    return Err(EngineError::validation(
                        id,
                        OP,
                        "shop and sale date are fixed once recorded, delete and record again",
                    ));
                }
                let _guard = self.locks.acquire(&recorded.sponsor_id).await;

                let mut tx = self.repo.begin().await?;
                let existing = Repository::get_device_sale(&mut *tx, id)
                    .await?
                    .ok_or_else(|| EngineError::not_found(id, OP))?;
                let previous = Self::existing_accumulator(&mut *tx, &existing.sponsor_id, OP).await?;

                let mut counters = DeviceAccumulator::from_snapshot(&previous);
                let shift = counters.adjust(&self.schedule, existing.quantity, request.quantity);
                let pricing = priced(
                    TierPricing::at(&self.schedule, existing.tier_at_sale, request.quantity),
                    id.as_str(),
                    OP,
                )?;

                let sale = DeviceSale {
                    quantity: request.quantity,
                    device_name: request
                        .device_name
                        .clone()
                        .unwrap_or_else(|| existing.device_name.clone()),
                    serial_numbers: request.serial_numbers.clone(),
                    standard_commission: pricing.standard,
                    actual_commission: pricing.actual,
                    notes: request.notes.clone(),
                    updated_at: Utc::now(),
                    ..existing.clone()
                };
                if !Repository::update_device_sale(&mut *tx, &sale).await? {
                    return Err(EngineError::not_found(id, OP));
                }
                let accumulator = Self::store_accumulator(
                    &mut *tx,
                    &existing.sponsor_id,
                    Some(&previous),
                    counters,
                    shift,
                    OP,
                )
                .await?;
                tx.commit().await?;

                info!(
                    sale_id = %id,
                    sponsor_id = %sale.sponsor_id,
                    from = existing.quantity,
                    to = sale.quantity,
                    "Device sale updated"
                );
                Ok(DeviceSaleOutcome { sale, accumulator })
            })
        })
        .await
    }

    /// Remove a sale and reverse its effect on the counters.
    pub async fn delete_device_sale(
        &self,
        id: &RecordId,
    ) -> Result<DeviceAccumulatorSnapshot, EngineError> {
        const OP: &str = "delete_device_sale";

        self.with_retry(id.as_str(), OP, || {
            self.bounded(id.as_str(), OP, async {
                let recorded = self.load_sale(id, OP).await?;
                let _guard = self.locks.acquire(&recorded.sponsor_id).await;

                let mut tx = self.repo.begin().await?;
                let existing = Repository::get_device_sale(&mut *tx, id)
                    .await?
                    .ok_or_else(|| EngineError::not_found(id, OP))?;
                let previous = Self::existing_accumulator(&mut *tx, &existing.sponsor_id, OP).await?;

                let mut counters = DeviceAccumulator::from_snapshot(&previous);
                let shift = counters.reverse(&self.schedule, existing.quantity);

                Repository::delete_device_sale(&mut *tx, id).await?;
                let accumulator = Self::store_accumulator(
                    &mut *tx,
                    &existing.sponsor_id,
                    Some(&previous),
                    counters,
                    shift,
                    OP,
                )
                .await?;
                tx.commit().await?;

                info!(sale_id = %id, sponsor_id = %existing.sponsor_id, "Device sale deleted");
                Ok(accumulator)
            })
        })
        .await
    }

    pub async fn device_sale(&self, id: &RecordId) -> Result<DeviceSale, EngineError> {
        const OP: &str = "get_device_sale";
        self.bounded(id.as_str(), OP, self.load_sale(id, OP)).await
    }

    pub async fn list_device_sales(&self, filter: &ListFilter) -> Result<Vec<DeviceSale>, EngineError> {
        const OP: &str = "list_device_sales";
        if !filter.has_valid_range() {
            return Err(EngineError::validation("device_sales", OP, "from must not be after to"));
        }
        self.bounded("device_sales", OP, async {
            let mut conn = self.repo.pool().acquire().await?;
            Ok(Repository::list_device_sales(&mut conn, filter).await?)
        })
        .await
    }

    /// Sold and returned units per shop in `[from, to]`, plus the leading accumulators.
    pub async fn device_statistics(
        &self,
        from: Option<Day>,
        to: Option<Day>,
    ) -> Result<DeviceStatistics, EngineError> {
        const OP: &str = "device_statistics";
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(EngineError::validation("device_sales", OP, "from must not be after to"));
            }
        }
        self.bounded("device_sales", OP, async {
            let mut tx = self.repo.begin().await?;
            let sales = Repository::device_sales_in_range(&mut *tx, from, to).await?;
            let top_sponsors = Repository::top_accumulators(&mut *tx, TOP_SPONSORS).await?;
            tx.commit().await?;

            let mut stats = DeviceStatistics::fold(from, to, &sales).ok_or_else(|| {
                EngineError::validation("device_sales", OP, "device totals overflow")
            })?;
            stats.top_sponsors = top_sponsors;
            Ok(stats)
        })
        .await
    }

    /// Current counters for a sponsor. A sponsor without sales reads as all zeros at version 0.
    pub async fn accumulator(
        &self,
        sponsor_id: &ParticipantId,
    ) -> Result<DeviceAccumulatorSnapshot, EngineError> {
        const OP: &str = "get_accumulator";
        self.bounded(sponsor_id.as_str(), OP, async {
            let mut conn = self.repo.pool().acquire().await?;
            if Repository::get_participant(&mut conn, sponsor_id).await?.is_none() {
                return Err(EngineError::not_found(sponsor_id, OP));
            }
            Ok(Repository::get_accumulator(&mut conn, sponsor_id)
                .await?
                .unwrap_or_else(|| empty_snapshot(sponsor_id)))
        })
        .await
    }

    pub async fn audit_accumulator(
        &self,
        sponsor_id: &ParticipantId,
    ) -> Result<AccumulatorAudit, EngineError> {
        const OP: &str = "audit_accumulator";
        self.bounded(sponsor_id.as_str(), OP, async {
            let mut tx = self.repo.begin().await?;
            if Repository::get_participant(&mut *tx, sponsor_id).await?.is_none() {
                return Err(EngineError::not_found(sponsor_id, OP));
            }
            let quantities = Repository::sponsor_device_quantities(&mut *tx, sponsor_id).await?;
            let cached = Repository::get_accumulator(&mut *tx, sponsor_id).await?;
            tx.commit().await?;

            let folded = DeviceAccumulator::fold(&self.schedule, quantities);
            let drift = match &cached {
                Some(snapshot) => DeviceAccumulator::from_snapshot(snapshot) != folded,
                None => folded != DeviceAccumulator::default(),
            };
            if drift {
                warn!(
                    sponsor_id = %sponsor_id,
                    folded_sold = folded.sold,
                    folded_returned = folded.returned,
                    "Device accumulator drifted from sale history"
                );
            }

            Ok(AccumulatorAudit {
                sponsor_id: sponsor_id.clone(),
                cached,
                folded_sold: folded.sold,
                folded_returned: folded.returned,
                folded_tier: folded.tier,
                drift,
            })
        })
        .await
    }

    /// Overwrite the cached counters with the fold of the sponsor's sale history.
    pub async fn rebuild_accumulator(
        &self,
        sponsor_id: &ParticipantId,
    ) -> Result<DeviceAccumulatorSnapshot, EngineError> {
        const OP: &str = "rebuild_accumulator";
        self.with_retry(sponsor_id.as_str(), OP, || {
            self.bounded(sponsor_id.as_str(), OP, async {
                let _guard = self.locks.acquire(sponsor_id).await;
                let mut tx = self.repo.begin().await?;
                let sponsor = Self::require_participant(&mut *tx, sponsor_id, OP).await?;
                if !sponsor.role.is_sponsor() {
                    return Err(EngineError::invalid_reference(
                        sponsor_id,
                        OP,
                        "only a kol or ol carries an accumulator",
                    ));
                }

                let quantities = Repository::sponsor_device_quantities(&mut *tx, sponsor_id).await?;
                let previous = Repository::get_accumulator(&mut *tx, sponsor_id).await?;
                let folded = DeviceAccumulator::fold(&self.schedule, quantities);
                let shift = AccumulatorShift {
                    previous_tier: previous.as_ref().map_or(Tier::Tier1To4, |p| p.current_tier),
                    tier: folded.tier,
                    clamped: false,
                };

                let accumulator = Self::store_accumulator(
                    &mut *tx,
                    sponsor_id,
                    previous.as_ref(),
                    folded,
                    shift,
                    OP,
                )
                .await?;
                tx.commit().await?;

                info!(
                    sponsor_id = %sponsor_id,
                    sold = accumulator.total_devices_sold,
                    returned = accumulator.total_devices_returned,
                    "Device accumulator rebuilt"
                );
                Ok(accumulator)
            })
        })
        .await
    }

    /// Read-only: what recording `additional` more units would do to the sponsor's tier.
    pub async fn simulate_tier_change(
        &self,
        sponsor_id: &ParticipantId,
        additional: i64,
    ) -> Result<TierProjection, EngineError> {
        const OP: &str = "simulate_tier_change";
        if additional.unsigned_abs() > MAX_QUANTITY.unsigned_abs() {
            return Err(EngineError::validation(
                sponsor_id,
                OP,
                format!("additional units exceed {}", MAX_QUANTITY),
            ));
        }
        let snapshot = self.accumulator(sponsor_id).await?;
        DeviceAccumulator::from_snapshot(&snapshot)
            .project(&self.schedule, additional)
            .ok_or_else(|| EngineError::validation(sponsor_id, OP, "projection overflows"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{register, setup_ledger};
    use super::*;
    use crate::domain::{Decimal, RelationshipRequest};

    async fn sponsored_shop(ledger: &Ledger) {
        register(ledger, "shop-1", Role::Shop).await;
        register(ledger, "kol-a", Role::Kol).await;
        ledger
            .reassign(RelationshipRequest {
                shop_id: ParticipantId::new("shop-1"),
                new_sponsor_id: ParticipantId::new("kol-a"),
                effective_date: "2024-01-01".parse().unwrap(),
                reason: None,
                kind: None,
            })
            .await
            .unwrap();
    }

    fn sale(quantity: i64) -> DeviceSaleRequest {
        DeviceSaleRequest {
            shop_id: ParticipantId::new("shop-1"),
            sale_date: "2024-05-10".parse().unwrap(),
            quantity,
            device_name: None,
            serial_numbers: vec![],
            notes: None,
        }
    }

    fn kol() -> ParticipantId {
        ParticipantId::new("kol-a")
    }

    #[tokio::test]
    async fn test_sale_priced_before_tier_crossing() {
        let (ledger, _temp) = setup_ledger().await;
        sponsored_shop(&ledger).await;

        let first = ledger.record_device_sale(sale(4)).await.unwrap();
        assert_eq!(first.sale.sponsor_id, kol());
        assert_eq!(first.sale.device_name, DEFAULT_DEVICE_NAME);
        assert_eq!(first.sale.standard_commission, Decimal::from_i64(6_000_000));
        assert!(first.accumulator.tier_changed_at.is_none());

        let second = ledger.record_device_sale(sale(2)).await.unwrap();
        assert_eq!(second.sale.tier_at_sale, Tier::Tier1To4);
        assert_eq!(second.sale.standard_commission, Decimal::from_i64(3_000_000));
        assert_eq!(second.accumulator.current_tier, Tier::Tier5Plus);
        assert_eq!(second.accumulator.net_devices(), 6);
        assert!(second.accumulator.tier_changed_at.is_some());
    }

    #[tokio::test]
    async fn test_return_priced_after_return() {
        let (ledger, _temp) = setup_ledger().await;
        sponsored_shop(&ledger).await;

        ledger.record_device_sale(sale(6)).await.unwrap();
        let returned = ledger.record_device_sale(sale(-2)).await.unwrap();
        assert_eq!(returned.sale.tier_at_sale, Tier::Tier1To4);
        assert_eq!(returned.sale.standard_commission, Decimal::from_i64(3_000_000));
        assert_eq!(returned.sale.actual_commission, Decimal::from_i64(-3_000_000));
        assert_eq!(returned.accumulator.total_devices_returned, 2);
        assert_eq!(returned.accumulator.current_tier, Tier::Tier1To4);
    }

    #[tokio::test]
    async fn test_create_edit_delete_round_trip() {
        let (ledger, _temp) = setup_ledger().await;
        sponsored_shop(&ledger).await;
        ledger.record_device_sale(sale(1)).await.unwrap();
        let before = ledger.accumulator(&kol()).await.unwrap();

        let created = ledger.record_device_sale(sale(4)).await.unwrap();
        assert_eq!(created.accumulator.total_devices_sold, 5);

        let edited = ledger.update_device_sale(&created.sale.id, sale(6)).await.unwrap();
        assert_eq!(edited.accumulator.total_devices_sold, 7);
        assert_eq!(edited.sale.tier_at_sale, created.sale.tier_at_sale);
        assert_eq!(edited.sale.standard_commission, Decimal::from_i64(9_000_000));

        let after = ledger.delete_device_sale(&created.sale.id).await.unwrap();
        assert_eq!(after.total_devices_sold, before.total_devices_sold);
        assert_eq!(after.total_devices_returned, before.total_devices_returned);
        assert_eq!(after.current_tier, before.current_tier);
        assert!(!ledger.audit_accumulator(&kol()).await.unwrap().drift);
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let (ledger, _temp) = setup_ledger().await;
        register(&ledger, "shop-1", Role::Shop).await;

        let unsponsored = ledger.record_device_sale(sale(1)).await.unwrap_err();
        assert!(matches!(unsponsored, EngineError::InvalidReference { .. }));

        let zero = ledger.record_device_sale(sale(0)).await.unwrap_err();
        assert!(matches!(zero, EngineError::Validation { .. }));

        let mut unknown = sale(1);
        unknown.shop_id = ParticipantId::new("ghost");
        let err = ledger.record_device_sale(unknown).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn test_edit_cannot_move_sale() {
        let (ledger, _temp) = setup_ledger().await;
        sponsored_shop(&ledger).await;
        let created = ledger.record_device_sale(sale(2)).await.unwrap();

        let mut moved = sale(2);
        moved.sale_date = "2024-06-01".parse().unwrap();
        let err = ledger.update_device_sale(&created.sale.id, moved).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_sales_do_not_lose_updates() {
        let (ledger, _temp) = setup_ledger().await;
        sponsored_shop(&ledger).await;

        let writes = (0..8).map(|_| {
            let ledger = ledger.clone();
            async move { ledger.record_device_sale(sale(1)).await }
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let snapshot = ledger.accumulator(&kol()).await.unwrap();
        assert_eq!(snapshot.total_devices_sold, 8);
        assert_eq!(snapshot.version, 8);
    }

    #[tokio::test]
    async fn test_audit_and_rebuild_repair_drift() {
        let (ledger, _temp) = setup_ledger().await;
        sponsored_shop(&ledger).await;
        ledger.record_device_sale(sale(3)).await.unwrap();

        sqlx::query("UPDATE device_accumulators SET total_devices_sold = 9")
            .execute(ledger.repo().pool())
            .await
            .unwrap();
        let audit = ledger.audit_accumulator(&kol()).await.unwrap();
        assert!(audit.drift);
        assert_eq!(audit.folded_sold, 3);

        let rebuilt = ledger.rebuild_accumulator(&kol()).await.unwrap();
        assert_eq!(rebuilt.total_devices_sold, 3);
        assert!(!ledger.audit_accumulator(&kol()).await.unwrap().drift);
    }

    #[tokio::test]
    async fn test_simulation_is_read_only() {
        let (ledger, _temp) = setup_ledger().await;
        sponsored_shop(&ledger).await;
        ledger.record_device_sale(sale(3)).await.unwrap();

        let projection = ledger.simulate_tier_change(&kol(), 2).await.unwrap();
        assert!(projection.tier_changed);
        assert_eq!(projection.projected_tier, Tier::Tier5Plus);
        assert_eq!(projection.commission_difference, Decimal::from_i64(2_000_000));

        let snapshot = ledger.accumulator(&kol()).await.unwrap();
        assert_eq!(snapshot.net_devices(), 3);
    }

    #[tokio::test]
    async fn test_list_device_sales_by_shop() {
        let (ledger, _temp) = setup_ledger().await;
        sponsored_shop(&ledger).await;
        ledger.record_device_sale(sale(2)).await.unwrap();
        let mut later = sale(-1);
        later.sale_date = "2024-06-02".parse().unwrap();
        ledger.record_device_sale(later).await.unwrap();

        let sales = ledger
            .list_device_sales(&ListFilter {
                shop_id: Some(ParticipantId::new("shop-1")),
                ..ListFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(sales.len(), 2);
        assert_eq!(sales[0].quantity, -1);

        let none = ledger
            .list_device_sales(&ListFilter {
                sponsor_id: Some(ParticipantId::new("ol-z")),
                ..ListFilter::default()
            })
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_statistics_cover_range_and_top_sponsors() {
        let (ledger, _temp) = setup_ledger().await;
        sponsored_shop(&ledger).await;
        ledger.record_device_sale(sale(3)).await.unwrap();
        ledger.record_device_sale(sale(-1)).await.unwrap();
        let mut outside = sale(5);
        outside.sale_date = "2024-07-01".parse().unwrap();
        ledger.record_device_sale(outside).await.unwrap();

        let stats = ledger
            .device_statistics(
                Some("2024-05-01".parse().unwrap()),
                Some("2024-05-31".parse().unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(stats.total_sold, 3);
        assert_eq!(stats.total_returned, 1);
        assert_eq!(stats.net, 2);
        assert_eq!(stats.by_shop.len(), 1);
        assert_eq!(stats.by_shop[0].shop_id, ParticipantId::new("shop-1"));
        assert_eq!(stats.top_sponsors.len(), 1);
        assert_eq!(stats.top_sponsors[0].sponsor_id, kol());
        assert_eq!(stats.top_sponsors[0].net_devices(), 7);

        let err = ledger
            .device_statistics(
                Some("2024-06-01".parse().unwrap()),
                Some("2024-05-01".parse().unwrap()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }
}
