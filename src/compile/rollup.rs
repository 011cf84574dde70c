//! Rollups are a read cache recomputed from source rows. Nothing reads them back into
//! a commission decision.

use crate::db::{OrderFigures, Repository};
use crate::domain::{Decimal, DeviceSale, MonthlyRollup, ParticipantId, YearMonth};
use crate::error::{AppError, EngineError};
use chrono::Utc;
use futures::future::try_join_all;
use sqlx::sqlite::SqliteConnection;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum RollupError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("csv export error: {0}")]
    Csv(String),
}

impl From<RollupError> for AppError {
    fn from(err: RollupError) -> Self {
        match err {
            RollupError::Engine(e) => AppError::Engine(e),
            RollupError::Csv(msg) => AppError::Internal(msg),
        }
    }
}

/// Summarize one sponsor's month. Orders arrive already filtered to non-cancelled ones.
///
/// `None` if any running total overflows.
pub fn fold_rollup(
    sponsor_id: ParticipantId,
    period: YearMonth,
    orders: &[OrderFigures],
    devices: &[DeviceSale],
) -> Option<MonthlyRollup> {
    let mut rollup = MonthlyRollup::empty(sponsor_id, period);

    for order in orders {
        let (sales, commission) = if order.is_self_shop_order {
            (&mut rollup.self_shop_sales, &mut rollup.self_shop_commission)
        } else {
            (&mut rollup.subordinate_sales, &mut rollup.subordinate_commission)
        };
        *sales = sales.checked_add(order.total_amount)?;
        *commission = commission.checked_add(order.commission_amount)?;
    }
    for sale in devices {
        rollup.device_units_net = rollup.device_units_net.checked_add(sale.quantity)?;
        rollup.device_commission = rollup.device_commission.checked_add(sale.actual_commission)?;
    }

    rollup.total_commission = Decimal::checked_sum([
        rollup.subordinate_commission,
        rollup.self_shop_commission,
        rollup.device_commission,
    ])?;
    rollup.computed_at = Utc::now();
    Some(rollup)
}

#[derive(Debug, Clone)]
pub struct RollupCompiler {
    repo: Arc<Repository>,
    timeout: Duration,
}

impl RollupCompiler {
    pub fn new(repo: Arc<Repository>, timeout: Duration) -> Self {
        Self { repo, timeout }
    }

    async fn bounded<T, F>(&self, entity: &str, operation: &'static str, work: F) -> Result<T, EngineError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result.map_err(|e| e.within(entity, operation)),
            Err(_) => Err(EngineError::Timeout {
                entity: entity.to_string(),
                operation,
                after_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn tally(
        conn: &mut SqliteConnection,
        sponsor_id: &ParticipantId,
        period: YearMonth,
    ) -> Result<MonthlyRollup, EngineError> {
        const OP: &str = "compile_rollup";
        let (from, to) = period.bounds();
        let orders = Repository::sponsor_order_figures(&mut *conn, sponsor_id, from, to).await?;
        let devices = Repository::sponsor_device_sales_between(conn, sponsor_id, from, to).await?;
        fold_rollup(sponsor_id.clone(), period, &orders, &devices).ok_or_else(|| {
            EngineError::validation(
                format!("{sponsor_id}/{period}"),
                OP,
                "rollup totals overflow",
            )
        })
    }

    /// Recompute and store one sponsor's rollup.
    pub async fn compile_sponsor(
        &self,
        sponsor_id: &ParticipantId,
        period: YearMonth,
    ) -> Result<MonthlyRollup, EngineError> {
        const OP: &str = "compile_rollup";
        self.bounded(sponsor_id.as_str(), OP, async {
            let mut tx = self.repo.begin().await?;
            if Repository::get_participant(&mut *tx, sponsor_id).await?.is_none() {
                return Err(EngineError::not_found(sponsor_id, OP));
            }
            let rollup = Self::tally(&mut *tx, sponsor_id, period).await?;
            Repository::upsert_rollup(&mut *tx, &rollup).await?;
            tx.commit().await?;
            debug!(sponsor_id = %sponsor_id, period = %period, "Rollup compiled");
            Ok(rollup)
        })
        .await
    }

    /// Recompute every sponsor's rollup for a month. Tallies run concurrently on separate
    /// connections and are written back in a single transaction.
    pub async fn compile_period(&self, period: YearMonth) -> Result<Vec<MonthlyRollup>, EngineError> {
        const OP: &str = "compile_period";
        let entity = period.canonical();
        self.bounded(&entity, OP, async {
            let sponsors = {
                let mut conn = self.repo.pool().acquire().await?;
                Repository::list_sponsors(&mut conn).await?
            };

            let tallies = sponsors.iter().map(|sponsor| async move {
                let mut conn = self.repo.pool().acquire().await?;
                Self::tally(&mut conn, &sponsor.id, period).await
            });
            let rollups: Vec<MonthlyRollup> = try_join_all(tallies).await?;

            let mut tx = self.repo.begin().await?;
            for rollup in &rollups {
                Repository::upsert_rollup(&mut *tx, rollup).await?;
            }
            tx.commit().await?;

            info!(period = %period, sponsors = rollups.len(), "Rollups compiled");
            Ok(rollups)
        })
        .await
    }

    /// Stored rollup for a sponsor, preferring the canonical period key.
    pub async fn lookup(
        &self,
        sponsor_id: &ParticipantId,
        period: YearMonth,
    ) -> Result<MonthlyRollup, EngineError> {
        const OP: &str = "get_rollup";
        self.bounded(sponsor_id.as_str(), OP, async {
            let mut conn = self.repo.pool().acquire().await?;
            Repository::get_rollup(&mut conn, sponsor_id, period)
                .await?
                .ok_or_else(|| EngineError::not_found(format!("{sponsor_id}/{period}"), OP))
        })
        .await
    }

    pub async fn list(&self, period: YearMonth) -> Result<Vec<MonthlyRollup>, EngineError> {
        const OP: &str = "list_rollups";
        self.bounded(&period.canonical(), OP, async {
            let mut conn = self.repo.pool().acquire().await?;
            Ok(Repository::rollups_for_period(&mut conn, period).await?)
        })
        .await
    }

    pub async fn export_csv(&self, period: YearMonth) -> Result<String, RollupError> {
        let rollups = self.list(period).await?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([
                "sponsor_id",
                "period",
                "subordinate_sales",
                "subordinate_commission",
                "self_shop_sales",
                "self_shop_commission",
                "device_units_net",
                "device_commission",
                "total_commission",
                "computed_at",
            ])
            .map_err(|e| RollupError::Csv(e.to_string()))?;

        for r in &rollups {
            writer
                .write_record([
                    r.sponsor_id.to_string(),
                    r.period.canonical(),
                    r.subordinate_sales.to_canonical_string(),
                    r.subordinate_commission.to_canonical_string(),
                    r.self_shop_sales.to_canonical_string(),
                    r.self_shop_commission.to_canonical_string(),
                    r.device_units_net.to_string(),
                    r.device_commission.to_canonical_string(),
                    r.total_commission.to_canonical_string(),
                    r.computed_at.to_rfc3339(),
                ])
                .map_err(|e| RollupError::Csv(e.to_string()))?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| RollupError::Csv(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| RollupError::Csv(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RecordId, Tier};

    fn figures(total: i64, commission: i64, self_shop: bool) -> OrderFigures {
        OrderFigures {
            shop_id: ParticipantId::new("shop-1"),
            total_amount: Decimal::from_i64(total),
            commission_amount: Decimal::from_i64(commission),
            is_self_shop_order: self_shop,
        }
    }

    fn device(quantity: i64, actual: i64) -> DeviceSale {
        DeviceSale {
            id: RecordId::generate(),
            shop_id: ParticipantId::new("shop-1"),
            sponsor_id: ParticipantId::new("kol-a"),
            sale_date: "2025-05-02".parse().unwrap(),
            quantity,
            device_name: "microjet".to_string(),
            serial_numbers: vec![],
            tier_at_sale: Tier::Tier1To4,
            standard_commission: Decimal::from_i64(actual).abs(),
            actual_commission: Decimal::from_i64(actual),
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_fold_splits_self_shop_and_nets_returns() {
        let rollup = fold_rollup(
            ParticipantId::new("kol-a"),
            YearMonth::new(2025, 5).unwrap(),
            &[figures(1_000, 300, false), figures(500, 100, true)],
            &[device(3, 4_500_000), device(-1, -1_500_000)],
        )
        .unwrap();

        assert_eq!(rollup.subordinate_sales, Decimal::from_i64(1_000));
        assert_eq!(rollup.self_shop_commission, Decimal::from_i64(100));
        assert_eq!(rollup.device_units_net, 2);
        assert_eq!(rollup.device_commission, Decimal::from_i64(3_000_000));
        assert_eq!(rollup.total_commission, Decimal::from_i64(3_000_400));
    }

    #[test]
    fn test_fold_of_nothing_is_empty() {
        let rollup = fold_rollup(
            ParticipantId::new("kol-a"),
            YearMonth::new(2025, 5).unwrap(),
            &[],
            &[],
        )
        .unwrap();
        assert!(rollup.is_empty());
    }

    #[test]
    fn test_fold_overflow_is_none() {
        let mut huge = figures(0, 0, false);
        huge.total_amount = Decimal::from_str_canonical("70000000000000000000000000000").unwrap();
        let rollup = fold_rollup(
            ParticipantId::new("kol-a"),
            YearMonth::new(2025, 5).unwrap(),
            &[huge.clone(), huge],
            &[],
        );
        assert!(rollup.is_none());
    }
}
