//! Ratio cohorts: admin product metrics, cohort-wide rebalance and checksum verification.

use super::Ledger;
use crate::db::Repository;
use crate::domain::{
    CohortKey, Decimal, ProductMetricRequest, RatioRecord, RatioTable, RecordId, MAX_QUANTITY,
};
use crate::engine::{cohort_checksum, rebalance_ratios};
use crate::error::EngineError;
use serde::Serialize;
use sqlx::sqlite::SqliteConnection;
use tracing::{debug, warn};

/// Result of rewriting one cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebalanceOutcome {
    pub key: CohortKey,
    pub total: Decimal,
    pub version: i64,
    pub checksum: String,
    pub rows: Vec<RatioRecord>,
}

/// Comparison of a cohort's stored rows against its last recorded rebalance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CohortVerification {
    pub key: CohortKey,
    pub version: Option<i64>,
    pub stored_checksum: Option<String>,
    pub actual_checksum: String,
    /// Stored ratios equal a fresh rebalance of the stored amounts.
    pub ratios_current: bool,
    pub consistent: bool,
}

/// Checks the request and returns its amount.
fn validate_metric(
    request: &ProductMetricRequest,
    operation: &'static str,
) -> Result<Decimal, EngineError> {
    if request.product_id.trim().is_empty() {
        return Err(EngineError::validation(&request.sponsor_id, operation, "product_id is required"));
    }
    if request.quantity < 0 {
        return Err(EngineError::validation(
            &request.sponsor_id,
            operation,
            format!("quantity must not be negative, got {}", request.quantity),
        ));
    }
    if request.quantity > MAX_QUANTITY {
        return Err(EngineError::validation(
            &request.sponsor_id,
            operation,
            format!("quantity exceeds {}", MAX_QUANTITY),
        ));
    }
    if request.unit_price.is_negative() {
        return Err(EngineError::validation(
            &request.sponsor_id,
            operation,
            "unit price must not be negative",
        ));
    }
    match request.amount() {
        Some(amount) if amount <= Decimal::max_amount() => Ok(amount),
        _ => Err(EngineError::validation(
            &request.sponsor_id,
            operation,
            format!("amount exceeds {}", Decimal::max_amount()),
        )),
    }
}

impl Ledger {
    /// Recompute and rewrite every sibling row of a cohort inside the caller's transaction.
    pub(crate) async fn rebalance_in(
        conn: &mut SqliteConnection,
        key: &CohortKey,
    ) -> Result<RebalanceOutcome, EngineError> {
        let rekeyed = Repository::canonicalize_cohort(&mut *conn, key).await?;
        if rekeyed > 0 {
            warn!(cohort = %key, rows = rekeyed, "Compact-period rows moved to the canonical period");
        }
        let mut rows = Repository::cohort_rows(conn, key).await?;
        let total = rebalance_ratios(&mut rows);
        Repository::write_ratios(conn, key.table, &rows).await?;

        let checksum = cohort_checksum(&rows);
        let version = Repository::bump_cohort_version(conn, key, &checksum).await?;
        debug!(cohort = %key, rows = rows.len(), total = %total, version, "Cohort rebalanced");

        Ok(RebalanceOutcome {
            key: key.clone(),
            total,
            version,
            checksum,
            rows,
        })
    }

    /// Rebalance a cohort on its own. Safe to re-run at any time.
    pub async fn rebalance(&self, key: &CohortKey) -> Result<RebalanceOutcome, EngineError> {
        const OP: &str = "rebalance_cohort";
        let entity = key.to_string();
        self.with_retry(&entity, OP, || {
            self.bounded(&entity, OP, async {
                let mut tx = self.repo.begin().await?;
                let outcome = Self::rebalance_in(&mut *tx, key).await?;
                tx.commit().await?;
                Ok(outcome)
            })
        })
        .await
    }

    pub async fn cohort(&self, key: &CohortKey) -> Result<Vec<RatioRecord>, EngineError> {
        const OP: &str = "get_cohort";
        let entity = key.to_string();
        self.bounded(&entity, OP, async {
            let mut conn = self.repo.pool().acquire().await?;
            Ok(Repository::cohort_rows(&mut conn, key).await?)
        })
        .await
    }

    /// Detect a cohort left partly applied or edited outside a rebalance.
    pub async fn verify_cohort(&self, key: &CohortKey) -> Result<CohortVerification, EngineError> {
        const OP: &str = "verify_cohort";
        let entity = key.to_string();
        self.bounded(&entity, OP, async {
            let mut tx = self.repo.begin().await?;
            let rows = Repository::cohort_rows(&mut *tx, key).await?;
            let stored = Repository::get_cohort_version(&mut *tx, key).await?;
            tx.commit().await?;

            let actual_checksum = cohort_checksum(&rows);
            let mut fresh = rows.clone();
            rebalance_ratios(&mut fresh);
            let ratios_current = fresh == rows;

            let checksum_matches = match &stored {
                Some(version) => version.checksum == actual_checksum,
                None => rows.is_empty(),
            };
            let consistent = checksum_matches && ratios_current;
            if !consistent {
                warn!(cohort = %key, ratios_current, checksum_matches, "Cohort needs a rebalance");
            }

            Ok(CohortVerification {
                key: key.clone(),
                version: stored.as_ref().map(|v| v.version),
                stored_checksum: stored.map(|v| v.checksum),
                actual_checksum,
                ratios_current,
                consistent,
            })
        })
        .await
    }

    pub async fn create_product_metric(
        &self,
        request: ProductMetricRequest,
    ) -> Result<RebalanceOutcome, EngineError> {
        const OP: &str = "create_product_metric";
        let amount = validate_metric(&request, OP)?;
        let entity = request.sponsor_id.to_string();

        self.with_retry(&entity, OP, || {
            self.bounded(&entity, OP, async {
                let mut tx = self.repo.begin().await?;
                let sponsor = Self::require_participant(&mut *tx, &request.sponsor_id, OP).await?;
                if !sponsor.role.is_sponsor() {
                    return Err(EngineError::invalid_reference(
                        &sponsor.id,
                        OP,
                        "product metrics belong to a kol or ol",
                    ));
                }

                let record = RatioRecord {
                    id: RecordId::generate(),
                    entity_id: request.sponsor_id.clone(),
                    period: request.period,
                    item_id: request.product_id.clone(),
                    quantity: Some(request.quantity),
                    amount,
                    ratio: Decimal::zero(),
                };
                Repository::insert_ratio_row(&mut *tx, RatioTable::ProductSales, &record).await?;

                let key = CohortKey::new(RatioTable::ProductSales, record.entity_id, record.period);
                let outcome = Self::rebalance_in(&mut *tx, &key).await?;
                tx.commit().await?;
                Ok(outcome)
            })
        })
        .await
    }

    /// Change a metric's quantity or price. Moving it to another sponsor, product or month
    /// is a delete plus a create.
    pub async fn update_product_metric(
        &self,
        id: &RecordId,
        request: ProductMetricRequest,
    ) -> Result<RebalanceOutcome, EngineError> {
        const OP: &str = "update_product_metric";
        let amount = validate_metric(&request, OP)?;

        self.with_retry(id.as_str(), OP, || {
            self.bounded(id.as_str(), OP, async {
                let mut tx = self.repo.begin().await?;
                let existing = Repository::get_ratio_row(&mut *tx, RatioTable::ProductSales, id)
                    .await?
                    .ok_or_else(|| EngineError::not_found(id, OP))?;
                if existing.entity_id != request.sponsor_id
                    || existing.period != request.period
                    || existing.item_id != request.product_id
                {
                    return Err(EngineError::validation(
                        id,
                        OP,
                        "sponsor, product and period are fixed once recorded",
                    ));
                }

                Repository::update_ratio_amount(
                    &mut *tx,
                    RatioTable::ProductSales,
                    id,
                    Some(request.quantity),
                    amount,
                )
                .await?;

                let key = CohortKey::new(RatioTable::ProductSales, existing.entity_id, existing.period);
                let outcome = Self::rebalance_in(&mut *tx, &key).await?;
                tx.commit().await?;
                Ok(outcome)
            })
        })
        .await
    }

    pub async fn delete_product_metric(&self, id: &RecordId) -> Result<RebalanceOutcome, EngineError> {
        const OP: &str = "delete_product_metric";
        self.with_retry(id.as_str(), OP, || {
            self.bounded(id.as_str(), OP, async {
                let mut tx = self.repo.begin().await?;
                let existing = Repository::get_ratio_row(&mut *tx, RatioTable::ProductSales, id)
                    .await?
                    .ok_or_else(|| EngineError::not_found(id, OP))?;
                Repository::delete_ratio_row(&mut *tx, RatioTable::ProductSales, id).await?;

                let key = CohortKey::new(RatioTable::ProductSales, existing.entity_id, existing.period);
                let outcome = Self::rebalance_in(&mut *tx, &key).await?;
                tx.commit().await?;
                Ok(outcome)
            })
        })
        .await
    }
}
