//! Transactional orchestration of the commission engine.
//!
//! `Ledger` owns the repository and the pure engine pieces. Each public operation loads
//! what it needs, runs it through the engine and writes the result back inside one
//! transaction, bounded by the configured storage timeout and retried on concurrency
//! conflicts up to the configured budget.

pub mod devices;
pub mod orders;
pub mod ratios;
pub mod relationships;

pub use devices::{AccumulatorAudit, DeviceSaleOutcome};
pub use orders::{BulkStatusFailure, BulkStatusOutcome, MAX_BULK_ORDERS};
pub use ratios::{CohortVerification, RebalanceOutcome};

use crate::config::Config;
use crate::db::Repository;
use crate::engine::{CommissionCalculator, SponsorLocks, TierSchedule};
use crate::error::EngineError;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Clone)]
pub struct Ledger {
    repo: Arc<Repository>,
    calculator: CommissionCalculator,
    schedule: TierSchedule,
    locks: SponsorLocks,
    timeout: Duration,
    retry_limit: u32,
}

impl Ledger {
    pub fn new(repo: Arc<Repository>, config: &Config) -> Self {
        Self {
            repo,
            calculator: CommissionCalculator::new(config.commission_policy()),
            schedule: config.tier_schedule(),
            locks: SponsorLocks::new(),
            timeout: config.db_timeout(),
            retry_limit: config.conflict_retry_limit,
        }
    }

    pub fn repo(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn calculator(&self) -> &CommissionCalculator {
        &self.calculator
    }

    pub fn schedule(&self) -> &TierSchedule {
        &self.schedule
    }

    /// Run `work` under the storage timeout and attach context to bare storage errors.
    async fn bounded<T, F>(
        &self,
        entity: &str,
        operation: &'static str,
        work: F,
    ) -> Result<T, EngineError>
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

    /// Repeat `attempt` while it fails with a retryable error, at most `retry_limit` times.
    async fn with_retry<T, F, Fut>(
        &self,
        entity: &str,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(200),
            max_elapsed_time: Some(self.timeout),
            ..Default::default()
        };
        let limit = self.retry_limit;
        let mut attempts = 0u32;

        retry(policy, || {
            attempts += 1;
            let current = attempts;
            let fut = attempt();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_retryable() && current < limit => {
                        warn!(
                            entity = %entity,
                            operation,
                            attempt = current,
                            error = %e,
                            "Retrying after retryable failure"
                        );
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Ledger;
    use crate::config::Config;
    use crate::db::{init_db, Repository};
    use crate::domain::{Participant, ParticipantId, Role};
    use std::sync::Arc;
    use tempfile::TempDir;

    pub async fn setup_ledger() -> (Ledger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let config = Config::for_database(db_path);
        (Ledger::new(Arc::new(Repository::new(pool)), &config), temp_dir)
    }

    pub async fn register(ledger: &Ledger, id: &str, role: Role) -> Participant {
        ledger
            .register_participant(Participant::new(ParticipantId::new(id), id, role))
            .await
            .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::setup_ledger;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_conflicts_retried_up_to_limit() {
        let (ledger, _temp) = setup_ledger().await;
        let calls = AtomicU32::new(0);

        let result: Result<(), EngineError> = ledger
            .with_retry("kol-a", "record_device_sale", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::conflict("kol-a", "record_device_sale", "busy"))
            })
            .await;

        assert!(matches!(result, Err(EngineError::ConcurrencyConflict { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), ledger.retry_limit);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let (ledger, _temp) = setup_ledger().await;
        let calls = AtomicU32::new(0);

        let result: Result<(), EngineError> = ledger
            .with_retry("order-1", "delete_order", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(EngineError::validation("order-1", "delete_order", "bad"))
            })
            .await;

        assert!(matches!(result, Err(EngineError::Validation { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_bounded_reports_timeout() {
        let (mut ledger, _temp) = setup_ledger().await;
        ledger.timeout = Duration::from_millis(10);

        let result: Result<(), EngineError> = ledger
            .bounded("kol-a", "audit_accumulator", async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        match result {
            Err(EngineError::Timeout { after_ms, .. }) => assert_eq!(after_ms, 10),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
