//! Background recompilation of recent rollups.

use super::RollupCompiler;
use crate::domain::{Day, YearMonth};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Recompile the month containing `today` and the month before it.
///
/// Failures are logged and returned as a count so one bad month does not stop the other.
pub async fn compile_recent(compiler: &RollupCompiler, today: Day) -> usize {
    let current = YearMonth::of(today);
    let mut failures = 0;

    for period in [current.previous(), current] {
        if let Err(e) = compiler.compile_period(period).await {
            failures += 1;
            warn!(period = %period, kind = e.kind(), error = %e, "Scheduled rollup failed");
        }
    }
    failures
}

/// Start the periodic rollup task. Returns `None` when `every` is zero.
pub fn spawn_rollup_scheduler(compiler: RollupCompiler, every: Duration) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        info!("Rollup scheduler disabled");
        return None;
    }

    info!(interval_secs = every.as_secs(), "Rollup scheduler started");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            compile_recent(&compiler, Day::today()).await;
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{init_db, Repository};
    use crate::domain::{Participant, ParticipantId, Role};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (RollupCompiler, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();
        let pool = init_db(&db_path).await.unwrap();
        let repo = Arc::new(Repository::new(pool));
        let config = Config::for_database(db_path);
        (RollupCompiler::new(repo.clone(), config.db_timeout()), repo, temp_dir)
    }

    #[tokio::test]
    async fn test_compile_recent_covers_two_months() {
        let (compiler, repo, _temp) = setup().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        Repository::insert_participant(
            &mut conn,
            &Participant::new(ParticipantId::new("kol-a"), "Kim", Role::Kol),
        )
        .await
        .unwrap();
        drop(conn);

        let failures = compile_recent(&compiler, "2025-01-15".parse().unwrap()).await;
        assert_eq!(failures, 0);

        let december = compiler.list(YearMonth::new(2024, 12).unwrap()).await.unwrap();
        let january = compiler.list(YearMonth::new(2025, 1).unwrap()).await.unwrap();
        assert_eq!(december.len(), 1);
        assert_eq!(january.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_disables_scheduler() {
        let (compiler, _repo, _temp) = setup().await;
        assert!(spawn_rollup_scheduler(compiler, Duration::ZERO).is_none());
    }
}
