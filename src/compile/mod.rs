//! Monthly rollup compilation.
//!
//! This module provides:
//! - Per-sponsor folding of orders and device sales into [`MonthlyRollup`](crate::domain::MonthlyRollup) rows
//! - Period-wide recompilation and CSV export
//! - A background scheduler that keeps the current and previous month fresh

pub mod rollup;
pub mod scheduler;

pub use rollup::{fold_rollup, RollupCompiler, RollupError};
pub use scheduler::spawn_rollup_scheduler;
