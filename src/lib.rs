pub mod api;
pub mod compile;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use compile::RollupCompiler;
pub use config::Config;
pub use db::{init_db, init_db_with_timeout, Repository};
pub use domain::{
    CommissionStatus, Day, Decimal, DeviceSale, MonthlyRollup, Order, Participant, ParticipantId,
    RecordId, Role, ShopRelationship, Tier, YearMonth,
};
pub use error::{AppError, EngineError};
pub use orchestration::Ledger;
