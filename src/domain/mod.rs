//! Domain types for the commission and incentive engine.
//!
//! This module provides:
//! - Lossless money handling via the Decimal wrapper
//! - Domain primitives: Day, ParticipantId, RecordId
//! - Canonical year-month periods with legacy compact parsing
//! - Participants, relationships, orders, device sales, ratio records and rollups
//! - List filters for orders and device sales

pub mod decimal;
pub mod device;
pub mod listing;
pub mod metrics;
pub mod order;
pub mod participant;
pub mod period;
pub mod primitives;
pub mod relationship;
pub mod rollup;

pub use decimal::{Decimal, MAX_AMOUNT_UNITS, MAX_QUANTITY};
pub use device::{
    DeviceAccumulatorSnapshot, DeviceSale, DeviceSaleRequest, DeviceStatistics, ShopDeviceTotals,
    Tier,
};
pub use listing::ListFilter;
pub use metrics::{CohortKey, ProductMetricRequest, RatioRecord, RatioTable};
pub use order::{CommissionStatus, LineItem, Order, OrderRequest};
pub use participant::{Participant, Role};
pub use period::{PeriodParseError, YearMonth};
pub use primitives::{Day, DayParseError, ParticipantId, RecordId};
pub use relationship::{RelationshipKind, RelationshipRequest, ShopRelationship};
pub use rollup::MonthlyRollup;
