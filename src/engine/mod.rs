//! Pure computation engine(s) for commission and incentive logic.
//!
//! Nothing in here touches the database; the orchestration layer loads rows,
//! feeds them through these types, and writes the results back in one transaction.

pub mod commission;
pub mod locks;
pub mod ratio;
pub mod tier;
pub mod timeline;

pub use commission::{CommissionCalculator, CommissionPolicy, CommissionQuote};
pub use locks::{SponsorGuard, SponsorLocks};
pub use ratio::{cohort_checksum, rebalance_ratios, RATIO_SCALE};
pub use tier::{AccumulatorShift, DeviceAccumulator, TierPricing, TierProjection, TierSchedule};
pub use timeline::{RelationshipTimeline, TimelineConflict};
