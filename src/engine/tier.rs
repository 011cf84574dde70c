//! Device tier accumulator.
//!
//! A sponsor's net device count selects the unit price for device incentives. The
//! accumulator is a cache over the sponsor's device-sale history and is driven only
//! through [`DeviceAccumulator::adjust`] (and its `apply` / `reverse` shorthands), so an
//! edit or deletion moves the counters by exactly the difference it introduces.
//!
//! Pricing is asymmetric: a sale is priced at the tier held *before* the units are
//! added, a return at the tier reached *after* the units come back.

use crate::domain::{Decimal, DeviceAccumulatorSnapshot, Tier};
use serde::Serialize;

/// Threshold and unit prices for the two incentive tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSchedule {
    /// Net units at which `tier_5_plus` starts.
    pub threshold: i64,
    pub tier_1_4_price: Decimal,
    pub tier_5_plus_price: Decimal,
}

impl Default for TierSchedule {
    fn default() -> Self {
        Self {
            threshold: 5,
            tier_1_4_price: Decimal::from_i64(1_500_000),
            tier_5_plus_price: Decimal::from_i64(2_500_000),
        }
    }
}

impl TierSchedule {
    pub fn tier_for(&self, net: i64) -> Tier {
        if net >= self.threshold {
            Tier::Tier5Plus
        } else {
            Tier::Tier1To4
        }
    }

    pub fn unit_price(&self, tier: Tier) -> Decimal {
        match tier {
            Tier::Tier1To4 => self.tier_1_4_price,
            Tier::Tier5Plus => self.tier_5_plus_price,
        }
    }
}

/// Tier and commission amounts applied to one device-sale transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPricing {
    pub tier: Tier,
    /// `|quantity| × unit_price(tier)`
    pub standard: Decimal,
    /// `standard` carrying the sign of the quantity.
    pub actual: Decimal,
}

impl TierPricing {
    /// Price `quantity` units at a fixed tier. `None` on overflow.
    pub fn at(schedule: &TierSchedule, tier: Tier, quantity: i64) -> Option<Self> {
        let standard =
            Decimal::from_i64(quantity.checked_abs()?).checked_mul(schedule.unit_price(tier))?;
        let actual = if quantity < 0 { -standard } else { standard };
        Some(Self {
            tier,
            standard,
            actual,
        })
    }
}

/// Outcome of moving the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulatorShift {
    pub previous_tier: Tier,
    pub tier: Tier,
    /// A counter would have gone negative and was held at zero.
    pub clamped: bool,
}

impl AccumulatorShift {
    pub fn tier_changed(&self) -> bool {
        self.previous_tier != self.tier
    }
}

/// Cumulative sold/returned counters for one sponsor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAccumulator {
    pub sold: i64,
    pub returned: i64,
    pub tier: Tier,
}

impl Default for DeviceAccumulator {
    fn default() -> Self {
        Self {
            sold: 0,
            returned: 0,
            tier: Tier::Tier1To4,
        }
    }
}

fn sold_part(quantity: i64) -> i64 {
    quantity.max(0)
}

fn returned_part(quantity: i64) -> i64 {
    (-quantity).max(0)
}

impl DeviceAccumulator {
    pub fn from_snapshot(snapshot: &DeviceAccumulatorSnapshot) -> Self {
        Self {
            sold: snapshot.total_devices_sold,
            returned: snapshot.total_devices_returned,
            tier: snapshot.current_tier,
        }
    }

    pub fn net(&self) -> i64 {
        self.sold - self.returned
    }

    /// Price a new transaction against the current counters without moving them.
    pub fn price(&self, schedule: &TierSchedule, quantity: i64) -> Option<TierPricing> {
        let tier = if quantity < 0 {
            schedule.tier_for(self.net().checked_add(quantity)?)
        } else {
            schedule.tier_for(self.net())
        };
        TierPricing::at(schedule, tier, quantity)
    }

    /// Record a new transaction.
    pub fn apply(&mut self, schedule: &TierSchedule, quantity: i64) -> AccumulatorShift {
        self.adjust(schedule, 0, quantity)
    }

    /// Remove a recorded transaction.
    pub fn reverse(&mut self, schedule: &TierSchedule, quantity: i64) -> AccumulatorShift {
        self.adjust(schedule, quantity, 0)
    }

    /// Move the counters by the difference between a recorded quantity and its replacement.
    pub fn adjust(&mut self, schedule: &TierSchedule, old: i64, new: i64) -> AccumulatorShift {
        let previous_tier = self.tier;
        let sold = self.sold + sold_part(new) - sold_part(old);
        let returned = self.returned + returned_part(new) - returned_part(old);
        let clamped = sold < 0 || returned < 0;

        self.sold = sold.max(0);
        self.returned = returned.max(0);
        self.tier = schedule.tier_for(self.net());

        AccumulatorShift {
            previous_tier,
            tier: self.tier,
            clamped,
        }
    }

    /// Rebuild the counters from a full quantity history.
    pub fn fold<I>(schedule: &TierSchedule, quantities: I) -> Self
    where
        I: IntoIterator<Item = i64>,
    {
        let (sold, returned) = quantities
            .into_iter()
            .fold((0i64, 0i64), |(sold, returned), q| {
                (sold + sold_part(q), returned + returned_part(q))
            });
        let net = sold - returned;
        Self {
            sold,
            returned,
            tier: schedule.tier_for(net),
        }
    }

    /// What adding `additional` units would do to the tier, without moving anything.
    pub fn project(&self, schedule: &TierSchedule, additional: i64) -> Option<TierProjection> {
        let current_net = self.net();
        let projected_net = current_net.checked_add(additional)?;
        let current_tier = schedule.tier_for(current_net);
        let projected_tier = schedule.tier_for(projected_net);
        let current_unit_price = schedule.unit_price(current_tier);
        let projected_unit_price = schedule.unit_price(projected_tier);

        let commission_difference = projected_unit_price
            .checked_sub(current_unit_price)?
            .checked_mul(Decimal::from_i64(additional.checked_abs()?))?;

        Some(TierProjection {
            current_net,
            current_tier,
            current_unit_price,
            projected_net,
            projected_tier,
            projected_unit_price,
            tier_changed: current_tier != projected_tier,
            commission_difference,
        })
    }
}

/// Read-only tier simulation for a hypothetical batch of units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierProjection {
    pub current_net: i64,
    pub current_tier: Tier,
    pub current_unit_price: Decimal,
    pub projected_net: i64,
    pub projected_tier: Tier,
    pub projected_unit_price: Decimal,
    pub tier_changed: bool,
    pub commission_difference: Decimal,
}
