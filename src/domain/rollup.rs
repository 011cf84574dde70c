//! Monthly reporting rows.

use crate::domain::{Decimal, ParticipantId, YearMonth};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sponsor's commission summary for a month. Always keyed by the canonical period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyRollup {
    pub sponsor_id: ParticipantId,
    pub period: YearMonth,
    pub subordinate_sales: Decimal,
    pub subordinate_commission: Decimal,
    pub self_shop_sales: Decimal,
    pub self_shop_commission: Decimal,
    pub device_units_net: i64,
    pub device_commission: Decimal,
    pub total_commission: Decimal,
    pub computed_at: DateTime<Utc>,
}

impl MonthlyRollup {
    pub fn empty(sponsor_id: ParticipantId, period: YearMonth) -> Self {
        Self {
            sponsor_id,
            period,
            subordinate_sales: Decimal::zero(),
            subordinate_commission: Decimal::zero(),
            self_shop_sales: Decimal::zero(),
            self_shop_commission: Decimal::zero(),
            device_units_net: 0,
            device_commission: Decimal::zero(),
            total_commission: Decimal::zero(),
            computed_at: Utc::now(),
        }
    }

    /// Nothing was sold, returned or earned.
    pub fn is_empty(&self) -> bool {
        self.subordinate_sales.is_zero()
            && self.self_shop_sales.is_zero()
            && self.device_units_net == 0
            && self.device_commission.is_zero()
            && self.total_commission.is_zero()
    }
}
