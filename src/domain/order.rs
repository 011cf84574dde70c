//! Orders and their commission status.

use crate::domain::{Day, Decimal, ParticipantId, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Commission lifecycle of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommissionStatus {
    Calculated,
    Adjusted,
    Paid,
    Cancelled,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Calculated => "calculated",
            CommissionStatus::Adjusted => "adjusted",
            CommissionStatus::Paid => "paid",
            CommissionStatus::Cancelled => "cancelled",
        }
    }

    /// Paid commissions are never edited, deleted or moved.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommissionStatus::Paid)
    }

    pub fn can_transition_to(&self, next: CommissionStatus) -> bool {
        use CommissionStatus::*;
        match self {
            Calculated | Adjusted => matches!(next, Adjusted | Paid | Cancelled),
            Paid | Cancelled => false,
        }
    }
}

impl FromStr for CommissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calculated" => Ok(CommissionStatus::Calculated),
            "adjusted" => Ok(CommissionStatus::Adjusted),
            "paid" => Ok(CommissionStatus::Paid),
            "cancelled" => Ok(CommissionStatus::Cancelled),
            other => Err(format!("unknown commission status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub product_id: Option<String>,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl LineItem {
    /// `quantity × unit_price`, `None` on overflow.
    pub fn subtotal(&self) -> Option<Decimal> {
        Decimal::from_i64(self.quantity).checked_mul(self.unit_price)
    }
}

/// Inbound order mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub shop_id: ParticipantId,
    pub order_date: Day,
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    pub is_self_shop_order: bool,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

impl OrderRequest {
    /// Line items win over the submitted total when present. `None` on overflow.
    pub fn resolved_total(&self) -> Option<Decimal> {
        if self.line_items.is_empty() {
            Some(self.total_amount.unwrap_or_default())
        } else {
            self.line_items
                .iter()
                .try_fold(Decimal::zero(), |acc, item| acc.checked_add(item.subtotal()?))
        }
    }
}

/// A stored order with its resolved commission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: RecordId,
    pub shop_id: ParticipantId,
    pub order_date: Day,
    pub total_amount: Decimal,
    pub is_self_shop_order: bool,
    /// Sponsor the commission is attributed to, if any.
    pub sponsor_id: Option<ParticipantId>,
    pub commission_rate: Decimal,
    pub commission_amount: Decimal,
    pub commission_status: CommissionStatus,
    pub line_items: Vec<LineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
