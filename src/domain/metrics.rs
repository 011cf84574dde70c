//! Ratio records: sibling rows whose shares of a cohort total must sum to 100.

use crate::domain::{Decimal, ParticipantId, RecordId, YearMonth};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which ratio table a cohort lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioTable {
    /// Admin-entered product sales per sponsor and month.
    ProductSales,
    /// Order-derived sales per shop under a sponsor and month.
    ShopSales,
}

impl RatioTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            RatioTable::ProductSales => "product_sales_metrics",
            RatioTable::ShopSales => "shop_sales_metrics",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RatioTable::ProductSales => "product_sales",
            RatioTable::ShopSales => "shop_sales",
        }
    }
}

impl FromStr for RatioTable {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product_sales" => Ok(RatioTable::ProductSales),
            "shop_sales" => Ok(RatioTable::ShopSales),
            other => Err(format!("unknown ratio table: {other}")),
        }
    }
}

/// Identifies an (entity, period) cohort inside one ratio table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CohortKey {
    pub table: RatioTable,
    pub entity_id: ParticipantId,
    pub period: YearMonth,
}

impl CohortKey {
    pub fn new(table: RatioTable, entity_id: ParticipantId, period: YearMonth) -> Self {
        CohortKey {
            table,
            entity_id,
            period,
        }
    }
}

impl fmt::Display for CohortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.table.as_str(), self.entity_id, self.period)
    }
}

/// One sibling row of a cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioRecord {
    pub id: RecordId,
    pub entity_id: ParticipantId,
    pub period: YearMonth,
    /// Product id or shop id depending on the table.
    pub item_id: String,
    pub quantity: Option<i64>,
    pub amount: Decimal,
    /// Percent share of the cohort total.
    pub ratio: Decimal,
}

/// Inbound admin mutation for product sales metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductMetricRequest {
    pub sponsor_id: ParticipantId,
    pub product_id: String,
    pub period: YearMonth,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl ProductMetricRequest {
    /// `quantity × unit_price`, `None` on overflow.
    pub fn amount(&self) -> Option<Decimal> {
        Decimal::from_i64(self.quantity).checked_mul(self.unit_price)
    }
}
