//! Device sales and the per-sponsor accumulator snapshot.

use crate::domain::{Day, Decimal, ParticipantId, RecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

pub const DEFAULT_DEVICE_NAME: &str = "microjet";

/// Incentive tier determined by a sponsor's net device count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "tier_1_4")]
    Tier1To4,
    #[serde(rename = "tier_5_plus")]
    Tier5Plus,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Tier1To4 => "tier_1_4",
            Tier::Tier5Plus => "tier_5_plus",
        }
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tier_1_4" => Ok(Tier::Tier1To4),
            "tier_5_plus" => Ok(Tier::Tier5Plus),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Inbound device-sale mutation. Positive quantity is a sale, negative a return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSaleRequest {
    pub shop_id: ParticipantId,
    pub sale_date: Day,
    pub quantity: i64,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub serial_numbers: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSale {
    pub id: RecordId,
    pub shop_id: ParticipantId,
    pub sponsor_id: ParticipantId,
    pub sale_date: Day,
    pub quantity: i64,
    pub device_name: String,
    pub serial_numbers: Vec<String>,
    pub tier_at_sale: Tier,
    /// `|quantity| × unit price at tier_at_sale`.
    pub standard_commission: Decimal,
    /// Signed like `quantity`.
    pub actual_commission: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outbound view of a sponsor's accumulator row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAccumulatorSnapshot {
    pub sponsor_id: ParticipantId,
    pub total_devices_sold: i64,
    pub total_devices_returned: i64,
    pub current_tier: Tier,
    pub tier_changed_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl DeviceAccumulatorSnapshot {
    pub fn net_devices(&self) -> i64 {
        self.total_devices_sold - self.total_devices_returned
    }
}

/// Sold and returned units of one shop over a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShopDeviceTotals {
    pub shop_id: ParticipantId,
    pub sold: i64,
    pub returned: i64,
    pub commission: Decimal,
}

/// Device movement over an optional inclusive date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatistics {
    pub from: Option<Day>,
    pub to: Option<Day>,
    pub total_sold: i64,
    pub total_returned: i64,
    pub net: i64,
    pub total_commission: Decimal,
    /// Ordered by shop id.
    pub by_shop: Vec<ShopDeviceTotals>,
    /// Accumulators with the highest net counts, all time.
    pub top_sponsors: Vec<DeviceAccumulatorSnapshot>,
}

impl DeviceStatistics {
    /// Sum `sales`. `None` if a total overflows.
    pub fn fold(from: Option<Day>, to: Option<Day>, sales: &[DeviceSale]) -> Option<Self> {
        let mut shops: BTreeMap<&ParticipantId, ShopDeviceTotals> = BTreeMap::new();
        for sale in sales {
            let entry = shops.entry(&sale.shop_id).or_insert_with(|| ShopDeviceTotals {
                shop_id: sale.shop_id.clone(),
                sold: 0,
                returned: 0,
                commission: Decimal::zero(),
            });
            if sale.quantity > 0 {
                entry.sold = entry.sold.checked_add(sale.quantity)?;
            } else {
                entry.returned = entry.returned.checked_add(sale.quantity.checked_neg()?)?;
            }
            entry.commission = entry.commission.checked_add(sale.actual_commission)?;
        }

        let by_shop: Vec<ShopDeviceTotals> = shops.into_values().collect();
        let mut total_sold = 0i64;
        let mut total_returned = 0i64;
        for shop in &by_shop {
            total_sold = total_sold.checked_add(shop.sold)?;
            total_returned = total_returned.checked_add(shop.returned)?;
        }
        let total_commission = Decimal::checked_sum(by_shop.iter().map(|s| s.commission))?;

        Some(Self {
            from,
            to,
            total_sold,
            total_returned,
            net: total_sold.checked_sub(total_returned)?,
            total_commission,
            by_shop,
            top_sponsors: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sale(shop: &str, quantity: i64, commission: i64) -> DeviceSale {
        DeviceSale {
            id: RecordId::generate(),
            shop_id: ParticipantId::new(shop),
            sponsor_id: ParticipantId::new("kol-a"),
            sale_date: "2024-05-10".parse().unwrap(),
            quantity,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            serial_numbers: vec![],
            tier_at_sale: Tier::Tier1To4,
            standard_commission: Decimal::from_i64(commission).abs(),
            actual_commission: Decimal::from_i64(commission),
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_statistics_group_by_shop() {
        let stats = DeviceStatistics::fold(
            None,
            None,
            &[
                sale("shop-2", 3, 4_500_000),
                sale("shop-1", 2, 3_000_000),
                sale("shop-2", -1, -1_500_000),
            ],
        )
        .unwrap();

        assert_eq!((stats.total_sold, stats.total_returned, stats.net), (5, 1, 4));
        assert_eq!(stats.total_commission, Decimal::from_i64(6_000_000));
        let shops: Vec<(&str, i64, i64)> = stats
            .by_shop
            .iter()
            .map(|s| (s.shop_id.as_str(), s.sold, s.returned))
            .collect();
        assert_eq!(shops, vec![("shop-1", 2, 0), ("shop-2", 3, 1)]);
    }

    #[test]
    fn test_tier_serialization() {
        assert_eq!(
            serde_json::to_string(&Tier::Tier5Plus).unwrap(),
            "\"tier_5_plus\""
        );
        assert_eq!("tier_1_4".parse::<Tier>().unwrap(), Tier::Tier1To4);
    }
}
