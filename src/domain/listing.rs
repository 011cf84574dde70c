//! Filters for listing orders and device sales.

use crate::domain::{Day, ParticipantId};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIST_LIMIT: u32 = 20;
pub const MAX_LIST_LIMIT: u32 = 500;

/// Optional sponsor, shop and inclusive date-range constraints, newest rows first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub sponsor_id: Option<ParticipantId>,
    #[serde(default)]
    pub shop_id: Option<ParticipantId>,
    #[serde(default)]
    pub from: Option<Day>,
    #[serde(default)]
    pub to: Option<Day>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl ListFilter {
    /// Requested limit, defaulted and held within `1..=MAX_LIST_LIMIT`.
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }

    /// False when both bounds are set and `from` is after `to`.
    pub fn has_valid_range(&self) -> bool {
        match (self.from, self.to) {
            (Some(from), Some(to)) => from <= to,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults_and_clamps() {
        assert_eq!(ListFilter::default().effective_limit(), DEFAULT_LIST_LIMIT);
        let huge = ListFilter {
            limit: Some(10_000),
            ..ListFilter::default()
        };
        assert_eq!(huge.effective_limit(), MAX_LIST_LIMIT);
        let zero = ListFilter {
            limit: Some(0),
            ..ListFilter::default()
        };
        assert_eq!(zero.effective_limit(), 1);
    }

    #[test]
    fn test_reversed_range_is_invalid() {
        let filter = ListFilter {
            from: "2024-05-02".parse().ok(),
            to: "2024-05-01".parse().ok(),
            ..ListFilter::default()
        };
        assert!(!filter.has_valid_range());
        assert!(ListFilter::default().has_valid_range());
    }
}
