//! Shop-to-sponsor relationships with inclusive validity intervals.

use crate::domain::{Day, ParticipantId, RecordId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipKind {
    /// First assignment of a shop.
    Direct,
    /// Reassignment away from a previous sponsor.
    Transferred,
    Temporary,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::Direct => "direct",
            RelationshipKind::Transferred => "transferred",
            RelationshipKind::Temporary => "temporary",
        }
    }
}

impl FromStr for RelationshipKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(RelationshipKind::Direct),
            "transferred" => Ok(RelationshipKind::Transferred),
            "temporary" => Ok(RelationshipKind::Temporary),
            other => Err(format!("unknown relationship kind: {other}")),
        }
    }
}

/// One validity interval of a shop under a sponsor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopRelationship {
    pub id: RecordId,
    pub shop_id: ParticipantId,
    pub sponsor_id: ParticipantId,
    /// Inclusive.
    pub started_at: Day,
    /// Inclusive; None while still open.
    pub ended_at: Option<Day>,
    pub is_active: bool,
    pub kind: RelationshipKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ShopRelationship {
    /// Point containment on the inclusive interval.
    pub fn contains(&self, day: Day) -> bool {
        self.started_at <= day && self.ended_at.map_or(true, |end| end >= day)
    }

    /// Whether two intervals share at least one day.
    pub fn overlaps(&self, other: &ShopRelationship) -> bool {
        let self_end_ok = self.ended_at.map_or(true, |end| end >= other.started_at);
        let other_end_ok = other.ended_at.map_or(true, |end| end >= self.started_at);
        self_end_ok && other_end_ok
    }
}

/// Inbound reassignment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipRequest {
    pub shop_id: ParticipantId,
    pub new_sponsor_id: ParticipantId,
    pub effective_date: Day,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub kind: Option<RelationshipKind>,
}
