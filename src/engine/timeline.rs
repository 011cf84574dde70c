//! Interval index over one shop's relationship history, queried by point containment.

use crate::domain::{Day, ParticipantId, RecordId, ShopRelationship};
use thiserror::Error;

/// Two or more relationships claim the same shop at the same time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("shop {shop_id} has conflicting relationships {ids:?}: {detail}")]
pub struct TimelineConflict {
    pub shop_id: ParticipantId,
    pub ids: Vec<RecordId>,
    pub detail: String,
}

/// A shop's relationships sorted by `started_at`.
#[derive(Debug, Clone)]
pub struct RelationshipTimeline {
    shop_id: ParticipantId,
    intervals: Vec<ShopRelationship>,
}

impl RelationshipTimeline {
    pub fn new(shop_id: ParticipantId, mut intervals: Vec<ShopRelationship>) -> Self {
        intervals.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        Self { shop_id, intervals }
    }

    pub fn intervals(&self) -> &[ShopRelationship] {
        &self.intervals
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The relationship whose interval contains `day`, if any.
    ///
    /// More than one match is an integrity violation and is never resolved by picking one.
    pub fn at(&self, day: Day) -> Result<Option<&ShopRelationship>, TimelineConflict> {
        // Only intervals starting on or before `day` can contain it.
        let upper = self.intervals.partition_point(|r| r.started_at <= day);
        let matches: Vec<&ShopRelationship> = self.intervals[..upper]
            .iter()
            .filter(|r| r.contains(day))
            .collect();

        match matches.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            many => Err(TimelineConflict {
                shop_id: self.shop_id.clone(),
                ids: many.iter().map(|r| r.id.clone()).collect(),
                detail: format!("{} intervals contain {}", many.len(), day),
            }),
        }
    }

    /// The row flagged `is_active`, if any.
    pub fn active(&self) -> Result<Option<&ShopRelationship>, TimelineConflict> {
        let active: Vec<&ShopRelationship> =
            self.intervals.iter().filter(|r| r.is_active).collect();
        match active.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            many => Err(TimelineConflict {
                shop_id: self.shop_id.clone(),
                ids: many.iter().map(|r| r.id.clone()).collect(),
                detail: format!("{} active relationships", many.len()),
            }),
        }
    }

    /// Check the shop-level invariants: at most one active row, no overlapping intervals,
    /// and no active row with an end date.
    pub fn validate(&self) -> Result<(), TimelineConflict> {
        self.active()?;

        for pair in self.intervals.windows(2) {
            if pair[0].overlaps(&pair[1]) {
                return Err(TimelineConflict {
                    shop_id: self.shop_id.clone(),
                    ids: vec![pair[0].id.clone(), pair[1].id.clone()],
                    detail: "overlapping validity intervals".to_string(),
                });
            }
        }

        if let Some(bad) = self
            .intervals
            .iter()
            .find(|r| r.is_active && r.ended_at.is_some())
        {
            return Err(TimelineConflict {
                shop_id: self.shop_id.clone(),
                ids: vec![bad.id.clone()],
                detail: "active relationship carries an end date".to_string(),
            });
        }

        Ok(())
    }

    /// Latest day already claimed by history. A successor must start strictly after it.
    ///
    /// For an open interval that is its start day, since it is closed the day before its successor.
    pub fn last_claimed_day(&self) -> Option<Day> {
        self.intervals
            .iter()
            .map(|r| match r.ended_at {
                Some(end) => end,
                None => r.started_at,
            })
            .max()
    }
}
