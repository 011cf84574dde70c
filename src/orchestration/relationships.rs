//! Participant registry and the shop relationship lifecycle.

use super::Ledger;
use crate::db::Repository;
use crate::domain::{
    Day, Participant, ParticipantId, RecordId, RelationshipKind, RelationshipRequest, Role,
    ShopRelationship,
};
use crate::engine::RelationshipTimeline;
use crate::error::EngineError;
use sqlx::sqlite::SqliteConnection;
use tracing::{info, warn};

impl Ledger {
    /// Load a participant or fail with `InvalidReference`.
    pub(crate) async fn require_participant(
        conn: &mut SqliteConnection,
        id: &ParticipantId,
        operation: &'static str,
    ) -> Result<Participant, EngineError> {
        Repository::get_participant(conn, id)
            .await?
            .ok_or_else(|| EngineError::invalid_reference(id, operation, "participant does not exist"))
    }

    /// The relationship whose interval contains `day`, read inside the caller's transaction.
    ///
    /// Overlapping intervals are reported as an integrity violation, never resolved by picking one.
    pub(crate) async fn resolve_in(
        conn: &mut SqliteConnection,
        shop_id: &ParticipantId,
        day: Day,
        operation: &'static str,
    ) -> Result<Option<ShopRelationship>, EngineError> {
        let timeline =
            RelationshipTimeline::new(shop_id.clone(), Repository::shop_relationships(conn, shop_id).await?);

        match timeline.at(day) {
            Ok(found) => Ok(found.cloned()),
            Err(conflict) => {
                warn!(
                    shop_id = %shop_id,
                    day = %day,
                    ids = ?conflict.ids,
                    "Conflicting relationships during resolution"
                );
                Err(EngineError::integrity(shop_id, operation, conflict.to_string()))
            }
        }
    }

    pub async fn register_participant(
        &self,
        participant: Participant,
    ) -> Result<Participant, EngineError> {
        const OP: &str = "register_participant";
        let entity = participant.id.to_string();
        if participant.id.as_str().trim().is_empty() {
            return Err(EngineError::validation(&entity, OP, "id must not be empty"));
        }
        for rate in [participant.commission_rate, participant.self_shop_rate]
            .into_iter()
            .flatten()
        {
            if rate.is_negative() || rate > crate::domain::Decimal::hundred() {
                return Err(EngineError::validation(
                    &entity,
                    OP,
                    format!("rate {} outside 0..=100", rate),
                ));
            }
        }
        if participant.role == Role::Shop
            && (participant.commission_rate.is_some() || participant.self_shop_rate.is_some())
        {
            return Err(EngineError::validation(&entity, OP, "shops do not carry commission rates"));
        }

        self.with_retry(&entity, OP, || {
            self.bounded(&entity, OP, async {
                let mut tx = self.repo.begin().await?;
                if let Some(existing) = Repository::get_participant(&mut *tx, &participant.id).await? {
                    if existing.role != participant.role
                        && Repository::participant_references(&mut *tx, &participant.id).await? > 0
                    {
                        return Err(EngineError::validation(
                            &entity,
                            OP,
                            format!(
                                "role is fixed at {} once relationships, orders or device sales refer to it",
                                existing.role.as_str()
                            ),
                        ));
                    }
                }
                Repository::insert_participant(&mut *tx, &participant).await?;
                tx.commit().await?;
                Ok(participant.clone())
            })
        })
        .await
    }

    pub async fn participant(&self, id: &ParticipantId) -> Result<Participant, EngineError> {
        const OP: &str = "get_participant";
        self.bounded(id.as_str(), OP, async {
            let mut conn = self.repo.pool().acquire().await?;
            Repository::get_participant(&mut conn, id)
                .await?
                .ok_or_else(|| EngineError::not_found(id, OP))
        })
        .await
    }

    /// Sponsor responsible for `shop_id` on `day`, if any.
    pub async fn resolve(
        &self,
        shop_id: &ParticipantId,
        day: Day,
    ) -> Result<Option<ShopRelationship>, EngineError> {
        const OP: &str = "resolve_sponsor";
        self.bounded(shop_id.as_str(), OP, async {
            let mut conn = self.repo.pool().acquire().await?;
            Self::require_participant(&mut conn, shop_id, OP).await?;
            Self::resolve_in(&mut conn, shop_id, day, OP).await
        })
        .await
    }

    /// Move a shop to a new sponsor from `effective_date` on.
    ///
    /// The current interval is closed the day before and a new active one is opened, in
    /// one transaction.
    pub async fn reassign(
        &self,
        request: RelationshipRequest,
    ) -> Result<ShopRelationship, EngineError> {
        const OP: &str = "reassign_shop";
        let entity = request.shop_id.to_string();

        if request.shop_id == request.new_sponsor_id {
            return Err(EngineError::invalid_reference(
                &entity,
                OP,
                "a shop cannot be its own sponsor",
            ));
        }

        self.with_retry(&entity, OP, || {
            self.bounded(&entity, OP, self.reassign_once(&request))
        })
        .await
    }

    async fn reassign_once(
        &self,
        request: &RelationshipRequest,
    ) -> Result<ShopRelationship, EngineError> {
        const OP: &str = "reassign_shop";
        let shop_id = &request.shop_id;
        let mut tx = self.repo.begin().await?;

        let shop = Self::require_participant(&mut *tx, shop_id, OP).await?;
        if shop.role != Role::Shop {
            return Err(EngineError::invalid_reference(shop_id, OP, "participant is not a shop"));
        }
        let sponsor = Self::require_participant(&mut *tx, &request.new_sponsor_id, OP).await?;
        if !sponsor.role.is_sponsor() {
            return Err(EngineError::invalid_reference(
                &sponsor.id,
                OP,
                "only kol or ol participants can sponsor shops",
            ));
        }

        let timeline = RelationshipTimeline::new(
            shop_id.clone(),
            Repository::shop_relationships(&mut *tx, shop_id).await?,
        );
        timeline
            .validate()
            .map_err(|conflict| EngineError::integrity(shop_id, OP, conflict.to_string()))?;

        if let Some(last) = timeline.last_claimed_day() {
            if request.effective_date <= last {
                return Err(EngineError::validation(
                    shop_id,
                    OP,
                    format!(
                        "effective date {} must be after {}, the last day already covered",
                        request.effective_date, last
                    ),
                ));
            }
        }

        let active = timeline
            .active()
            .map_err(|conflict| EngineError::integrity(shop_id, OP, conflict.to_string()))?;
        if let Some(active) = active {
            if active.sponsor_id == request.new_sponsor_id {
                return Err(EngineError::validation(
                    shop_id,
                    OP,
                    format!("shop is already assigned to {}", active.sponsor_id),
                ));
            }
            let closed =
                Repository::close_relationship(&mut *tx, &active.id, request.effective_date.pred())
                    .await?;
            if !closed {
                return Err(EngineError::conflict(shop_id, OP, "active relationship changed underneath"));
            }
        }

        let kind = request.kind.unwrap_or(if timeline.is_empty() {
            RelationshipKind::Direct
        } else {
            RelationshipKind::Transferred
        });
        let relationship = ShopRelationship {
            id: RecordId::generate(),
            shop_id: shop_id.clone(),
            sponsor_id: request.new_sponsor_id.clone(),
            started_at: request.effective_date,
            ended_at: None,
            is_active: true,
            kind,
            reason: request.reason.clone(),
        };
        Repository::insert_relationship(&mut *tx, &relationship).await?;
        tx.commit().await?;

        info!(
            shop_id = %shop_id,
            sponsor_id = %relationship.sponsor_id,
            effective_date = %relationship.started_at,
            kind = relationship.kind.as_str(),
            "Shop reassigned"
        );
        Ok(relationship)
    }

    /// Close the shop's active relationship on `end_date` without a successor.
    pub async fn end_relationship(
        &self,
        shop_id: &ParticipantId,
        end_date: Day,
    ) -> Result<ShopRelationship, EngineError> {
        const OP: &str = "end_relationship";
        self.with_retry(shop_id.as_str(), OP, || {
            self.bounded(shop_id.as_str(), OP, async {
                let mut tx = self.repo.begin().await?;
                let timeline = RelationshipTimeline::new(
                    shop_id.clone(),
                    Repository::shop_relationships(&mut *tx, shop_id).await?,
                );
                let active = timeline
                    .active()
                    .map_err(|conflict| EngineError::integrity(shop_id, OP, conflict.to_string()))?
                    .cloned()
                    .ok_or_else(|| EngineError::not_found(shop_id, OP))?;

                if end_date < active.started_at {
                    return Err(EngineError::validation(
                        shop_id,
                        OP,
                        format!("end date {} precedes start {}", end_date, active.started_at),
                    ));
                }
                if !Repository::close_relationship(&mut *tx, &active.id, end_date).await? {
                    return Err(EngineError::conflict(shop_id, OP, "active relationship changed underneath"));
                }
                tx.commit().await?;

                info!(shop_id = %shop_id, sponsor_id = %active.sponsor_id, end_date = %end_date, "Relationship ended");
                Ok(ShopRelationship {
                    ended_at: Some(end_date),
                    is_active: false,
                    ..active
                })
            })
        })
        .await
    }

    /// Every interval for a shop, oldest first.
    pub async fn history(
        &self,
        shop_id: &ParticipantId,
    ) -> Result<Vec<ShopRelationship>, EngineError> {
        const OP: &str = "relationship_history";
        self.bounded(shop_id.as_str(), OP, async {
            let mut conn = self.repo.pool().acquire().await?;
            Self::require_participant(&mut conn, shop_id, OP).await?;
            Ok(Repository::shop_relationships(&mut conn, shop_id).await?)
        })
        .await
    }

    /// Shops under `sponsor_id` on `as_of`.
    pub async fn subordinates(
        &self,
        sponsor_id: &ParticipantId,
        as_of: Day,
    ) -> Result<Vec<ShopRelationship>, EngineError> {
        const OP: &str = "list_subordinates";
        self.bounded(sponsor_id.as_str(), OP, async {
            let mut conn = self.repo.pool().acquire().await?;
            Ok(Repository::sponsor_relationships_at(&mut conn, sponsor_id, as_of).await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{register, setup_ledger};
    use super::*;

    fn request(shop: &str, sponsor: &str, date: &str) -> RelationshipRequest {
        RelationshipRequest {
            shop_id: ParticipantId::new(shop),
            new_sponsor_id: ParticipantId::new(sponsor),
            effective_date: date.parse().unwrap(),
            reason: None,
            kind: None,
        }
    }

    async fn network(ledger: &Ledger) {
        register(ledger, "shop-1", Role::Shop).await;
        register(ledger, "kol-a", Role::Kol).await;
        register(ledger, "kol-b", Role::Kol).await;
    }

    #[tokio::test]
    async fn test_reassign_closes_previous_interval() {
        let (ledger, _temp) = setup_ledger().await;
        network(&ledger).await;

        let first = ledger.reassign(request("shop-1", "kol-a", "2024-01-01")).await.unwrap();
        assert_eq!(first.kind, RelationshipKind::Direct);
        let second = ledger.reassign(request("shop-1", "kol-b", "2024-07-01")).await.unwrap();
        assert_eq!(second.kind, RelationshipKind::Transferred);

        let history = ledger.history(&ParticipantId::new("shop-1")).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].ended_at, Some("2024-06-30".parse().unwrap()));
        assert!(!history[0].is_active);
        assert!(history[1].is_active);

        let march = ledger
            .resolve(&ParticipantId::new("shop-1"), "2024-03-15".parse().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(march.sponsor_id, ParticipantId::new("kol-a"));
    }

    #[tokio::test]
    async fn test_reassign_rejects_backdating_into_history() {
        let (ledger, _temp) = setup_ledger().await;
        network(&ledger).await;

        ledger.reassign(request("shop-1", "kol-a", "2024-01-01")).await.unwrap();
        ledger.reassign(request("shop-1", "kol-b", "2024-07-01")).await.unwrap();

        let err = ledger
            .reassign(request("shop-1", "kol-a", "2024-07-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_reassign_rejects_self_and_non_sponsor() {
        let (ledger, _temp) = setup_ledger().await;
        network(&ledger).await;
        register(&ledger, "shop-2", Role::Shop).await;

        let err = ledger
            .reassign(request("shop-1", "shop-1", "2024-01-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidReference { .. }));

        let err = ledger
            .reassign(request("shop-1", "shop-2", "2024-01-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidReference { .. }));

        let err = ledger
            .reassign(request("shop-1", "kol-zzz", "2024-01-01"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn test_end_relationship_leaves_shop_unsponsored() {
        let (ledger, _temp) = setup_ledger().await;
        network(&ledger).await;

        ledger.reassign(request("shop-1", "kol-a", "2024-01-01")).await.unwrap();
        let ended = ledger
            .end_relationship(&ParticipantId::new("shop-1"), "2024-03-31".parse().unwrap())
            .await
            .unwrap();
        assert!(!ended.is_active);

        let april = ledger
            .resolve(&ParticipantId::new("shop-1"), "2024-04-01".parse().unwrap())
            .await
            .unwrap();
        assert!(april.is_none());

        let subordinates = ledger
            .subordinates(&ParticipantId::new("kol-a"), "2024-02-01".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(subordinates.len(), 1);
    }

    #[tokio::test]
    async fn test_role_fixed_once_referenced() {
        let (ledger, _temp) = setup_ledger().await;
        network(&ledger).await;
        ledger.reassign(request("shop-1", "kol-a", "2024-01-01")).await.unwrap();

        let demoted = Participant::new(ParticipantId::new("kol-a"), "kol-a", Role::Shop);
        let err = ledger.register_participant(demoted).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
        let stored = ledger.participant(&ParticipantId::new("kol-a")).await.unwrap();
        assert_eq!(stored.role, Role::Kol);

        // Same role with a new name is a plain profile update.
        let renamed = Participant::new(ParticipantId::new("kol-a"), "Kim", Role::Kol);
        ledger.register_participant(renamed).await.unwrap();

        // Nobody points at kol-b yet, so its role may still change.
        let ol = Participant::new(ParticipantId::new("kol-b"), "kol-b", Role::Ol);
        assert_eq!(ledger.register_participant(ol).await.unwrap().role, Role::Ol);
    }
}
