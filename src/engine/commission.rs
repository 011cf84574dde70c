//! Commission rate resolution and amount rounding.

use crate::domain::{Decimal, Participant, ParticipantId, Role};

/// Role-default rates and the currency's minor unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionPolicy {
    pub kol_rate: Decimal,
    pub ol_rate: Decimal,
    /// Decimal places of the currency's minor unit (0 for KRW).
    pub currency_scale: u32,
}

impl Default for CommissionPolicy {
    fn default() -> Self {
        Self {
            kol_rate: Decimal::from_i64(30),
            ol_rate: Decimal::from_i64(20),
            currency_scale: 0,
        }
    }
}

impl CommissionPolicy {
    pub fn default_rate(&self, role: Role) -> Decimal {
        match role {
            Role::Kol => self.kol_rate,
            Role::Ol => self.ol_rate,
            Role::Shop => Decimal::zero(),
        }
    }

    /// Rate earned on a subordinate shop's order.
    pub fn sponsor_rate(&self, sponsor: &Participant) -> Decimal {
        sponsor
            .commission_rate
            .unwrap_or_else(|| self.default_rate(sponsor.role))
    }

    /// Rate earned on the sponsor's own outlet.
    pub fn self_shop_rate(&self, sponsor: &Participant) -> Decimal {
        sponsor
            .self_shop_rate
            .unwrap_or_else(|| self.default_rate(sponsor.role))
    }

    /// `round_half_up(total × rate / 100)`, never negative. `None` on overflow.
    pub fn amount(&self, total: Decimal, rate: Decimal) -> Option<Decimal> {
        let raw = total.percent(rate)?;
        Some(raw.round_half_up(self.currency_scale).non_negative())
    }
}

/// A resolved rate/amount pair and the sponsor it is owed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionQuote {
    pub sponsor_id: Option<ParticipantId>,
    pub rate: Decimal,
    pub amount: Decimal,
}

impl CommissionQuote {
    pub fn unsponsored() -> Self {
        Self {
            sponsor_id: None,
            rate: Decimal::zero(),
            amount: Decimal::zero(),
        }
    }
}

/// Prices orders once the sponsor has been resolved.
#[derive(Debug, Clone, Default)]
pub struct CommissionCalculator {
    policy: CommissionPolicy,
}

impl CommissionCalculator {
    pub fn new(policy: CommissionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CommissionPolicy {
        &self.policy
    }

    /// Order placed through the sponsor's own outlet.
    pub fn quote_self_shop(&self, owner: &Participant, total: Decimal) -> Option<CommissionQuote> {
        let rate = self.policy.self_shop_rate(owner);
        Some(CommissionQuote {
            sponsor_id: Some(owner.id.clone()),
            rate,
            amount: self.policy.amount(total, rate)?,
        })
    }

    /// Order placed by a subordinate shop; `sponsor` is whoever was valid on the order date.
    ///
    /// Every quote returns `None` only when the amount overflows.
    pub fn quote_sponsored(
        &self,
        sponsor: Option<&Participant>,
        total: Decimal,
    ) -> Option<CommissionQuote> {
        match sponsor {
            Some(sponsor) => {
                let rate = self.policy.sponsor_rate(sponsor);
                Some(CommissionQuote {
                    sponsor_id: Some(sponsor.id.clone()),
                    rate,
                    amount: self.policy.amount(total, rate)?,
                })
            }
            None => Some(CommissionQuote::unsponsored()),
        }
    }

    /// Reapply a previously resolved rate to a new total.
    pub fn requote(
        &self,
        sponsor_id: Option<ParticipantId>,
        rate: Decimal,
        total: Decimal,
    ) -> Option<CommissionQuote> {
        Some(CommissionQuote {
            sponsor_id,
            rate,
            amount: self.policy.amount(total, rate)?,
        })
    }
}
