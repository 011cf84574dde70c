//! Participants of the referral network.

use crate::domain::{Decimal, ParticipantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network role. `Kol` is the top sponsor tier, `Ol` the second tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Kol,
    Ol,
    Shop,
}

impl Role {
    /// Only KOL/OL participants can sponsor shops or place self-shop orders.
    pub fn is_sponsor(&self) -> bool {
        matches!(self, Role::Kol | Role::Ol)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Kol => "kol",
            Role::Ol => "ol",
            Role::Shop => "shop",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kol" => Ok(Role::Kol),
            "ol" => Ok(Role::Ol),
            "shop" => Ok(Role::Shop),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sponsor or shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub role: Role,
    /// Per-sponsor override of the role-default commission rate (percent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commission_rate: Option<Decimal>,
    /// Per-sponsor override of the self-shop rate (percent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_shop_rate: Option<Decimal>,
}

impl Participant {
    pub fn new(id: ParticipantId, name: impl Into<String>, role: Role) -> Self {
        Participant {
            id,
            name: name.into(),
            role,
            commission_rate: None,
            self_shop_rate: None,
        }
    }

    pub fn with_commission_rate(mut self, rate: Decimal) -> Self {
        self.commission_rate = Some(rate);
        self
    }

    pub fn with_self_shop_rate(mut self, rate: Decimal) -> Self {
        self.self_shop_rate = Some(rate);
        self
    }
}
