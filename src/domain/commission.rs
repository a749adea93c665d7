//! Commission ledger entries.

use crate::domain::{Decimal, EventId, NodeId, TimeMs};
use serde::{Deserialize, Serialize};

/// Compensation plan that produced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Binary,
    Stairstep,
    Leadership,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Binary => "binary",
            PlanType::Stairstep => "stairstep",
            PlanType::Leadership => "leadership",
        }
    }

    pub fn parse(s: &str) -> Option<PlanType> {
        match s {
            "binary" => Some(PlanType::Binary),
            "stairstep" => Some(PlanType::Stairstep),
            "leadership" => Some(PlanType::Leadership),
            _ => None,
        }
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only commission record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionEntry {
    /// Stable unique key; a second append with the same key is ignored.
    pub entry_key: String,
    pub event_id: EventId,
    pub recipient: NodeId,
    pub source: NodeId,
    pub plan: PlanType,
    /// Referral distance (stairstep) or compressed level (leadership).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<u32>,
    pub basis: Decimal,
    pub amount: Decimal,
    /// Portion credited against a deferred-payment balance instead of paid.
    pub withheld: Decimal,
    pub created_at: TimeMs,
}

impl CommissionEntry {
    /// Create an entry and derive its `entry_key`.
    ///
    /// `seq` disambiguates several entries of the same plan for the same
    /// recipient within one event (one per matched binary cycle).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: EventId,
        recipient: NodeId,
        source: NodeId,
        plan: PlanType,
        level: Option<u32>,
        seq: u32,
        basis: Decimal,
        amount: Decimal,
        created_at: TimeMs,
    ) -> Self {
        let entry_key = Self::compute_entry_key(&event_id, plan, &recipient, level, seq);
        Self {
            entry_key,
            event_id,
            recipient,
            source,
            plan,
            level,
            basis,
            amount,
            withheld: Decimal::zero(),
            created_at,
        }
    }

    /// Amount actually released to the recipient.
    pub fn payable(&self) -> Decimal {
        self.amount - self.withheld
    }

    /// SHA-256 over length-prefixed fields, truncated to 128 bits.
    pub fn compute_entry_key(
        event_id: &EventId,
        plan: PlanType,
        recipient: &NodeId,
        level: Option<u32>,
        seq: u32,
    ) -> String {
        use sha2::{Digest, Sha256};

        fn hash_var(hasher: &mut Sha256, data: &str) {
            hasher.update((data.len() as u64).to_le_bytes());
            hasher.update(data.as_bytes());
        }

        let mut hasher = Sha256::new();
        hash_var(&mut hasher, event_id.as_str());
        hash_var(&mut hasher, plan.as_str());
        hash_var(&mut hasher, recipient.as_str());
        match level {
            Some(l) => {
                hasher.update([1u8]);
                hasher.update(l.to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(seq.to_le_bytes());

        let digest = hasher.finalize();
        format!("ce_{}", hex::encode(&digest[..16]))
    }
}
