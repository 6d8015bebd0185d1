use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Indivisible base units of marketplace value.
///
/// All custody math happens in base units; there is no fractional display
/// unit. Arithmetic is checked or saturating, never wrapping.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_units(units: u64) -> Self {
        Amount(units)
    }

    pub fn as_units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(&self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(&self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    pub fn saturating_add(&self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Fee share in basis points, truncated toward zero.
    pub fn bps(&self, bps: u32) -> Amount {
        Amount((self.0 as u128 * bps as u128 / 10_000) as u64)
    }

    /// Integer half, used for even dispute splits. The remainder unit, if
    /// any, stays with the caller to keep disbursements exact.
    pub fn half(&self) -> Amount {
        Amount(self.0 / 2)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, a| acc.saturating_add(a))
    }
}

/// Opaque 32-byte account identity.
///
/// External wallet identifiers are resolved to an `AccountId` by the caller;
/// inside the engine everything is keyed by this type. A handful of
/// well-known addresses exist for platform-owned pots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId([u8; 32]);

impl AccountId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        AccountId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let raw = hex::decode(s).ok()?;
        let bytes: [u8; 32] = raw.try_into().ok()?;
        Some(AccountId(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Platform fee accrual account.
    pub fn treasury() -> Self {
        AccountId([0xEE; 32])
    }

    /// Holding account for funds custodied by open escrows.
    pub fn custody_vault() -> Self {
        AccountId([0xCC; 32])
    }

    /// Funding account for approved insurance-style claims.
    pub fn insurance_pool() -> Self {
        AccountId([0xAA; 32])
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Why a transfer happened, recorded alongside every history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferReason {
    EscrowFunding,
    MilestoneRelease,
    ProjectRelease,
    Refund,
    DisputeSplit,
    PlatformFee,
    ReviewerReward,
    ClaimPayout,
    Adjustment,
}

impl fmt::Display for TransferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferReason::EscrowFunding => "escrow_funding",
            TransferReason::MilestoneRelease => "milestone_release",
            TransferReason::ProjectRelease => "project_release",
            TransferReason::Refund => "refund",
            TransferReason::DisputeSplit => "dispute_split",
            TransferReason::PlatformFee => "platform_fee",
            TransferReason::ReviewerReward => "reviewer_reward",
            TransferReason::ClaimPayout => "claim_payout",
            TransferReason::Adjustment => "adjustment",
        };
        write!(f, "{}", s)
    }
}

/// Immutable record of one completed transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: [u8; 32],
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Amount,
    pub reason: TransferReason,
    pub timestamp: DateTime<Utc>,
}

impl TransferRecord {
    pub fn new(from: AccountId, to: AccountId, amount: Amount, reason: TransferReason) -> Self {
        let timestamp = Utc::now();
        let mut data = Vec::with_capacity(96);
        data.extend_from_slice(from.as_bytes());
        data.extend_from_slice(to.as_bytes());
        data.extend_from_slice(&amount.as_units().to_le_bytes());
        data.extend_from_slice(&timestamp.timestamp_nanos_opt().unwrap_or(0).to_le_bytes());
        data.extend_from_slice(reason.to_string().as_bytes());

        Self {
            id: *blake3::hash(&data).as_bytes(),
            from,
            to,
            amount,
            reason,
            timestamp,
        }
    }
}
