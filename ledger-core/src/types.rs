//! Core types for the ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Exact arithmetic (Decimal for credit)

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Participant identifier, assigned by the messaging front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(i64);

impl AccountId {
    /// Create new account ID
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw id value
    pub fn get(&self) -> i64 {
        self.0
    }

    /// Fixed-width key bytes
    pub fn to_key(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AccountId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Action identifier (monotonically increasing)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActionId(u64);

impl ActionId {
    /// Create new action ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id value
    pub fn get(&self) -> u64 {
        self.0
    }

    /// The id following this one
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Big-endian key bytes, so storage order matches id order
    pub fn to_key(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode from key bytes
    pub fn from_key(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(u64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A participant's ledger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Participant ID
    pub id: AccountId,

    /// Display handle on the messaging front-end
    pub handle: Option<String>,

    /// Social-network profile handle (required to be offered as a followee)
    pub profile: Option<String>,

    /// Available credit
    pub balance: Decimal,

    /// Credit held in escrow for outstanding actions
    pub pending: Decimal,

    /// May run admin commands
    pub is_admin: bool,
}

impl Account {
    /// Fresh account with zero balance and pending
    pub fn new(id: AccountId, handle: Option<String>, is_admin: bool) -> Self {
        Self {
            id,
            handle,
            profile: None,
            balance: Decimal::ZERO,
            pending: Decimal::ZERO,
            is_admin,
        }
    }

    /// Total credit attributable to this account
    pub fn total(&self) -> Decimal {
        self.balance + self.pending
    }

    /// Whether the profile handle has been set
    pub fn has_profile(&self) -> bool {
        self.profile.is_some()
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID: {}, Username: {}, Profile: {}, Balance: {}, Pending: {}",
            self.id,
            self.handle.as_deref().unwrap_or("-"),
            self.profile.as_deref().unwrap_or("-"),
            self.balance,
            self.pending,
        )
    }
}

/// Action status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ActionStatus {
    /// Stake escrowed, follow not yet verified
    Pending = 1,
    /// Follow verified, stake paid out
    Approved = 2,
    /// Requester passed, stake returned
    Skipped = 3,
}

impl ActionStatus {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Approved => "approved",
            ActionStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One proposed follow, append-only except for `status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action ID
    pub id: ActionId,

    /// Account asked to follow
    pub follower_id: AccountId,

    /// Follower profile at creation time
    pub follower_profile: String,

    /// Account being followed (escrow owner)
    pub followee_id: AccountId,

    /// Followee profile at creation time
    pub followee_profile: String,

    /// Current status
    pub status: ActionStatus,

    /// Creation date
    pub created_date: NaiveDate,

    /// Pending action this skip record supersedes
    pub supersedes: Option<ActionId>,
}

impl Action {
    /// Whole days elapsed between creation and `today`
    pub fn age_days(&self, today: NaiveDate) -> i64 {
        (today - self.created_date).num_days()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID: {}, Follower: {}-{}, Followee: {}-{}, Status: {}, Date: {}",
            self.id,
            self.follower_id,
            self.follower_profile,
            self.followee_id,
            self.followee_profile,
            self.status,
            self.created_date.format("%d/%m/%Y"),
        )
    }
}

/// Account fields an admin may overwrite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettableField {
    /// Available credit
    Balance,
    /// Escrowed credit
    Pending,
}

impl SettableField {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            SettableField::Balance => "balance",
            SettableField::Pending => "pending",
        }
    }
}

impl fmt::Display for SettableField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettableField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balance" => Ok(SettableField::Balance),
            "pending" => Ok(SettableField::Pending),
            other => Err(format!("unknown field '{}' (expected balance or pending)", other)),
        }
    }
}

/// Outcome of a terminal escrow operation on an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The operation was applied
    Applied,
    /// The action was already approved, skipped or superseded; nothing changed
    AlreadyResolved,
    /// The escrow guard refused the operation; nothing changed
    Rejected,
}

impl Resolution {
    /// Whether credit moved
    pub fn is_applied(&self) -> bool {
        matches!(self, Resolution::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_id_key_order() {
        let a = ActionId::new(9);
        let b = ActionId::new(256);
        assert!(a.to_key() < b.to_key());
        assert_eq!(ActionId::from_key(&b.to_key()), Some(b));
        assert_eq!(ActionId::from_key(&[1, 2, 3]), None);
    }

    #[test]
    fn test_settable_field_from_str() {
        assert_eq!("balance".parse::<SettableField>(), Ok(SettableField::Balance));
        assert_eq!(" Pending ".parse::<SettableField>(), Ok(SettableField::Pending));
        assert!("is_admin".parse::<SettableField>().is_err());
        assert!("balance = 1; --".parse::<SettableField>().is_err());
    }

    #[test]
    fn test_action_age() {
        let action = Action {
            id: ActionId::new(1),
            follower_id: AccountId::new(1),
            follower_profile: "alice".to_string(),
            followee_id: AccountId::new(2),
            followee_profile: "bob".to_string(),
            status: ActionStatus::Pending,
            created_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            supersedes: None,
        };
        let today = NaiveDate::from_ymd_opt(2024, 3, 6).unwrap();
        assert_eq!(action.age_days(today), 5);
        assert!(action.to_string().contains("01/03/2024"));
    }

    #[test]
    fn test_account_display() {
        let account = Account::new(AccountId::new(7), Some("neo".to_string()), false);
        assert_eq!(account.total(), Decimal::ZERO);
        assert!(!account.has_profile());
        assert!(account.to_string().starts_with("ID: 7, Username: neo"));
    }
}
