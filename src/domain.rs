// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::money::Amount;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpenseId(pub String);

macro_rules! id_impls {
    ($($t:ident),*) => {$(
        impl $t {
            pub fn new(s: impl Into<String>) -> Self { Self(s.into()) }
            pub fn generate() -> Self { Self(uuid::Uuid::new_v4().simple().to_string()) }
            pub fn as_str(&self) -> &str { &self.0 }
        }
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
        }
        impl From<&str> for $t {
            fn from(s: &str) -> Self { Self(s.to_string()) }
        }
    )*};
}
id_impls!(MemberId, GroupId, ExpenseId);

/// Expense category. Closed set; unknown tags are rejected at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Tag {
    Food,
    Travel,
    Rent,
    Groceries,
    Utilities,
    Entertainment,
    Shopping,
    Medical,
    #[default]
    Other,
}

impl Tag {
    pub const ALL: [Tag; 9] = [
        Tag::Food,
        Tag::Travel,
        Tag::Rent,
        Tag::Groceries,
        Tag::Utilities,
        Tag::Entertainment,
        Tag::Shopping,
        Tag::Medical,
        Tag::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Food => "Food",
            Tag::Travel => "Travel",
            Tag::Rent => "Rent",
            Tag::Groceries => "Groceries",
            Tag::Utilities => "Utilities",
            Tag::Entertainment => "Entertainment",
            Tag::Shopping => "Shopping",
            Tag::Medical => "Medical",
            Tag::Other => "Other",
        }
    }
}

impl FromStr for Tag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Tag::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitShare {
    pub member: MemberId,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount_owed: Amount,
}

impl SplitShare {
    pub fn new(member: impl Into<MemberId>, amount_owed: Amount) -> Self {
        Self { member: member.into(), amount_owed }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub group: GroupId,
    pub description: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Amount,
    pub payer: MemberId,
    pub tag: Tag,
    pub splits: Vec<SplitShare>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementTransaction {
    pub payer: MemberId,
    pub payee: MemberId,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Amount,
    pub group: GroupId,
    pub status: SettlementStatus,
    /// Provider payment id; unique per recorded settlement.
    pub external_ref: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<MemberId>,
    /// Stored preference only; settlement plans are always simplified.
    pub simplify_debts: bool,
    pub created_at: DateTime<Utc>,
}

impl GroupRecord {
    pub fn is_member(&self, m: &MemberId) -> bool {
        self.members.iter().any(|x| x == m)
    }
}

/// Read-only view of one group's ledger. Settlements are success-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupLedgerSnapshot {
    pub members: Vec<MemberId>,
    pub expenses: Vec<Expense>,
    pub settlements: Vec<SettlementTransaction>,
    pub simplify_debts: bool,
}

/// Computed recommendation: `from` pays `to` the given amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementInstruction {
    pub from: MemberId,
    pub to: MemberId,
    #[serde(with = "crate::money::serde_2dp")]
    pub amount: Amount,
}

/// Journal entry for every committed ledger mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEvent {
    GroupCreated { group: GroupRecord },
    MemberAdded { group: GroupId, member: MemberId },
    ExpenseAdded { expense: Expense },
    ExpenseDeleted { group: GroupId, expense: ExpenseId },
    SettlementRecorded { settlement: SettlementTransaction },
    GroupDeleted { group: GroupId },
}

impl LedgerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::GroupCreated { .. } => "group_created",
            LedgerEvent::MemberAdded { .. } => "member_added",
            LedgerEvent::ExpenseAdded { .. } => "expense_added",
            LedgerEvent::ExpenseDeleted { .. } => "expense_deleted",
            LedgerEvent::SettlementRecorded { .. } => "settlement_recorded",
            LedgerEvent::GroupDeleted { .. } => "group_deleted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tag_parses_case_insensitively() {
        assert_eq!("food".parse::<Tag>(), Ok(Tag::Food));
        assert_eq!(" Medical ".parse::<Tag>(), Ok(Tag::Medical));
        assert!("Crypto".parse::<Tag>().is_err());
    }

    #[test]
    fn instruction_serializes_two_fraction_digits() {
        let ins = SettlementInstruction { from: "B".into(), to: "A".into(), amount: dec!(50) };
        let json = serde_json::to_string(&ins).unwrap();
        assert_eq!(json, r#"{"from":"B","to":"A","amount":"50.00"}"#);
    }

    #[test]
    fn instruction_accepts_numeric_amount() {
        let ins: SettlementInstruction =
            serde_json::from_str(r#"{"from":"B","to":"A","amount":12.5}"#).unwrap();
        assert_eq!(ins.amount, dec!(12.5));
    }

    #[test]
    fn ledger_event_is_tagged_by_kind() {
        let ev = LedgerEvent::GroupDeleted { group: "g1".into() };
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"kind":"group_deleted","group":"g1"}"#);
        assert_eq!(ev.kind(), "group_deleted");
    }
}
