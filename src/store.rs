// ===============================
// src/store.rs (ledger store port)
// ===============================
//
// The ledger store owns expenses, settlements and group membership. The engine
// only reads snapshots from it; the gateway is the only writer. Writers are
// serialized by the store itself.
//
use std::future::Future;

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::{
    Expense, ExpenseId, GroupId, GroupLedgerSnapshot, GroupRecord, MemberId, SettlementStatus,
    SettlementTransaction,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("group {0} not found")]
    GroupNotFound(GroupId),
    #[error("group {0} already exists")]
    GroupExists(GroupId),
    #[error("expense {0} not found")]
    ExpenseNotFound(ExpenseId),
    #[error("member {member} already in group {group}")]
    DuplicateMember { group: GroupId, member: MemberId },
    #[error("settlement reference {0} already recorded")]
    DuplicateReference(String),
    #[error("ledger store unavailable: {0}")]
    Unavailable(String),
}

pub trait LedgerStore: Send + Sync {
    fn create_group(&self, group: GroupRecord) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn add_member(
        &self,
        group: &GroupId,
        member: MemberId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn group(&self, group: &GroupId) -> impl Future<Output = Result<Option<GroupRecord>, StoreError>> + Send;

    fn groups_for_member(
        &self,
        member: &MemberId,
    ) -> impl Future<Output = Result<Vec<GroupRecord>, StoreError>> + Send;

    /// Consistent read of one group: members, expenses, success-only settlements.
    fn snapshot(
        &self,
        group: &GroupId,
    ) -> impl Future<Output = Result<Option<GroupLedgerSnapshot>, StoreError>> + Send;

    fn expense(&self, expense: &ExpenseId) -> impl Future<Output = Result<Option<Expense>, StoreError>> + Send;

    /// Expenses in any group that `member` paid or holds a share in.
    fn expenses_for_member(
        &self,
        member: &MemberId,
    ) -> impl Future<Output = Result<Vec<Expense>, StoreError>> + Send;

    fn insert_expense(&self, expense: Expense) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete_expense(
        &self,
        expense: &ExpenseId,
    ) -> impl Future<Output = Result<Expense, StoreError>> + Send;

    fn find_settlement_by_ref(
        &self,
        reference: &str,
    ) -> impl Future<Output = Result<Option<SettlementTransaction>, StoreError>> + Send;

    fn insert_settlement(
        &self,
        settlement: SettlementTransaction,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Removes the group and cascades to its expenses and settlements.
    fn delete_group(&self, group: &GroupId) -> impl Future<Output = Result<GroupRecord, StoreError>> + Send;
}

#[derive(Debug, Default)]
struct Tables {
    groups: HashMap<GroupId, GroupRecord>,
    expenses: HashMap<GroupId, Vec<Expense>>,
    expense_group: HashMap<ExpenseId, GroupId>,
    settlements: HashMap<GroupId, Vec<SettlementTransaction>>,
    settlement_refs: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn group_ids(&self) -> Vec<GroupId> {
        let t = self.tables.read().await;
        let mut ids: Vec<GroupId> = t.groups.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl LedgerStore for InMemoryStore {
    async fn create_group(&self, group: GroupRecord) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if t.groups.contains_key(&group.id) {
            return Err(StoreError::GroupExists(group.id));
        }
        t.groups.insert(group.id.clone(), group);
        Ok(())
    }

    async fn add_member(&self, group: &GroupId, member: MemberId) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let rec = t
            .groups
            .get_mut(group)
            .ok_or_else(|| StoreError::GroupNotFound(group.clone()))?;
        if rec.is_member(&member) {
            return Err(StoreError::DuplicateMember { group: group.clone(), member });
        }
        rec.members.push(member);
        Ok(())
    }

    async fn group(&self, group: &GroupId) -> Result<Option<GroupRecord>, StoreError> {
        Ok(self.tables.read().await.groups.get(group).cloned())
    }

    async fn groups_for_member(&self, member: &MemberId) -> Result<Vec<GroupRecord>, StoreError> {
        let t = self.tables.read().await;
        let mut out: Vec<GroupRecord> =
            t.groups.values().filter(|g| g.is_member(member)).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn snapshot(&self, group: &GroupId) -> Result<Option<GroupLedgerSnapshot>, StoreError> {
        let t = self.tables.read().await;
        let Some(rec) = t.groups.get(group) else {
            return Ok(None);
        };
        let expenses = t.expenses.get(group).cloned().unwrap_or_default();
        let settlements = t
            .settlements
            .get(group)
            .map(|v| {
                v.iter()
                    .filter(|s| s.status == SettlementStatus::Success)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(Some(GroupLedgerSnapshot {
            members: rec.members.clone(),
            expenses,
            settlements,
            simplify_debts: rec.simplify_debts,
        }))
    }

    async fn expense(&self, expense: &ExpenseId) -> Result<Option<Expense>, StoreError> {
        let t = self.tables.read().await;
        let Some(group) = t.expense_group.get(expense) else {
            return Ok(None);
        };
        Ok(t.expenses.get(group).and_then(|v| v.iter().find(|e| &e.id == expense)).cloned())
    }

    async fn expenses_for_member(&self, member: &MemberId) -> Result<Vec<Expense>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.expenses
            .values()
            .flat_map(|v| v.iter())
            .filter(|e| &e.payer == member || e.splits.iter().any(|s| &s.member == member))
            .cloned()
            .collect())
    }

    async fn insert_expense(&self, expense: Expense) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if !t.groups.contains_key(&expense.group) {
            return Err(StoreError::GroupNotFound(expense.group));
        }
        t.expense_group.insert(expense.id.clone(), expense.group.clone());
        t.expenses.entry(expense.group.clone()).or_default().push(expense);
        Ok(())
    }

    async fn delete_expense(&self, expense: &ExpenseId) -> Result<Expense, StoreError> {
        let mut t = self.tables.write().await;
        let group = t
            .expense_group
            .remove(expense)
            .ok_or_else(|| StoreError::ExpenseNotFound(expense.clone()))?;
        let list = t
            .expenses
            .get_mut(&group)
            .ok_or_else(|| StoreError::ExpenseNotFound(expense.clone()))?;
        let idx = list
            .iter()
            .position(|e| &e.id == expense)
            .ok_or_else(|| StoreError::ExpenseNotFound(expense.clone()))?;
        Ok(list.remove(idx))
    }

    async fn find_settlement_by_ref(
        &self,
        reference: &str,
    ) -> Result<Option<SettlementTransaction>, StoreError> {
        let t = self.tables.read().await;
        if !t.settlement_refs.contains(reference) {
            return Ok(None);
        }
        Ok(t
            .settlements
            .values()
            .flat_map(|v| v.iter())
            .find(|s| s.external_ref == reference)
            .cloned())
    }

    async fn insert_settlement(&self, settlement: SettlementTransaction) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if !t.groups.contains_key(&settlement.group) {
            return Err(StoreError::GroupNotFound(settlement.group));
        }
        if !t.settlement_refs.insert(settlement.external_ref.clone()) {
            return Err(StoreError::DuplicateReference(settlement.external_ref));
        }
        t.settlements.entry(settlement.group.clone()).or_default().push(settlement);
        Ok(())
    }

    async fn delete_group(&self, group: &GroupId) -> Result<GroupRecord, StoreError> {
        let mut t = self.tables.write().await;
        let rec = t
            .groups
            .remove(group)
            .ok_or_else(|| StoreError::GroupNotFound(group.clone()))?;
        if let Some(exps) = t.expenses.remove(group) {
            for e in exps {
                t.expense_group.remove(&e.id);
            }
        }
        if let Some(sts) = t.settlements.remove(group) {
            for s in sts {
                t.settlement_refs.remove(&s.external_ref);
            }
        }
        Ok(rec)
    }
}
