// ===============================
// src/gateway.rs (mutation gateway)
// ===============================
//
// The only writer of the ledger. For every mutation:
//   1) validate at the ingestion boundary (closed tag set, membership, split sums)
//   2) commit to the ledger store
//   3) invalidate the group's cached plan
//   4) journal the event (non-blocking)
// and only then report success to the caller.
//
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cache::{BalanceCache, CacheBackend};
use crate::domain::{
    Expense, ExpenseId, GroupId, GroupRecord, LedgerEvent, MemberId, SettlementStatus,
    SettlementTransaction, SplitShare, Tag,
};
use crate::metrics::{MUTATIONS, REJECTS};
use crate::money::{format2, Amount, SETTLE_EPSILON};
use crate::store::{LedgerStore, StoreError};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("description is required")]
    EmptyDescription,
    #[error("group name is required")]
    EmptyGroupName,
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),
    #[error("unknown tag {0:?}")]
    UnknownTag(String),
    #[error("payer {0} is not a member of the group")]
    PayerNotMember(MemberId),
    #[error("split member {0} is not a member of the group")]
    SplitNotMember(MemberId),
    #[error("member {0} appears more than once in the splits")]
    DuplicateSplit(MemberId),
    #[error("negative share for {0}")]
    NegativeShare(MemberId),
    #[error("split shares sum to {sum} but expense total is {total}")]
    SplitSumMismatch { total: String, sum: String },
    #[error("payer and payee must differ")]
    SelfSettlement,
    #[error("settlement party {0} is not a member of the group")]
    PartyNotMember(MemberId),
    #[error("{0} is not authorized for this group")]
    NotAuthorized(MemberId),
    #[error("group {0} not found")]
    GroupNotFound(GroupId),
    #[error("expense {0} not found")]
    ExpenseNotFound(ExpenseId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GatewayError {
    pub fn reason(&self) -> &'static str {
        match self {
            GatewayError::EmptyDescription => "empty_description",
            GatewayError::EmptyGroupName => "empty_group_name",
            GatewayError::NonPositiveAmount(_) => "non_positive_amount",
            GatewayError::UnknownTag(_) => "unknown_tag",
            GatewayError::PayerNotMember(_) => "payer_not_member",
            GatewayError::SplitNotMember(_) => "split_not_member",
            GatewayError::DuplicateSplit(_) => "duplicate_split",
            GatewayError::NegativeShare(_) => "negative_share",
            GatewayError::SplitSumMismatch { .. } => "split_sum_mismatch",
            GatewayError::SelfSettlement => "self_settlement",
            GatewayError::PartyNotMember(_) => "party_not_member",
            GatewayError::NotAuthorized(_) => "not_authorized",
            GatewayError::GroupNotFound(_) => "group_not_found",
            GatewayError::ExpenseNotFound(_) => "expense_not_found",
            GatewayError::Store(_) => "store",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub creator: MemberId,
    /// Extra members besides the creator.
    pub members: Vec<MemberId>,
    pub simplify_debts: bool,
}

#[derive(Debug, Clone)]
pub struct NewExpense {
    pub group: GroupId,
    pub requester: MemberId,
    pub description: String,
    pub amount: Amount,
    /// Defaults to the requester.
    pub paid_by: Option<MemberId>,
    /// Free-form tag from the client; parsed into the closed set. Defaults to Other.
    pub tag: Option<String>,
    pub splits: Vec<SplitShare>,
}

#[derive(Debug, Clone)]
pub struct NewSettlement {
    pub group: GroupId,
    pub payer: MemberId,
    pub payee: MemberId,
    pub amount: Amount,
    pub external_ref: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    New(SettlementTransaction),
    /// The reference was already on the ledger; nothing new was written.
    Duplicate(SettlementTransaction),
}

impl Recorded {
    pub fn transaction(&self) -> &SettlementTransaction {
        match self {
            Recorded::New(t) | Recorded::Duplicate(t) => t,
        }
    }
}

pub struct MutationGateway<S, B> {
    store: Arc<S>,
    cache: Arc<BalanceCache<B>>,
    events: Option<mpsc::Sender<LedgerEvent>>,
    epsilon: Amount,
}

impl<S: LedgerStore, B: CacheBackend> MutationGateway<S, B> {
    pub fn new(store: Arc<S>, cache: Arc<BalanceCache<B>>) -> Self {
        Self { store, cache, events: None, epsilon: SETTLE_EPSILON }
    }

    pub fn with_journal(mut self, tx: mpsc::Sender<LedgerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_epsilon(mut self, epsilon: Amount) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn create_group(&self, input: NewGroup) -> Result<GroupRecord, GatewayError> {
        let res = self.create_group_inner(input).await;
        self.count(res.as_ref().err());
        res
    }

    async fn create_group_inner(&self, input: NewGroup) -> Result<GroupRecord, GatewayError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(GatewayError::EmptyGroupName);
        }
        let mut members = vec![input.creator.clone()];
        for m in input.members {
            if !members.contains(&m) {
                members.push(m);
            }
        }
        let group = GroupRecord {
            id: GroupId::generate(),
            name: name.to_string(),
            members,
            simplify_debts: input.simplify_debts,
            created_at: Utc::now(),
        };
        self.store.create_group(group.clone()).await?;
        // a reused id must not pick up a stale plan
        self.cache.invalidate(&group.id).await;
        info!(group = %group.id, name = %group.name, members = group.members.len(), "group created");
        self.emit(LedgerEvent::GroupCreated { group: group.clone() });
        Ok(group)
    }

    /// New members start at zero, so no cached plan changes.
    pub async fn add_member(
        &self,
        requester: &MemberId,
        group: &GroupId,
        member: MemberId,
    ) -> Result<(), GatewayError> {
        let res = self.add_member_inner(requester, group, member).await;
        self.count(res.as_ref().err());
        res
    }

    async fn add_member_inner(
        &self,
        requester: &MemberId,
        group: &GroupId,
        member: MemberId,
    ) -> Result<(), GatewayError> {
        let rec = self.require_group(group).await?;
        if !rec.is_member(requester) {
            return Err(GatewayError::NotAuthorized(requester.clone()));
        }
        self.store.add_member(group, member.clone()).await?;
        info!(group = %group, member = %member, "member added");
        self.emit(LedgerEvent::MemberAdded { group: group.clone(), member });
        Ok(())
    }

    pub async fn add_expense(&self, input: NewExpense) -> Result<Expense, GatewayError> {
        let res = self.add_expense_inner(input).await;
        self.count(res.as_ref().err());
        res
    }

    async fn add_expense_inner(&self, input: NewExpense) -> Result<Expense, GatewayError> {
        let description = input.description.trim();
        if description.is_empty() {
            return Err(GatewayError::EmptyDescription);
        }
        if input.amount <= Amount::ZERO {
            return Err(GatewayError::NonPositiveAmount(input.amount));
        }
        let tag = match input.tag.as_deref() {
            None => Tag::default(),
            Some(t) => t.parse::<Tag>().map_err(GatewayError::UnknownTag)?,
        };

        let group = self.require_group(&input.group).await?;
        if !group.is_member(&input.requester) {
            return Err(GatewayError::NotAuthorized(input.requester));
        }
        let payer = input.paid_by.unwrap_or_else(|| input.requester.clone());
        if !group.is_member(&payer) {
            return Err(GatewayError::PayerNotMember(payer));
        }
        validate_splits(&group, input.amount, &input.splits, self.epsilon)?;

        let expense = Expense {
            id: ExpenseId::generate(),
            group: group.id.clone(),
            description: description.to_string(),
            amount: input.amount,
            payer,
            tag,
            splits: input.splits,
            date: Utc::now(),
        };
        self.store.insert_expense(expense.clone()).await?;
        self.cache.invalidate(&expense.group).await;
        info!(
            group = %expense.group,
            expense = %expense.id,
            amount = %format2(expense.amount),
            tag = expense.tag.as_str(),
            "expense added"
        );
        self.emit(LedgerEvent::ExpenseAdded { expense: expense.clone() });
        Ok(expense)
    }

    pub async fn delete_expense(
        &self,
        requester: &MemberId,
        expense: &ExpenseId,
    ) -> Result<Expense, GatewayError> {
        let res = self.delete_expense_inner(requester, expense).await;
        self.count(res.as_ref().err());
        res
    }

    async fn delete_expense_inner(
        &self,
        requester: &MemberId,
        expense: &ExpenseId,
    ) -> Result<Expense, GatewayError> {
        let existing = self
            .store
            .expense(expense)
            .await?
            .ok_or_else(|| GatewayError::ExpenseNotFound(expense.clone()))?;
        let group = self.require_group(&existing.group).await?;
        if !group.is_member(requester) {
            return Err(GatewayError::NotAuthorized(requester.clone()));
        }
        let removed = self.store.delete_expense(expense).await?;
        self.cache.invalidate(&removed.group).await;
        info!(group = %removed.group, expense = %removed.id, "expense deleted");
        self.emit(LedgerEvent::ExpenseDeleted {
            group: removed.group.clone(),
            expense: removed.id.clone(),
        });
        Ok(removed)
    }

    /// Record a confirmed payment. Re-recording a known reference returns the
    /// existing transaction.
    pub async fn record_settlement(&self, input: NewSettlement) -> Result<Recorded, GatewayError> {
        let res = self.record_settlement_inner(input).await;
        self.count(res.as_ref().err());
        res
    }

    async fn record_settlement_inner(&self, input: NewSettlement) -> Result<Recorded, GatewayError> {
        if input.amount <= Amount::ZERO {
            return Err(GatewayError::NonPositiveAmount(input.amount));
        }
        if input.payer == input.payee {
            return Err(GatewayError::SelfSettlement);
        }
        if let Some(existing) = self.store.find_settlement_by_ref(&input.external_ref).await? {
            info!(reference = %input.external_ref, "settlement already recorded");
            // a previous attempt may have committed without invalidating
            self.cache.invalidate(&existing.group).await;
            return Ok(Recorded::Duplicate(existing));
        }
        let group = self.require_group(&input.group).await?;
        for party in [&input.payer, &input.payee] {
            if !group.is_member(party) {
                return Err(GatewayError::PartyNotMember(party.clone()));
            }
        }

        let tx = SettlementTransaction {
            payer: input.payer,
            payee: input.payee,
            amount: input.amount,
            group: input.group,
            status: SettlementStatus::Success,
            external_ref: input.external_ref,
            created_at: Utc::now(),
        };
        match self.store.insert_settlement(tx.clone()).await {
            Ok(()) => {}
            // lost a race with a concurrent confirmation of the same payment
            Err(StoreError::DuplicateReference(r)) => {
                let existing = self
                    .store
                    .find_settlement_by_ref(&r)
                    .await?
                    .ok_or(StoreError::DuplicateReference(r))?;
                self.cache.invalidate(&existing.group).await;
                return Ok(Recorded::Duplicate(existing));
            }
            Err(e) => return Err(e.into()),
        }
        self.cache.invalidate(&tx.group).await;
        info!(
            group = %tx.group,
            payer = %tx.payer,
            payee = %tx.payee,
            amount = %format2(tx.amount),
            reference = %tx.external_ref,
            "settlement recorded"
        );
        self.emit(LedgerEvent::SettlementRecorded { settlement: tx.clone() });
        Ok(Recorded::New(tx))
    }

    pub async fn delete_group(
        &self,
        requester: &MemberId,
        group: &GroupId,
    ) -> Result<GroupRecord, GatewayError> {
        let res = self.delete_group_inner(requester, group).await;
        self.count(res.as_ref().err());
        res
    }

    async fn delete_group_inner(
        &self,
        requester: &MemberId,
        group: &GroupId,
    ) -> Result<GroupRecord, GatewayError> {
        let rec = self.require_group(group).await?;
        if !rec.is_member(requester) {
            return Err(GatewayError::NotAuthorized(requester.clone()));
        }
        let removed = self.store.delete_group(group).await?;
        self.cache.invalidate(group).await;
        info!(group = %group, "group deleted");
        self.emit(LedgerEvent::GroupDeleted { group: group.clone() });
        Ok(removed)
    }

    async fn require_group(&self, group: &GroupId) -> Result<GroupRecord, GatewayError> {
        self.store
            .group(group)
            .await?
            .ok_or_else(|| GatewayError::GroupNotFound(group.clone()))
    }

    fn emit(&self, ev: LedgerEvent) {
        MUTATIONS.with_label_values(&[ev.kind()]).inc();
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(ev) {
                warn!(error = %e, "journal channel full or closed, event not recorded");
            }
        }
    }

    fn count(&self, err: Option<&GatewayError>) {
        if let Some(e) = err {
            REJECTS.with_label_values(&[e.reason()]).inc();
            warn!(reason = e.reason(), error = %e, "mutation rejected");
        }
    }
}

fn validate_splits(
    group: &GroupRecord,
    total: Amount,
    splits: &[SplitShare],
    epsilon: Amount,
) -> Result<(), GatewayError> {
    let mut seen: Vec<&MemberId> = Vec::with_capacity(splits.len());
    let mut sum = Amount::ZERO;
    for s in splits {
        if !group.is_member(&s.member) {
            return Err(GatewayError::SplitNotMember(s.member.clone()));
        }
        if s.amount_owed < Amount::ZERO {
            return Err(GatewayError::NegativeShare(s.member.clone()));
        }
        if seen.contains(&&s.member) {
            return Err(GatewayError::DuplicateSplit(s.member.clone()));
        }
        seen.push(&s.member);
        sum += s.amount_owed;
    }
    if (sum - total).abs() > epsilon {
        return Err(GatewayError::SplitSumMismatch { total: format2(total), sum: format2(sum) });
    }
    Ok(())
}
