// ===============================
// src/service.rs (balance read path)
// ===============================
//
// Cache-aside:
//   cache hit  -> return cached plan
//   cache miss -> snapshot -> calculator -> simplifier -> cache set -> return
//
// Computation is a pure function of the snapshot, so concurrent misses for the
// same group only cost redundant work, never a different answer.
//
use std::sync::Arc;
use std::time::Instant;

use ahash::AHashMap as HashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::balance::{net_balances_for, BalanceSheet};
use crate::cache::{BalanceCache, CacheBackend};
use crate::domain::{Expense, GroupId, GroupLedgerSnapshot, MemberId, SettlementInstruction, Tag};
use crate::metrics::{
    BALANCE_COMPUTES, BALANCE_REQUESTS, COMPUTE_LATENCY_MS, IGNORED_SETTLEMENTS, INSTRUCTIONS,
    SKIPPED_REFS,
};
use crate::money::{round2, Amount};
use crate::simplify::{simplify, SimplifyCfg};
use crate::store::{LedgerStore, StoreError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberBalance {
    pub member: MemberId,
    #[serde(with = "crate::money::serde_2dp")]
    pub balance: Amount,
}

/// One member's standing in one group. Positive means the group owes them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupPosition {
    pub group: GroupId,
    pub name: String,
    #[serde(with = "crate::money::serde_2dp")]
    pub balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagTotal {
    pub tag: Tag,
    #[serde(with = "crate::money::serde_2dp")]
    pub total: Amount,
}

pub struct BalanceService<S, B> {
    store: Arc<S>,
    cache: Arc<BalanceCache<B>>,
    cfg: SimplifyCfg,
}

impl<S: LedgerStore, B: CacheBackend> BalanceService<S, B> {
    pub fn new(store: Arc<S>, cache: Arc<BalanceCache<B>>, cfg: SimplifyCfg) -> Self {
        Self { store, cache, cfg }
    }

    pub fn cache(&self) -> &Arc<BalanceCache<B>> {
        &self.cache
    }

    /// Settlement plan for a group. Missing groups yield an empty plan.
    pub async fn balances(&self, group: &GroupId) -> Result<Vec<SettlementInstruction>, ServiceError> {
        BALANCE_REQUESTS.inc();
        if let Some(plan) = self.cache.get(group).await {
            debug!(group = %group, n = plan.len(), "balance cache hit");
            return Ok(plan);
        }

        let started = Instant::now();
        let Some(snapshot) = self.store.snapshot(group).await? else {
            debug!(group = %group, "group not found, empty plan");
            return Ok(Vec::new());
        };
        let plan = self.plan_for(&snapshot);
        COMPUTE_LATENCY_MS.observe(started.elapsed().as_secs_f64() * 1000.0);
        BALANCE_COMPUTES.inc();

        self.cache.set(group, &plan).await;
        info!(group = %group, instructions = plan.len(), "balance plan computed");
        Ok(plan)
    }

    /// Same plan, straight from the ledger without touching the cache.
    pub async fn balances_uncached(
        &self,
        group: &GroupId,
    ) -> Result<Vec<SettlementInstruction>, ServiceError> {
        Ok(self
            .store
            .snapshot(group)
            .await?
            .map(|s| self.plan_for(&s))
            .unwrap_or_default())
    }

    /// Rounded net balance per member, sorted by member id.
    pub async fn net_balances(&self, group: &GroupId) -> Result<Vec<MemberBalance>, ServiceError> {
        let Some(snapshot) = self.store.snapshot(group).await? else {
            return Ok(Vec::new());
        };
        let sheet = self.sheet(&snapshot);
        Ok(sheet
            .sorted()
            .into_iter()
            .map(|(member, b)| MemberBalance { member, balance: round2(b) })
            .collect())
    }

    /// Net standing of one member in every group they belong to.
    pub async fn member_positions(&self, member: &MemberId) -> Result<Vec<GroupPosition>, ServiceError> {
        let groups = self.store.groups_for_member(member).await?;
        let mut out = Vec::with_capacity(groups.len());
        for g in groups {
            let Some(snapshot) = self.store.snapshot(&g.id).await? else {
                // deleted between the two reads
                continue;
            };
            let sheet = self.sheet(&snapshot);
            out.push(GroupPosition { group: g.id, name: g.name, balance: round2(sheet.get(member)) });
        }
        Ok(out)
    }

    /// Expense totals per tag, largest first. With a member, only that
    /// member's shares are counted.
    pub async fn spend_by_tag(
        &self,
        group: &GroupId,
        member: Option<&MemberId>,
    ) -> Result<Vec<TagTotal>, ServiceError> {
        let Some(snapshot) = self.store.snapshot(group).await? else {
            return Ok(Vec::new());
        };
        let mut totals: HashMap<Tag, Amount> = HashMap::new();
        for e in &snapshot.expenses {
            let part = match member {
                None => e.amount,
                Some(m) => e.splits.iter().filter(|s| &s.member == m).map(|s| s.amount_owed).sum(),
            };
            if !part.is_zero() {
                *totals.entry(e.tag).or_default() += part;
            }
        }
        let mut out: Vec<TagTotal> = totals
            .into_iter()
            .map(|(tag, total)| TagTotal { tag, total: round2(total) })
            .collect();
        out.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.tag.cmp(&b.tag)));
        Ok(out)
    }

    /// Expenses of one group, newest first. Missing groups yield an empty list.
    pub async fn group_expenses(&self, group: &GroupId) -> Result<Vec<Expense>, ServiceError> {
        let mut out = self
            .store
            .snapshot(group)
            .await?
            .map(|s| s.expenses)
            .unwrap_or_default();
        newest_first(&mut out);
        Ok(out)
    }

    /// Every expense the member paid or holds a share in, across groups, newest first.
    pub async fn member_expenses(&self, member: &MemberId) -> Result<Vec<Expense>, ServiceError> {
        let mut out = self.store.expenses_for_member(member).await?;
        newest_first(&mut out);
        Ok(out)
    }

    fn sheet(&self, snapshot: &GroupLedgerSnapshot) -> BalanceSheet {
        let sheet = net_balances_for(snapshot);
        if sheet.skipped_refs > 0 {
            SKIPPED_REFS.inc_by(sheet.skipped_refs as u64);
        }
        if sheet.ignored_settlements > 0 {
            IGNORED_SETTLEMENTS.inc_by(sheet.ignored_settlements as u64);
        }
        sheet
    }

    fn plan_for(&self, snapshot: &GroupLedgerSnapshot) -> Vec<SettlementInstruction> {
        let sheet = self.sheet(snapshot);
        let plan = simplify(&sheet, &self.cfg);
        INSTRUCTIONS.observe(plan.len() as f64);
        plan
    }
}

fn newest_first(expenses: &mut [Expense]) {
    expenses.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.id.cmp(&b.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheCfg, MemoryBackend, NullBackend};
    use crate::domain::{Expense, ExpenseId, GroupRecord, SplitShare};
    use crate::store::InMemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    async fn store_with(members: &[&str], simplify_debts: bool) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_group(GroupRecord {
                id: "g".into(),
                name: "house".into(),
                members: members.iter().map(|m| MemberId::new(*m)).collect(),
                simplify_debts,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
    }

    async fn add(store: &InMemoryStore, payer: &str, tag: Tag, splits: &[(&str, Amount)]) {
        store
            .insert_expense(Expense {
                id: ExpenseId::generate(),
                group: "g".into(),
                description: "x".into(),
                amount: splits.iter().map(|(_, a)| *a).sum(),
                payer: payer.into(),
                tag,
                splits: splits.iter().map(|(m, a)| SplitShare::new(*m, *a)).collect(),
                date: Utc::now(),
            })
            .await
            .unwrap();
    }

    fn ins(from: &str, to: &str, amount: Amount) -> SettlementInstruction {
        SettlementInstruction { from: from.into(), to: to.into(), amount }
    }

    #[tokio::test]
    async fn miss_then_hit_serves_cached_plan() {
        let store = store_with(&["A", "B"], true).await;
        add(&store, "A", Tag::Food, &[("A", dec!(50)), ("B", dec!(50))]).await;
        let cache = Arc::new(BalanceCache::new(MemoryBackend::new(), CacheCfg::default()));
        let svc = BalanceService::new(store.clone(), cache.clone(), SimplifyCfg::default());

        let first = svc.balances(&"g".into()).await.unwrap();
        assert_eq!(first, vec![ins("B", "A", dec!(50))]);
        assert_eq!(cache.get(&"g".into()).await, Some(first.clone()));

        // a write that bypasses the gateway is invisible until ttl/invalidation
        add(&store, "B", Tag::Food, &[("A", dec!(50))]).await;
        assert_eq!(svc.balances(&"g".into()).await.unwrap(), first);
        assert!(svc.balances_uncached(&"g".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_group_is_empty_and_not_cached() {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(BalanceCache::new(MemoryBackend::new(), CacheCfg::default()));
        let svc = BalanceService::new(store, cache.clone(), SimplifyCfg::default());
        assert!(svc.balances(&"ghost".into()).await.unwrap().is_empty());
        assert!(cache.backend().is_empty().await);
    }

    #[tokio::test]
    async fn debt_cycle_is_simplified_even_when_flag_is_off() {
        // A paid for B, B for C, C for A; the flag is stored but never
        // changes how the plan is computed.
        let store = store_with(&["A", "B", "C"], false).await;
        add(&store, "A", Tag::Rent, &[("B", dec!(10))]).await;
        add(&store, "B", Tag::Rent, &[("C", dec!(20))]).await;
        add(&store, "C", Tag::Rent, &[("A", dec!(30))]).await;
        let cache = Arc::new(BalanceCache::new(NullBackend, CacheCfg::default()));
        let svc = BalanceService::new(store, cache, SimplifyCfg::default());

        let plan = svc.balances(&"g".into()).await.unwrap();
        assert!(plan.len() <= 2, "3 members but {} instructions", plan.len());
        assert_eq!(plan, vec![ins("A", "B", dec!(10)), ins("A", "C", dec!(10))]);
    }

    #[tokio::test]
    async fn net_balances_and_positions() {
        let store = store_with(&["A", "B", "C"], true).await;
        add(&store, "A", Tag::Food, &[("A", dec!(30)), ("B", dec!(30)), ("C", dec!(30))]).await;
        let cache = Arc::new(BalanceCache::new(NullBackend, CacheCfg::default()));
        let svc = BalanceService::new(store, cache, SimplifyCfg::default());

        let nets = svc.net_balances(&"g".into()).await.unwrap();
        assert_eq!(
            nets,
            vec![
                MemberBalance { member: "A".into(), balance: dec!(60) },
                MemberBalance { member: "B".into(), balance: dec!(-30) },
                MemberBalance { member: "C".into(), balance: dec!(-30) },
            ]
        );

        let pos = svc.member_positions(&"B".into()).await.unwrap();
        assert_eq!(pos.len(), 1);
        assert_eq!(pos[0].balance, dec!(-30));
        assert_eq!(pos[0].name, "house");
    }

    #[tokio::test]
    async fn spend_by_tag_for_group_and_member() {
        let store = store_with(&["A", "B"], true).await;
        add(&store, "A", Tag::Food, &[("A", dec!(10)), ("B", dec!(30))]).await;
        add(&store, "B", Tag::Travel, &[("A", dec!(25)), ("B", dec!(5))]).await;
        add(&store, "B", Tag::Food, &[("B", dec!(2))]).await;
        let cache = Arc::new(BalanceCache::new(NullBackend, CacheCfg::default()));
        let svc = BalanceService::new(store, cache, SimplifyCfg::default());

        let all = svc.spend_by_tag(&"g".into(), None).await.unwrap();
        assert_eq!(
            all,
            vec![
                TagTotal { tag: Tag::Food, total: dec!(42) },
                TagTotal { tag: Tag::Travel, total: dec!(30) },
            ]
        );

        let mine = svc.spend_by_tag(&"g".into(), Some(&"A".into())).await.unwrap();
        assert_eq!(
            mine,
            vec![
                TagTotal { tag: Tag::Travel, total: dec!(25) },
                TagTotal { tag: Tag::Food, total: dec!(10) },
            ]
        );
    }

    #[tokio::test]
    async fn expense_listings_are_newest_first() {
        let store = store_with(&["A", "B"], true).await;
        store
            .create_group(GroupRecord {
                id: "h".into(),
                name: "trip".into(),
                members: vec!["A".into(), "C".into()],
                simplify_debts: true,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let t0 = Utc::now();
        let at = |id: &str, group: &str, payer: &str, debtor: &str, hours: i64| Expense {
            id: ExpenseId::new(id),
            group: group.into(),
            description: id.into(),
            amount: dec!(10),
            payer: payer.into(),
            tag: Tag::Other,
            splits: vec![SplitShare::new(debtor, dec!(10))],
            date: t0 + chrono::Duration::hours(hours),
        };
        for e in [
            at("e1", "g", "A", "B", 0),
            at("e2", "g", "B", "B", 1),
            at("e3", "h", "C", "A", 2),
            at("e4", "g", "B", "A", 3),
        ] {
            store.insert_expense(e).await.unwrap();
        }
        let cache = Arc::new(BalanceCache::new(NullBackend, CacheCfg::default()));
        let svc = BalanceService::new(store, cache, SimplifyCfg::default());
        let ids = |v: Vec<Expense>| v.into_iter().map(|e| e.id.as_str().to_string()).collect::<Vec<_>>();

        assert_eq!(ids(svc.group_expenses(&"g".into()).await.unwrap()), ["e4", "e2", "e1"]);
        assert!(svc.group_expenses(&"ghost".into()).await.unwrap().is_empty());

        // payer or split participant, across groups
        assert_eq!(ids(svc.member_expenses(&"A".into()).await.unwrap()), ["e4", "e3", "e1"]);
        assert_eq!(ids(svc.member_expenses(&"C".into()).await.unwrap()), ["e3"]);
        assert!(svc.member_expenses(&"Z".into()).await.unwrap().is_empty());
    }
}
