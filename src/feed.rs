// ===============================
// src/feed.rs
// ===============================
//
// Mock mutation feed for the demo binary:
// - seed_groups  : creates N groups of M members ("m1".."mM")
// - run_mock     : random stream of mutations through the gateway
//     ~75% add expense (equal split over a random subset, cents distributed)
//     ~10% delete one of the feed's own expenses
//     ~15% settle the first instruction of the group's current plan, via a
//          signed payment confirmation when a secret is configured
//
use std::sync::Arc;

use ahash::AHashMap as HashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::cache::CacheBackend;
use crate::domain::{ExpenseId, GroupId, MemberId, SplitShare, Tag};
use crate::gateway::{MutationGateway, NewExpense, NewGroup, NewSettlement};
use crate::money::Amount;
use crate::payment::{self, PaymentConfirmation};
use crate::service::BalanceService;
use crate::store::LedgerStore;

/// Equal split of `cents` over `members`; the first `cents % n` members carry one extra cent.
pub fn equal_split(cents: i64, members: &[MemberId]) -> Vec<SplitShare> {
    if members.is_empty() {
        return Vec::new();
    }
    let n = members.len() as i64;
    let (base, rem) = (cents / n, cents % n);
    members
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let c = base + if (i as i64) < rem { 1 } else { 0 };
            SplitShare { member: m.clone(), amount_owed: Amount::new(c, 2) }
        })
        .collect()
}

pub async fn seed_groups<S: LedgerStore, B: CacheBackend>(
    gw: &MutationGateway<S, B>,
    groups: usize,
    members: usize,
) -> Vec<(GroupId, Vec<MemberId>)> {
    let roster: Vec<MemberId> = (1..=members.max(1)).map(|i| MemberId::new(format!("m{i}"))).collect();
    let mut out = Vec::with_capacity(groups);
    for i in 0..groups {
        let res = gw
            .create_group(NewGroup {
                name: format!("demo-{}", i + 1),
                creator: roster[0].clone(),
                members: roster[1..].to_vec(),
                simplify_debts: i % 4 != 3,
            })
            .await;
        match res {
            Ok(g) => out.push((g.id, g.members)),
            Err(e) => warn!(error = %e, "feed: seed group failed"),
        }
    }
    out
}

pub async fn run_mock<S: LedgerStore, B: CacheBackend>(
    gw: Arc<MutationGateway<S, B>>,
    svc: Arc<BalanceService<S, B>>,
    groups: Vec<(GroupId, Vec<MemberId>)>,
    secret: Option<String>,
    every: Duration,
) {
    if groups.is_empty() {
        warn!("feed: no groups, mock feed not started");
        return;
    }
    let mut mine: HashMap<GroupId, Vec<ExpenseId>> = HashMap::new();
    let mut seq: u64 = 0;

    loop {
        seq += 1;
        // never hold ThreadRng across an .await
        let (gi, roll, cents, payer_i, tag_i) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(0..groups.len()),
                rng.gen_range(0..100u32),
                rng.gen_range(100..20_000i64),
                rng.gen::<usize>(),
                rng.gen_range(0..Tag::ALL.len()),
            )
        };
        let (group, members) = &groups[gi];

        if roll < 75 {
            let payer = members[payer_i % members.len()].clone();
            let mut who = members.clone();
            {
                let mut rng = rand::thread_rng();
                who.shuffle(&mut rng);
                let keep = rng.gen_range(1..=who.len());
                who.truncate(keep);
                who.sort();
            }
            let res = gw
                .add_expense(NewExpense {
                    group: group.clone(),
                    requester: payer.clone(),
                    description: format!("mock expense #{seq}"),
                    amount: Amount::new(cents, 2),
                    paid_by: Some(payer),
                    tag: Some(Tag::ALL[tag_i].as_str().to_string()),
                    splits: equal_split(cents, &who),
                })
                .await;
            match res {
                Ok(e) => mine.entry(group.clone()).or_default().push(e.id),
                Err(e) => warn!(error = %e, "feed: add expense failed"),
            }
        } else if roll < 85 {
            if let Some(id) = mine.get_mut(group).and_then(|v| v.pop()) {
                if let Err(e) = gw.delete_expense(&members[0], &id).await {
                    warn!(error = %e, "feed: delete expense failed");
                }
            }
        } else {
            settle_first(gw.as_ref(), svc.as_ref(), group, secret.as_deref(), seq).await;
        }

        sleep(every).await;
    }
}

/// Pay off the first instruction of the group's current plan.
async fn settle_first<S: LedgerStore, B: CacheBackend>(
    gw: &MutationGateway<S, B>,
    svc: &BalanceService<S, B>,
    group: &GroupId,
    secret: Option<&str>,
    seq: u64,
) {
    let plan = match svc.balances(group).await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "feed: balances failed");
            return;
        }
    };
    let Some(first) = plan.into_iter().next() else {
        debug!(group = %group, "feed: nothing to settle");
        return;
    };
    let payment_id = format!("pay_{}", uuid::Uuid::new_v4().simple());
    let res = match secret {
        Some(secret) => {
            let order_id = format!("order_{seq}");
            let signature = payment::sign(secret, &order_id, &payment_id);
            let confirmation = PaymentConfirmation {
                order_id,
                payment_id,
                signature,
                group: group.clone(),
                payer: first.from,
                payee: first.to,
                amount: first.amount,
            };
            payment::confirm(gw, Some(secret), confirmation).await.map(|_| ()).map_err(|e| e.to_string())
        }
        None => gw
            .record_settlement(NewSettlement {
                group: group.clone(),
                payer: first.from,
                payee: first.to,
                amount: first.amount,
                external_ref: payment_id,
            })
            .await
            .map(|_| ())
            .map_err(|e| e.to_string()),
    };
    if let Err(e) = res {
        warn!(error = %e, "feed: settlement failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn equal_split_distributes_remainder_cents() {
        let members: Vec<MemberId> = ["a", "b", "c"].iter().map(|m| MemberId::new(*m)).collect();
        let shares = equal_split(1000, &members);
        let amounts: Vec<Amount> = shares.iter().map(|s| s.amount_owed).collect();
        assert_eq!(amounts, vec![dec!(3.34), dec!(3.33), dec!(3.33)]);
        assert_eq!(amounts.iter().copied().sum::<Amount>(), dec!(10.00));
    }

    #[test]
    fn equal_split_over_nobody_is_empty() {
        assert!(equal_split(500, &[]).is_empty());
    }
}
