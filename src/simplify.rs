// ===============================
// src/simplify.rs (debt simplifier)
// ===============================
//
// Greedy two-pointer matching of debtors against creditors:
// - |balance| <= epsilon           -> settled, dropped
// - debtors most-negative first, creditors most-positive first, ties by member id
// - each step settles min(|debt|, credit); the side that reaches < epsilon advances
//
// Every step zeroes at least one side (exact decimal arithmetic), so the plan
// never exceeds debtors + creditors - 1 <= member_count - 1 instructions.
// Not a proof of global minimality; it only biases toward clearing the largest
// imbalances first.
//
use crate::balance::{net_balances, BalanceSheet};
use crate::domain::{Expense, MemberId, SettlementInstruction, SettlementTransaction};
use crate::money::{round2, Amount, SETTLE_EPSILON};

/// Settlement tolerance. Always strictly positive: with a zero tolerance a
/// fully matched side would never advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimplifyCfg {
    epsilon: Amount,
}

impl SimplifyCfg {
    /// None unless `epsilon > 0`.
    pub fn new(epsilon: Amount) -> Option<Self> {
        (epsilon > Amount::ZERO).then_some(Self { epsilon })
    }

    pub fn epsilon(&self) -> Amount {
        self.epsilon
    }
}

impl Default for SimplifyCfg {
    fn default() -> Self {
        Self { epsilon: SETTLE_EPSILON }
    }
}

struct Slot {
    member: MemberId,
    amount: Amount,
}

pub fn simplify(sheet: &BalanceSheet, cfg: &SimplifyCfg) -> Vec<SettlementInstruction> {
    let eps = cfg.epsilon;
    let mut debtors: Vec<Slot> = Vec::new();
    let mut creditors: Vec<Slot> = Vec::new();

    for (member, bal) in sheet.balances.iter() {
        if *bal < -eps {
            debtors.push(Slot { member: member.clone(), amount: *bal });
        } else if *bal > eps {
            creditors.push(Slot { member: member.clone(), amount: *bal });
        }
    }

    debtors.sort_by(|a, b| a.amount.cmp(&b.amount).then_with(|| a.member.cmp(&b.member)));
    creditors.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.member.cmp(&b.member)));

    let mut out = Vec::with_capacity(debtors.len().min(creditors.len()));
    let (mut i, mut j) = (0usize, 0usize);

    while i < debtors.len() && j < creditors.len() {
        let debt = debtors[i].amount.abs();
        let credit = creditors[j].amount;
        let amount = debt.min(credit);

        let shown = round2(amount);
        if shown >= eps {
            out.push(SettlementInstruction {
                from: debtors[i].member.clone(),
                to: creditors[j].member.clone(),
                amount: shown,
            });
        }

        debtors[i].amount += amount;
        creditors[j].amount -= amount;

        if debtors[i].amount.abs() < eps {
            i += 1;
        }
        if creditors[j].amount < eps {
            j += 1;
        }
    }

    out
}

/// Boundary entry point: membership + history in, settlement plan out.
/// Callers pass success-only settlements; anything else is ignored.
pub fn compute_settlement(
    members: &[MemberId],
    expenses: &[Expense],
    settlements: &[SettlementTransaction],
    cfg: &SimplifyCfg,
) -> Vec<SettlementInstruction> {
    let sheet = net_balances(members, expenses, settlements);
    simplify(&sheet, cfg)
}
