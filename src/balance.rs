// ===============================
// src/balance.rs (net balance calculator)
// ===============================
//
// Net balance per member:
//   + every split share the member paid for on someone's behalf
//   - every split share the member owes
//   + settlements the member paid out (reduces what they owed)
//   - settlements the member received
//
// Pure summation, so input order does not matter. Parties that are not in the
// group are skipped and counted in `skipped_refs`.
//
use ahash::AHashMap as HashMap;
use tracing::debug;

use crate::domain::{
    Expense, GroupLedgerSnapshot, MemberId, SettlementStatus, SettlementTransaction,
};
use crate::money::Amount;

#[derive(Debug, Clone, Default)]
pub struct BalanceSheet {
    pub balances: HashMap<MemberId, Amount>,
    /// Split shares, payers or settlement parties that referenced a non-member.
    pub skipped_refs: usize,
    /// Non-success settlements that were handed in and ignored.
    pub ignored_settlements: usize,
}

impl BalanceSheet {
    pub fn get(&self, m: &MemberId) -> Amount {
        self.balances.get(m).copied().unwrap_or_default()
    }

    pub fn total(&self) -> Amount {
        self.balances.values().copied().sum()
    }

    /// Balances sorted by member id.
    pub fn sorted(&self) -> Vec<(MemberId, Amount)> {
        let mut out: Vec<(MemberId, Amount)> =
            self.balances.iter().map(|(m, a)| (m.clone(), *a)).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

pub fn net_balances(
    members: &[MemberId],
    expenses: &[Expense],
    settlements: &[SettlementTransaction],
) -> BalanceSheet {
    let mut sheet = BalanceSheet::default();
    for m in members {
        sheet.balances.insert(m.clone(), Amount::ZERO);
    }

    for exp in expenses {
        for split in &exp.splits {
            // The transfer is one unit: debtor down, payer up. If either side is
            // unknown, neither leg is applied so the sheet stays zero-sum.
            // Do not switch to applying the known leg on its own: the sheet would
            // stop summing to zero.
            if !sheet.balances.contains_key(&split.member)
                || !sheet.balances.contains_key(&exp.payer)
            {
                sheet.skipped_refs += 1;
                debug!(expense = %exp.id, member = %split.member, payer = %exp.payer, "skip stale split reference");
                continue;
            }
            apply(&mut sheet.balances, &split.member, &exp.payer, split.amount_owed);
        }
    }

    for st in settlements {
        if st.status != SettlementStatus::Success {
            sheet.ignored_settlements += 1;
            continue;
        }
        if !sheet.balances.contains_key(&st.payer) || !sheet.balances.contains_key(&st.payee) {
            sheet.skipped_refs += 1;
            debug!(payer = %st.payer, payee = %st.payee, reference = %st.external_ref, "skip stale settlement reference");
            continue;
        }
        // payer's debt shrinks, payee is owed less
        apply(&mut sheet.balances, &st.payee, &st.payer, st.amount);
    }

    sheet
}

pub fn net_balances_for(snapshot: &GroupLedgerSnapshot) -> BalanceSheet {
    net_balances(&snapshot.members, &snapshot.expenses, &snapshot.settlements)
}

// `down` loses `amount`, `up` gains it.
fn apply(balances: &mut HashMap<MemberId, Amount>, down: &MemberId, up: &MemberId, amount: Amount) {
    if let Some(b) = balances.get_mut(down) {
        *b -= amount;
    }
    if let Some(b) = balances.get_mut(up) {
        *b += amount;
    }
}
