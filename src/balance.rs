use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};
use crate::models::{EntryKind, LedgerEntry};

/// Totals derived from a client's ledger. Positive `remain` means the client owes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceSnapshot {
    pub meetings_total: Decimal,
    pub paid_total: Decimal,
    pub remain: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceStatus {
    Debt,
    Settled,
    Credit,
}

impl BalanceStatus {
    pub fn of(remain: Decimal) -> Self {
        if remain > Decimal::ZERO {
            Self::Debt
        } else if remain < Decimal::ZERO {
            Self::Credit
        } else {
            Self::Settled
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Debt => "owes",
            Self::Settled => "settled",
            Self::Credit => "credit",
        }
    }
}

impl BalanceSnapshot {
    pub fn status(&self) -> BalanceStatus {
        BalanceStatus::of(self.remain)
    }
}

pub fn compute(entries: &[LedgerEntry], starting_balance: Decimal) -> Result<BalanceSnapshot> {
    compute_amounts(entries.iter().map(|e| (e.kind, e.amount)), starting_balance)
}

/// Sum `(kind, amount)` pairs. Session state is not consulted; `Other` kinds are skipped.
pub fn compute_amounts<I>(items: I, starting_balance: Decimal) -> Result<BalanceSnapshot>
where
    I: IntoIterator<Item = (EntryKind, Decimal)>,
{
    let mut meetings_total = Decimal::ZERO;
    let mut paid_total = Decimal::ZERO;
    for (kind, amount) in items {
        match kind {
            EntryKind::Session => meetings_total = checked_add(meetings_total, amount, "meetings total")?,
            EntryKind::Payment => paid_total = checked_add(paid_total, amount, "paid total")?,
            EntryKind::Other => {}
        }
    }
    Ok(BalanceSnapshot {
        meetings_total,
        paid_total,
        remain: remain_of(starting_balance, meetings_total, paid_total)?,
    })
}

pub(crate) fn checked_add(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal> {
    a.checked_add(b).ok_or(LedgerError::Overflow { what })
}

/// `base + meetings - paid`, failing instead of wrapping past the Decimal range.
pub(crate) fn remain_of(base: Decimal, meetings: Decimal, paid: Decimal) -> Result<Decimal> {
    base.checked_add(meetings)
        .and_then(|r| r.checked_sub(paid))
        .ok_or(LedgerError::Overflow { what: "remaining balance" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionState;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn entry(kind: EntryKind, amount: Decimal) -> LedgerEntry {
        LedgerEntry {
            id: Uuid::new_v4(),
            client_id: Uuid::nil(),
            kind,
            amount,
            at: NaiveDate::from_ymd_opt(2025, 3, 4).unwrap().and_hms_opt(10, 0, 0).unwrap(),
            note: String::new(),
            state: (kind == EntryKind::Session).then_some(SessionState::Scheduled),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_new_client_has_starting_balance() {
        let s = compute(&[], dec!(500)).unwrap();
        assert_eq!(s, BalanceSnapshot { meetings_total: dec!(0), paid_total: dec!(0), remain: dec!(500) });
        assert_eq!(s.status(), BalanceStatus::Debt);
    }

    #[test]
    fn test_settle_up() {
        let entries = vec![
            entry(EntryKind::Session, dec!(200)),
            entry(EntryKind::Session, dec!(150)),
            entry(EntryKind::Payment, dec!(350)),
        ];
        let s = compute(&entries, dec!(0)).unwrap();
        assert_eq!(s.meetings_total, dec!(350));
        assert_eq!(s.paid_total, dec!(350));
        assert_eq!(s.remain, dec!(0));
        assert_eq!(s.status(), BalanceStatus::Settled);
    }

    #[test]
    fn test_credit() {
        let entries = vec![entry(EntryKind::Session, dec!(100)), entry(EntryKind::Payment, dec!(200))];
        let s = compute(&entries, dec!(-50)).unwrap();
        assert_eq!(s.remain, dec!(-150));
        assert_eq!(s.status(), BalanceStatus::Credit);
    }

    #[test]
    fn test_unknown_kinds_are_ignored() {
        let entries = vec![entry(EntryKind::Other, dec!(999)), entry(EntryKind::Session, dec!(80))];
        let s = compute(&entries, dec!(0)).unwrap();
        assert_eq!(s.meetings_total, dec!(80));
        assert_eq!(s.paid_total, dec!(0));
    }

    #[test]
    fn test_canceled_sessions_still_count() {
        let mut canceled = entry(EntryKind::Session, dec!(120));
        canceled.state = Some(SessionState::Canceled);
        let s = compute(&[canceled], dec!(0)).unwrap();
        assert_eq!(s.meetings_total, dec!(120));
    }

    #[test]
    fn test_order_does_not_matter() {
        let amounts = [dec!(0.1), dec!(0.2), dec!(33.33), dec!(0.07), dec!(1200.5), dec!(19.99)];
        let mut entries: Vec<LedgerEntry> = amounts
            .iter()
            .enumerate()
            .map(|(i, a)| entry(if i % 2 == 0 { EntryKind::Session } else { EntryKind::Payment }, *a))
            .collect();
        let expected = compute(&entries, dec!(12.34)).unwrap();
        for _ in 0..entries.len() {
            entries.rotate_left(1);
            assert_eq!(compute(&entries, dec!(12.34)).unwrap(), expected);
        }
        entries.reverse();
        assert_eq!(compute(&entries, dec!(12.34)).unwrap(), expected);
    }

    #[test]
    fn test_many_small_payments_do_not_drift() {
        let mut entries = vec![entry(EntryKind::Session, dec!(100))];
        entries.extend((0..1000).map(|_| entry(EntryKind::Payment, dec!(0.1))));
        let s = compute(&entries, dec!(0)).unwrap();
        assert_eq!(s.paid_total, dec!(100));
        assert_eq!(s.remain, dec!(0));
    }

    #[test]
    fn test_overflow_is_an_error_not_a_panic() {
        let entries = vec![entry(EntryKind::Session, Decimal::MAX), entry(EntryKind::Session, Decimal::MAX)];
        assert!(matches!(compute(&entries, dec!(0)), Err(LedgerError::Overflow { .. })));

        let entries = vec![entry(EntryKind::Session, Decimal::MAX)];
        assert!(matches!(compute(&entries, dec!(1)), Err(LedgerError::Overflow { .. })));
        assert_eq!(compute(&entries, dec!(0)).unwrap().remain, Decimal::MAX);
    }
}
