//! Cached balance totals on the client record.
//!
//! `recompute_and_cache` rebuilds the cache from every ledger entry and is the
//! authoritative refresh. `adjust_cache` adds a precomputed delta without
//! looking at the ledger; it is only correct when paired with the writes that
//! produced the delta.

use std::ops::Neg;

use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::balance::{checked_add, compute, remain_of, BalanceSnapshot};
use crate::clients::{self, get_client};
use crate::db::now_stamp;
use crate::error::Result;
use crate::models::{ClientId, EntryId, EntryKind, LedgerEntry, LedgerInput, LedgerPatch};
use crate::store::{delete_entry, insert_entry, list_entries, update_entry, LedgerStore};

/// Change to apply to a client's cached totals. `remain` moves by `meetings - paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheDelta {
    pub meetings: Decimal,
    pub paid: Decimal,
}

impl CacheDelta {
    pub fn new(meetings: Decimal, paid: Decimal) -> Self {
        Self { meetings, paid }
    }

    pub fn from_amount(kind: EntryKind, amount: Decimal) -> Self {
        match kind {
            EntryKind::Session => Self::new(amount, Decimal::ZERO),
            EntryKind::Payment => Self::new(Decimal::ZERO, amount),
            EntryKind::Other => Self::default(),
        }
    }

    pub fn for_input(input: &LedgerInput) -> Self {
        Self::from_amount(input.kind, input.amount_or_zero())
    }

    pub fn for_entry(entry: &LedgerEntry) -> Self {
        Self::from_amount(entry.kind, entry.amount)
    }

    /// The delta that undoes `entry`, for use after deleting it.
    pub fn reversal(entry: &LedgerEntry) -> Self {
        -Self::for_entry(entry)
    }

    pub fn remain(&self) -> Result<Decimal> {
        remain_of(Decimal::ZERO, self.meetings, self.paid)
    }

    pub fn is_zero(&self) -> bool {
        self.meetings.is_zero() && self.paid.is_zero()
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        Ok(Self::new(
            checked_add(self.meetings, rhs.meetings, "meetings total")?,
            checked_add(self.paid, rhs.paid, "paid total")?,
        ))
    }
}

impl Neg for CacheDelta {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.meetings, -self.paid)
    }
}

/// Cached totals next to a fresh computation, without writing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheCheck {
    pub cached: BalanceSnapshot,
    pub actual: BalanceSnapshot,
}

impl CacheCheck {
    pub fn is_consistent(&self) -> bool {
        self.cached == self.actual
    }
}

impl LedgerStore {
    pub fn recompute_and_cache(&self, client_id: ClientId, starting_balance: Decimal) -> Result<BalanceSnapshot> {
        let snapshot = recompute_and_cache(self.conn(), client_id, starting_balance)?;
        self.publish_clients();
        Ok(snapshot)
    }

    /// Recompute using the starting balance stored on the client.
    pub fn recompute_client(&self, client_id: ClientId) -> Result<BalanceSnapshot> {
        let client = self.client(client_id)?;
        self.recompute_and_cache(client_id, client.starting_balance)
    }

    /// Recompute every client; returns how many caches were out of date.
    pub fn recompute_all(&self) -> Result<usize> {
        let mut stale = 0;
        for client in self.clients()? {
            let snapshot = recompute_and_cache(self.conn(), client.id, client.starting_balance)?;
            if snapshot != client.cached_snapshot() {
                warn!(client_id = %client.id, "cached totals were stale");
                stale += 1;
            }
        }
        info!(stale, "recomputed all client balances");
        self.publish_clients();
        Ok(stale)
    }

    pub fn adjust_cache(&self, client_id: ClientId, delta: CacheDelta) -> Result<BalanceSnapshot> {
        let snapshot = adjust_cache(self.conn(), client_id, delta)?;
        self.publish_clients();
        Ok(snapshot)
    }

    pub fn check_cache(&self, client_id: ClientId) -> Result<CacheCheck> {
        check_cache(self.conn(), client_id)
    }

    /// Insert an entry and apply its delta to the cached totals in one transaction.
    pub fn add_and_adjust(&self, client_id: ClientId, input: &LedgerInput) -> Result<(EntryId, BalanceSnapshot)> {
        let tx = Transaction::new_unchecked(self.conn(), TransactionBehavior::Immediate)?;
        let id = insert_entry(&tx, client_id, input)?;
        let snapshot = apply_delta(&tx, client_id, CacheDelta::for_input(input))?;
        tx.commit()?;
        debug!(%client_id, entry_id = %id, kind = %input.kind, "ledger entry added");
        self.publish_ledger(client_id);
        self.publish_clients();
        Ok((id, snapshot))
    }

    /// Delete an entry and reverse its effect on the cached totals in one transaction.
    pub fn delete_and_adjust(&self, client_id: ClientId, entry_id: EntryId) -> Result<(LedgerEntry, BalanceSnapshot)> {
        let tx = Transaction::new_unchecked(self.conn(), TransactionBehavior::Immediate)?;
        let entry = delete_entry(&tx, client_id, entry_id)?;
        let snapshot = apply_delta(&tx, client_id, CacheDelta::reversal(&entry))?;
        tx.commit()?;
        self.publish_ledger(client_id);
        self.publish_clients();
        Ok((entry, snapshot))
    }

    /// Edit an entry and rebuild the client's cached totals from the ledger in one transaction.
    pub fn update_and_recompute(
        &self,
        client_id: ClientId,
        entry_id: EntryId,
        patch: &LedgerPatch,
    ) -> Result<BalanceSnapshot> {
        let tx = Transaction::new_unchecked(self.conn(), TransactionBehavior::Immediate)?;
        update_entry(&tx, client_id, entry_id, patch)?;
        let client = get_client(&tx, client_id)?;
        let snapshot = recompute_in(&tx, client_id, client.starting_balance)?;
        tx.commit()?;
        self.publish_ledger(client_id);
        self.publish_clients();
        Ok(snapshot)
    }
}

/// Rebuild the cached totals from the full ledger in one transaction.
pub fn recompute_and_cache(conn: &Connection, client_id: ClientId, starting_balance: Decimal) -> Result<BalanceSnapshot> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let snapshot = recompute_in(&tx, client_id, starting_balance)?;
    tx.commit()?;
    Ok(snapshot)
}

/// Rebuild inside the caller's transaction.
pub(crate) fn recompute_in(conn: &Connection, client_id: ClientId, starting_balance: Decimal) -> Result<BalanceSnapshot> {
    clients::ensure_exists(conn, client_id)?;
    let entries = list_entries(conn, client_id)?;
    let snapshot = compute(&entries, starting_balance)?;
    write_cached_totals(conn, client_id, &snapshot)?;
    debug!(
        %client_id,
        entries = entries.len(),
        remain = %snapshot.remain,
        "recomputed cached totals"
    );
    Ok(snapshot)
}

pub fn adjust_cache(conn: &Connection, client_id: ClientId, delta: CacheDelta) -> Result<BalanceSnapshot> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let snapshot = apply_delta(&tx, client_id, delta)?;
    tx.commit()?;
    Ok(snapshot)
}

/// Increment the cached totals inside the caller's transaction.
pub(crate) fn apply_delta(conn: &Connection, client_id: ClientId, delta: CacheDelta) -> Result<BalanceSnapshot> {
    let client = get_client(conn, client_id)?;
    let snapshot = BalanceSnapshot {
        meetings_total: checked_add(client.cached_meetings_total, delta.meetings, "meetings total")?,
        paid_total: checked_add(client.cached_paid_total, delta.paid, "paid total")?,
        remain: remain_of(client.cached_remain, delta.meetings, delta.paid)?,
    };
    write_cached_totals(conn, client_id, &snapshot)?;
    debug!(
        %client_id,
        meetings = %delta.meetings,
        paid = %delta.paid,
        "adjusted cached totals"
    );
    Ok(snapshot)
}

pub fn write_cached_totals(conn: &Connection, client_id: ClientId, snapshot: &BalanceSnapshot) -> Result<()> {
    let changed = conn.execute(
        "UPDATE clients SET cached_meetings_total = ?1, cached_paid_total = ?2, cached_remain = ?3, \
         updated_at = ?4 WHERE id = ?5",
        params![
            snapshot.meetings_total.to_string(),
            snapshot.paid_total.to_string(),
            snapshot.remain.to_string(),
            now_stamp(),
            client_id.to_string(),
        ],
    )?;
    if changed == 0 {
        return Err(crate::error::LedgerError::client_not_found(client_id));
    }
    Ok(())
}

pub fn check_cache(conn: &Connection, client_id: ClientId) -> Result<CacheCheck> {
    let client = get_client(conn, client_id)?;
    let entries = list_entries(conn, client_id)?;
    Ok(CacheCheck {
        cached: client.cached_snapshot(),
        actual: compute(&entries, client.starting_balance)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use crate::testutil::{at, sample_client, test_store};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn test_recompute_is_idempotent() {
        let (_dir, store) = test_store();
        let id = store.create_client(&sample_client("F-1", dec!(25))).unwrap();
        store.add(id, LedgerInput::session(dec!(100), at(2025, 1, 7, 10, 0))).unwrap();
        store.add(id, LedgerInput::payment(dec!(40.5), at(2025, 1, 8, 10, 0))).unwrap();

        let first = store.recompute_and_cache(id, dec!(25)).unwrap();
        let cached_first = store.client(id).unwrap().cached_snapshot();
        let second = store.recompute_and_cache(id, dec!(25)).unwrap();
        let cached_second = store.client(id).unwrap().cached_snapshot();

        assert_eq!(first, second);
        assert_eq!(cached_first, cached_second);
        assert_eq!(cached_second.remain, dec!(84.5));
    }

    #[test]
    fn test_add_session_then_recompute_moves_totals_by_amount() {
        let (_dir, store) = test_store();
        let id = store.create_client(&sample_client("F-1", dec!(-30))).unwrap();
        store.add(id, LedgerInput::payment(dec!(70), at(2025, 1, 3, 10, 0))).unwrap();
        store.recompute_client(id).unwrap();
        let before = store.client(id).unwrap();

        store.add(id, LedgerInput::session(dec!(100), at(2025, 1, 7, 10, 0))).unwrap();
        store.recompute_client(id).unwrap();
        let after = store.client(id).unwrap();

        assert_eq!(after.cached_meetings_total - before.cached_meetings_total, dec!(100));
        assert_eq!(after.cached_remain - before.cached_remain, dec!(100));
        assert_eq!(after.cached_paid_total, before.cached_paid_total);
    }

    #[test]
    fn test_incremental_matches_full_recompute() {
        let (_dir, store) = test_store();
        let id = store.create_client(&sample_client("F-1", dec!(12.75))).unwrap();
        let inputs = vec![
            LedgerInput::session(dec!(120), at(2025, 2, 4, 9, 0)),
            LedgerInput::payment(dec!(0.1), at(2025, 2, 4, 9, 30)),
            LedgerInput::session(dec!(85.33), at(2025, 2, 11, 9, 0)),
            LedgerInput::payment(dec!(200), at(2025, 2, 12, 9, 0)),
            LedgerInput::session(dec!(120), at(2025, 2, 18, 9, 0)).with_state(crate::models::SessionState::Canceled),
            LedgerInput::payment(dec!(0.2), at(2025, 2, 19, 9, 0)),
        ];
        for input in inputs {
            let delta = CacheDelta::for_input(&input);
            store.add(id, input).unwrap();
            store.adjust_cache(id, delta).unwrap();
        }
        let incremental = store.client(id).unwrap().cached_snapshot();
        let full = store.recompute_and_cache(id, dec!(12.75)).unwrap();
        assert_eq!(incremental, full);
        assert!(store.check_cache(id).unwrap().is_consistent());
    }

    #[test]
    fn test_delete_then_recompute_is_exact() {
        let (_dir, store) = test_store();
        let id = store.create_client(&sample_client("F-1", dec!(0))).unwrap();
        store.add(id, LedgerInput::session(dec!(33.33), at(2025, 3, 1, 10, 0))).unwrap();
        store.add(id, LedgerInput::payment(dec!(10.01), at(2025, 3, 2, 10, 0))).unwrap();
        let baseline = store.recompute_client(id).unwrap();

        let extra = store.add(id, LedgerInput::payment(dec!(0.07), at(2025, 3, 3, 10, 0))).unwrap();
        let with_extra = store.recompute_client(id).unwrap();
        assert_ne!(with_extra, baseline);

        store.delete(id, extra).unwrap();
        assert_eq!(store.recompute_client(id).unwrap(), baseline);
        assert_eq!(store.client(id).unwrap().cached_snapshot(), baseline);
    }

    #[test]
    fn test_delete_with_reversal_delta_matches_recompute() {
        let (_dir, store) = test_store();
        let id = store.create_client(&sample_client("F-1", dec!(0))).unwrap();
        let input = LedgerInput::session(dec!(150), at(2025, 3, 1, 10, 0));
        store.adjust_cache(id, CacheDelta::for_input(&input)).unwrap();
        let entry_id = store.add(id, input).unwrap();

        let removed = store.delete(id, entry_id).unwrap();
        let adjusted = store.adjust_cache(id, CacheDelta::reversal(&removed)).unwrap();
        assert_eq!(adjusted, store.recompute_client(id).unwrap());
        assert_eq!(adjusted.remain, dec!(0));
    }

    #[test]
    fn test_recompute_repairs_drift() {
        let (_dir, store) = test_store();
        let id = store.create_client(&sample_client("F-1", dec!(0))).unwrap();
        store.add(id, LedgerInput::session(dec!(100), at(2025, 3, 1, 10, 0))).unwrap();
        store.adjust_cache(id, CacheDelta::new(dec!(999), dec!(0))).unwrap();
        assert!(!store.check_cache(id).unwrap().is_consistent());

        assert_eq!(store.recompute_all().unwrap(), 1);
        let client = store.client(id).unwrap();
        assert_eq!(client.cached_meetings_total, dec!(100));
        assert_eq!(client.cached_remain, dec!(100));
        assert_eq!(store.recompute_all().unwrap(), 0);
    }

    #[test]
    fn test_adjust_and_recompute_unknown_client() {
        let (_dir, store) = test_store();
        let missing = Uuid::new_v4();
        assert!(matches!(
            store.adjust_cache(missing, CacheDelta::new(dec!(1), dec!(0))),
            Err(LedgerError::NotFound { .. })
        ));
        assert!(matches!(store.recompute_and_cache(missing, dec!(0)), Err(LedgerError::NotFound { .. })));
    }

    #[test]
    fn test_delta_arithmetic() {
        let d = CacheDelta::from_amount(EntryKind::Session, dec!(100))
            .checked_add(CacheDelta::from_amount(EntryKind::Payment, dec!(30)))
            .unwrap()
            .checked_add(CacheDelta::from_amount(EntryKind::Other, dec!(5)))
            .unwrap();
        assert_eq!(d, CacheDelta::new(dec!(100), dec!(30)));
        assert_eq!(d.remain().unwrap(), dec!(70));
        assert!(d.checked_add(-d).unwrap().is_zero());
        assert!(matches!(
            CacheDelta::new(Decimal::MAX, dec!(0)).checked_add(CacheDelta::new(dec!(1), dec!(0))),
            Err(LedgerError::Overflow { .. })
        ));
    }

    #[test]
    fn test_totals_past_decimal_range_fail_cleanly() {
        let (_dir, store) = test_store();
        let id = store.create_client(&sample_client("F-1", dec!(0))).unwrap();
        store.add(id, LedgerInput::session(Decimal::MAX, at(2025, 3, 1, 10, 0))).unwrap();
        store.add(id, LedgerInput::session(Decimal::MAX, at(2025, 3, 2, 10, 0))).unwrap();
        let before = store.client(id).unwrap().cached_snapshot();

        assert!(matches!(store.recompute_client(id), Err(LedgerError::Overflow { .. })));
        assert!(matches!(store.check_cache(id), Err(LedgerError::Overflow { .. })));
        assert_eq!(store.client(id).unwrap().cached_snapshot(), before);

        store.adjust_cache(id, CacheDelta::new(Decimal::MAX, dec!(0))).unwrap();
        assert!(matches!(
            store.adjust_cache(id, CacheDelta::new(dec!(1), dec!(0))),
            Err(LedgerError::Overflow { .. })
        ));
        assert_eq!(store.client(id).unwrap().cached_meetings_total, Decimal::MAX);
    }

    #[test]
    fn test_delete_and_adjust_is_one_step() {
        let (_dir, store) = test_store();
        let id = store.create_client(&sample_client("F-1", dec!(10))).unwrap();
        store
            .commit_batch(&[
                (id, LedgerInput::session(dec!(120), at(2025, 3, 1, 10, 0))),
                (id, LedgerInput::payment(dec!(50), at(2025, 3, 1, 11, 0))),
            ])
            .unwrap();
        let payment = store.list(id).unwrap()[0].id;

        let (removed, snapshot) = store.delete_and_adjust(id, payment).unwrap();
        assert_eq!(removed.kind, EntryKind::Payment);
        assert_eq!(snapshot.remain, dec!(130));
        assert_eq!(store.client(id).unwrap().cached_snapshot(), snapshot);
        assert!(store.check_cache(id).unwrap().is_consistent());
    }

    #[test]
    fn test_delete_and_adjust_rolls_back_when_cache_write_fails() {
        let (_dir, store) = test_store();
        let id = store.create_client(&sample_client("F-1", dec!(0))).unwrap();
        store.commit_batch(&[(id, LedgerInput::session(dec!(120), at(2025, 3, 1, 10, 0)))]).unwrap();
        let entry = store.list(id).unwrap()[0].id;
        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER cache_locked BEFORE UPDATE ON clients \
                 BEGIN SELECT RAISE(ABORT, 'store unavailable'); END;",
            )
            .unwrap();

        assert!(store.delete_and_adjust(id, entry).is_err());
        assert_eq!(store.list(id).unwrap().len(), 1);
        assert!(store.check_cache(id).unwrap().is_consistent());
    }

    #[test]
    fn test_update_and_recompute() {
        let (_dir, store) = test_store();
        let id = store.create_client(&sample_client("F-1", dec!(0))).unwrap();
        store.commit_batch(&[(id, LedgerInput::session(dec!(120), at(2025, 3, 1, 10, 0)))]).unwrap();
        let entry = store.list(id).unwrap()[0].id;

        let patch = LedgerPatch { amount: Some(dec!(90)), ..Default::default() };
        let snapshot = store.update_and_recompute(id, entry, &patch).unwrap();
        assert_eq!(snapshot.meetings_total, dec!(90));
        assert_eq!(store.client(id).unwrap().cached_remain, dec!(90));

        let missing = Uuid::new_v4();
        assert!(matches!(store.update_and_recompute(id, missing, &patch), Err(LedgerError::NotFound { .. })));
    }

    #[test]
    fn test_add_and_adjust_keeps_cache_in_step() {
        let (_dir, store) = test_store();
        let id = store.create_client(&sample_client("F-1", dec!(10))).unwrap();
        store.recompute_client(id).unwrap();

        let (entry, snapshot) = store.add_and_adjust(id, &LedgerInput::session(dec!(120), at(2025, 3, 1, 10, 0))).unwrap();
        assert_eq!(snapshot.remain, dec!(130));
        assert_eq!(store.entry(id, entry).unwrap().amount, dec!(120));
        assert!(store.check_cache(id).unwrap().is_consistent());

        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER cache_locked BEFORE UPDATE ON clients \
                 BEGIN SELECT RAISE(ABORT, 'store unavailable'); END;",
            )
            .unwrap();
        assert!(store.add_and_adjust(id, &LedgerInput::payment(dec!(50), at(2025, 3, 2, 10, 0))).is_err());
        assert_eq!(store.list(id).unwrap().len(), 1);
        assert!(store.check_cache(id).unwrap().is_consistent());
    }
}
