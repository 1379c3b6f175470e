//! Cross-client reads for the planner and income views. Nothing here writes.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::debug;

use crate::balance::checked_add;
use crate::error::{LedgerError, Result};
use crate::models::{Client, ClientId, EntryKind, LedgerEntry, SessionState};
use crate::store::{entries_between, LedgerStore};

pub const DEFAULT_LOOKBACK_DAYS: u32 = 28;

#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub client: Client,
    pub count: usize,
    pub last_seen: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Revenue {
    Total { amount: Decimal, currency: Option<String> },
    /// The day's clients bill in more than one currency.
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySummary {
    pub count: usize,
    pub revenue: Revenue,
}

impl LedgerStore {
    pub fn entries_for_day(&self, date: NaiveDate, kind: EntryKind, known: &[Client]) -> Result<Vec<LedgerEntry>> {
        entries_for_day(self.conn(), date, kind, known)
    }

    pub fn days_with_entries_in_month(
        &self,
        month: NaiveDate,
        kind: EntryKind,
        known: &[Client],
    ) -> Result<BTreeSet<NaiveDate>> {
        days_with_entries_in_month(self.conn(), month, kind, known)
    }

    pub fn suggest_clients_for_weekday(
        &self,
        selected: NaiveDate,
        lookback_days: u32,
        known: &[Client],
    ) -> Result<Vec<Suggestion>> {
        suggest_clients_for_weekday(self.conn(), selected, lookback_days, known)
    }
}

pub fn start_of(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

pub fn month_bounds(month: NaiveDate) -> Result<(NaiveDateTime, NaiveDateTime)> {
    let first = month
        .with_day(1)
        .ok_or_else(|| LedgerError::Other(format!("no first day for {month}")))?;
    let next = first
        .checked_add_months(Months::new(1))
        .ok_or_else(|| LedgerError::Other(format!("month after {first} is out of range")))?;
    Ok((start_of(first), start_of(next)))
}

/// Entries of `kind` in `[from, to)` whose client is in `known`.
fn matching_entries(
    conn: &Connection,
    from: NaiveDateTime,
    to: NaiveDateTime,
    kind: EntryKind,
    known: &HashSet<ClientId>,
) -> Result<Vec<LedgerEntry>> {
    let mut dropped = 0usize;
    let entries: Vec<LedgerEntry> = entries_between(conn, from, to)?
        .into_iter()
        .filter(|e| e.kind == kind)
        .filter(|e| {
            let keep = known.contains(&e.client_id);
            if !keep {
                dropped += 1;
            }
            keep
        })
        .collect();
    if dropped > 0 {
        debug!(dropped, "skipped entries of clients outside the known set");
    }
    Ok(entries)
}

fn known_ids(known: &[Client]) -> HashSet<ClientId> {
    known.iter().map(|c| c.id).collect()
}

/// One day's entries across all clients, ordered by time of day.
pub fn entries_for_day(conn: &Connection, date: NaiveDate, kind: EntryKind, known: &[Client]) -> Result<Vec<LedgerEntry>> {
    let from = start_of(date);
    let mut entries = matching_entries(conn, from, from + Duration::days(1), kind, &known_ids(known))?;
    entries.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.client_id.cmp(&b.client_id)));
    Ok(entries)
}

pub fn days_with_entries_in_month(
    conn: &Connection,
    month: NaiveDate,
    kind: EntryKind,
    known: &[Client],
) -> Result<BTreeSet<NaiveDate>> {
    let (from, to) = month_bounds(month)?;
    Ok(matching_entries(conn, from, to, kind, &known_ids(known))?
        .into_iter()
        .map(|e| e.at.date())
        .collect())
}

/// Clients who had sessions on the same weekday as `selected` within the lookback window.
pub fn suggest_clients_for_weekday(
    conn: &Connection,
    selected: NaiveDate,
    lookback_days: u32,
    known: &[Client],
) -> Result<Vec<Suggestion>> {
    let from = start_of(selected - Duration::days(i64::from(lookback_days)));
    let to = start_of(selected) + Duration::days(1);
    let weekday = selected.weekday();

    let mut stats: HashMap<ClientId, (usize, NaiveDateTime)> = HashMap::new();
    for entry in matching_entries(conn, from, to, EntryKind::Session, &known_ids(known))? {
        if entry.at.weekday() != weekday {
            continue;
        }
        let slot = stats.entry(entry.client_id).or_insert((0, entry.at));
        slot.0 += 1;
        if entry.at > slot.1 {
            slot.1 = entry.at;
        }
    }

    let mut suggestions: Vec<Suggestion> = known
        .iter()
        .filter_map(|client| {
            stats.get(&client.id).map(|(count, last_seen)| Suggestion {
                client: client.clone(),
                count: *count,
                last_seen: *last_seen,
            })
        })
        .collect();
    suggestions.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
            .then_with(|| a.client.file_number.cmp(&b.client.file_number))
    });
    Ok(suggestions)
}

/// Count and revenue of a day's entries, leaving out canceled sessions.
pub fn summarize_day(entries: &[LedgerEntry], known: &[Client]) -> Result<DaySummary> {
    let by_id: HashMap<ClientId, &Client> = known.iter().map(|c| (c.id, c)).collect();
    let active: Vec<&LedgerEntry> = entries
        .iter()
        .filter(|e| by_id.contains_key(&e.client_id))
        .filter(|e| e.state != Some(SessionState::Canceled))
        .collect();

    let currencies: BTreeSet<&str> = active
        .iter()
        .filter_map(|e| by_id.get(&e.client_id))
        .map(|c| c.currency.as_str())
        .filter(|c| !c.is_empty())
        .collect();

    let revenue = if currencies.len() > 1 {
        Revenue::Mixed
    } else {
        let amount = active
            .iter()
            .try_fold(Decimal::ZERO, |total, e| checked_add(total, e.amount, "day revenue"))?;
        Revenue::Total { amount, currency: currencies.into_iter().next().map(str::to_string) }
    };
    Ok(DaySummary { count: active.len(), revenue })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LedgerInput;
    use crate::testutil::{at, sample_client, test_store};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_entries_for_day_bounds_and_kind() {
        let (_dir, store) = test_store();
        let a = store.create_client(&sample_client("F-1", dec!(0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 5, 6, 0, 0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 5, 6, 23, 59))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 5, 7, 0, 0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 5, 5, 23, 59))).unwrap();
        store.add(a, LedgerInput::payment(dec!(100), at(2025, 5, 6, 12, 0))).unwrap();

        let known = store.clients().unwrap();
        let sessions = store.entries_for_day(date(2025, 5, 6), EntryKind::Session, &known).unwrap();
        assert_eq!(sessions.len(), 2);
        assert!(sessions[0].at < sessions[1].at);
        assert!(sessions.iter().all(|e| e.client_id == a));

        let payments = store.entries_for_day(date(2025, 5, 6), EntryKind::Payment, &known).unwrap();
        assert_eq!(payments.len(), 1);
    }

    #[test]
    fn test_unknown_clients_are_dropped() {
        let (_dir, store) = test_store();
        let a = store.create_client(&sample_client("F-1", dec!(0))).unwrap();
        let b = store.create_client(&sample_client("F-2", dec!(0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 5, 6, 9, 0))).unwrap();
        store.add(b, LedgerInput::session(dec!(100), at(2025, 5, 20, 9, 0))).unwrap();

        let only_a: Vec<Client> = store.clients().unwrap().into_iter().filter(|c| c.id == a).collect();
        let days = store.days_with_entries_in_month(date(2025, 5, 15), EntryKind::Session, &only_a).unwrap();
        assert_eq!(days.into_iter().collect::<Vec<_>>(), vec![date(2025, 5, 6)]);

        let day = store.entries_for_day(date(2025, 5, 20), EntryKind::Session, &only_a).unwrap();
        assert!(day.is_empty());
    }

    #[test]
    fn test_days_with_entries_in_month() {
        let (_dir, store) = test_store();
        let a = store.create_client(&sample_client("F-1", dec!(0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2024, 12, 31, 18, 0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 1, 1, 9, 0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 1, 1, 15, 0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 1, 31, 20, 0))).unwrap();
        store.add(a, LedgerInput::payment(dec!(100), at(2025, 1, 15, 9, 0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 2, 1, 0, 0))).unwrap();

        let known = store.clients().unwrap();
        let days = store.days_with_entries_in_month(date(2025, 1, 20), EntryKind::Session, &known).unwrap();
        assert_eq!(days.into_iter().collect::<Vec<_>>(), vec![date(2025, 1, 1), date(2025, 1, 31)]);

        let december = store.days_with_entries_in_month(date(2024, 12, 1), EntryKind::Session, &known).unwrap();
        assert_eq!(december.len(), 1);
    }

    #[test]
    fn test_weekday_suggestions_rank_by_frequency() {
        let (_dir, store) = test_store();
        let a = store.create_client(&sample_client("A", dec!(0))).unwrap();
        let b = store.create_client(&sample_client("B", dec!(0))).unwrap();
        let c = store.create_client(&sample_client("C", dec!(0))).unwrap();
        // 2025-06-03, 10 and 17 are Tuesdays.
        store.add(a, LedgerInput::session(dec!(100), at(2025, 6, 3, 10, 0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 6, 10, 10, 0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 6, 17, 10, 0))).unwrap();
        store.add(b, LedgerInput::session(dec!(100), at(2025, 6, 17, 11, 0))).unwrap();
        store.add(c, LedgerInput::session(dec!(100), at(2025, 6, 18, 11, 0))).unwrap();
        store.add(c, LedgerInput::payment(dec!(100), at(2025, 6, 17, 11, 0))).unwrap();

        let known = store.clients().unwrap();
        let picks = store.suggest_clients_for_weekday(date(2025, 6, 24), DEFAULT_LOOKBACK_DAYS, &known).unwrap();
        let ids: Vec<ClientId> = picks.iter().map(|s| s.client.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(picks[0].count, 3);
        assert_eq!(picks[0].last_seen, at(2025, 6, 17, 10, 0));
    }

    #[test]
    fn test_weekday_suggestions_break_ties_by_recency_and_respect_window() {
        let (_dir, store) = test_store();
        let a = store.create_client(&sample_client("A", dec!(0))).unwrap();
        let b = store.create_client(&sample_client("B", dec!(0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 6, 3, 10, 0))).unwrap();
        store.add(b, LedgerInput::session(dec!(100), at(2025, 6, 17, 10, 0))).unwrap();
        // Outside a 28-day window ending 2025-06-24.
        store.add(a, LedgerInput::session(dec!(100), at(2025, 5, 20, 10, 0))).unwrap();

        let known = store.clients().unwrap();
        let picks = store.suggest_clients_for_weekday(date(2025, 6, 24), 28, &known).unwrap();
        let ids: Vec<ClientId> = picks.iter().map(|s| s.client.id).collect();
        assert_eq!(ids, vec![b, a]);
        assert_eq!(picks[1].count, 1);
    }

    #[test]
    fn test_summarize_day_skips_canceled_and_flags_mixed_currency() {
        let (_dir, store) = test_store();
        let a = store.create_client(&sample_client("A", dec!(0))).unwrap();
        let mut euro = sample_client("B", dec!(0));
        euro.currency = "EUR".into();
        let b = store.create_client(&euro).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 6, 3, 9, 0))).unwrap();
        store
            .add(a, LedgerInput::session(dec!(100), at(2025, 6, 3, 10, 0)).with_state(SessionState::Canceled))
            .unwrap();

        let known = store.clients().unwrap();
        let day = store.entries_for_day(date(2025, 6, 3), EntryKind::Session, &known).unwrap();
        let summary = summarize_day(&day, &known).unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.revenue, Revenue::Total { amount: dec!(100), currency: Some("USD".into()) });

        store.add(b, LedgerInput::session(dec!(80), at(2025, 6, 3, 11, 0))).unwrap();
        let day = store.entries_for_day(date(2025, 6, 3), EntryKind::Session, &known).unwrap();
        let summary = summarize_day(&day, &known).unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.revenue, Revenue::Mixed);
    }

    #[test]
    fn test_day_revenue_past_decimal_range_is_an_error() {
        let (_dir, store) = test_store();
        let a = store.create_client(&sample_client("A", dec!(0))).unwrap();
        store.add(a, LedgerInput::session(Decimal::MAX, at(2025, 6, 3, 9, 0))).unwrap();
        store.add(a, LedgerInput::session(Decimal::MAX, at(2025, 6, 3, 10, 0))).unwrap();

        let known = store.clients().unwrap();
        let day = store.entries_for_day(date(2025, 6, 3), EntryKind::Session, &known).unwrap();
        assert!(matches!(summarize_day(&day, &known), Err(LedgerError::Overflow { .. })));
    }

    #[test]
    fn test_queries_do_not_touch_cache() {
        let (_dir, store) = test_store();
        let a = store.create_client(&sample_client("A", dec!(0))).unwrap();
        store.add(a, LedgerInput::session(dec!(100), at(2025, 6, 3, 9, 0))).unwrap();
        let before = store.client(a).unwrap();
        let known = store.clients().unwrap();
        store.entries_for_day(date(2025, 6, 3), EntryKind::Session, &known).unwrap();
        store.days_with_entries_in_month(date(2025, 6, 3), EntryKind::Session, &known).unwrap();
        store.suggest_clients_for_weekday(date(2025, 6, 10), 28, &known).unwrap();
        assert_eq!(store.client(a).unwrap(), before);
    }
}
