use colored::Colorize;
use comfy_table::{Cell, Table};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::balance::BalanceStatus;
use crate::cli::{open_store, parse_amount, parse_event_time};
use crate::error::{LedgerError, Result};
use crate::fmt::money;
use crate::models::{Client, EntryId, EntryKind, LedgerInput, LedgerPatch, SessionState};
use crate::store::LedgerStore;

fn parse_entry_id(raw: &str) -> Result<EntryId> {
    Uuid::parse_str(raw.trim()).map_err(|_| LedgerError::Validation(format!("'{raw}' is not an entry id")))
}

fn balance_line(name: &str, remain: Decimal, currency: &str) -> String {
    match BalanceStatus::of(remain) {
        BalanceStatus::Debt => format!("{name} owes {}", money(remain, currency)),
        BalanceStatus::Settled => format!("{name} is settled up"),
        BalanceStatus::Credit => format!("{name} has a credit of {}", money(-remain, currency)),
    }
}

fn print_balance(store: &LedgerStore, client: &Client) -> Result<()> {
    let updated = store.client(client.id)?;
    println!("{}", balance_line(&updated.full_name(), updated.cached_remain, &updated.currency));
    Ok(())
}

/// Only sessions carry a state.
fn validate_patch(kind: EntryKind, patch: &LedgerPatch) -> Result<()> {
    if patch.state.is_some() && kind != EntryKind::Session {
        return Err(LedgerError::Validation(format!("a {kind} has no state to change")));
    }
    Ok(())
}

pub fn add(
    key: &str,
    kind: EntryKind,
    amount: Option<String>,
    at: &str,
    note: String,
    state: Option<SessionState>,
) -> Result<()> {
    let store = open_store()?;
    let client = store.resolve_client(key)?;
    let at = parse_event_time(at)?;

    let amount = match (amount, kind) {
        (Some(raw), _) => parse_amount(&raw)?,
        (None, EntryKind::Session) if client.price_per_session > rust_decimal::Decimal::ZERO => {
            client.price_per_session
        }
        (None, _) => {
            return Err(LedgerError::Validation("--amount is required for this entry".into()));
        }
    };
    if state.is_some() && kind != EntryKind::Session {
        return Err(LedgerError::Validation("only sessions carry a state".into()));
    }

    let mut input = match kind {
        EntryKind::Session => LedgerInput::session(amount, at).with_state(state.unwrap_or_default()),
        EntryKind::Payment => LedgerInput::payment(amount, at),
        EntryKind::Other => return Err(LedgerError::Validation("entry type must be session or payment".into())),
    };
    if !note.is_empty() {
        input = input.with_note(note);
    }

    let (id, _) = store.add_and_adjust(client.id, &input)?;

    println!("Recorded {kind} of {} ({id})", money(amount, &client.currency));
    print_balance(&store, &client)
}

pub fn edit(
    key: &str,
    entry: &str,
    amount: Option<String>,
    at: Option<String>,
    note: Option<String>,
    state: Option<SessionState>,
) -> Result<()> {
    let store = open_store()?;
    let client = store.resolve_client(key)?;
    let entry_id = parse_entry_id(entry)?;

    let patch = LedgerPatch {
        amount: amount.as_deref().map(parse_amount).transpose()?,
        at: at.as_deref().map(parse_event_time).transpose()?,
        note,
        state,
    };
    if patch.is_empty() {
        return Err(LedgerError::Validation("nothing to change".into()));
    }
    let current = store.entry(client.id, entry_id)?;
    validate_patch(current.kind, &patch)?;

    store.update_and_recompute(client.id, entry_id, &patch)?;
    println!("Updated entry {entry_id}");
    print_balance(&store, &client)
}

pub fn delete(key: &str, entry: &str) -> Result<()> {
    let store = open_store()?;
    let client = store.resolve_client(key)?;
    let entry_id = parse_entry_id(entry)?;

    let (removed, _) = store.delete_and_adjust(client.id, entry_id)?;
    println!(
        "Deleted {} of {} on {}",
        removed.kind,
        money(removed.amount, &client.currency),
        removed.at.format("%Y-%m-%d %H:%M")
    );
    print_balance(&store, &client)
}

pub fn list(key: &str) -> Result<()> {
    let store = open_store()?;
    let client = store.resolve_client(key)?;
    let entries = store.list(client.id)?;

    if entries.is_empty() {
        println!("No entries for {}.", client.full_name());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Id", "When", "Type", "Amount", "State", "Note"]);
    for entry in &entries {
        let state = match entry.state {
            Some(SessionState::Canceled) => "canceled".dimmed().to_string(),
            Some(s) => s.as_str().to_string(),
            None => String::new(),
        };
        table.add_row(vec![
            Cell::new(entry.id),
            Cell::new(entry.at.format("%Y-%m-%d %H:%M")),
            Cell::new(entry.kind),
            Cell::new(money(entry.amount, &client.currency)),
            Cell::new(state),
            Cell::new(&entry.note),
        ]);
    }
    println!("{} ({} entries)\n{table}", client.full_name().bold(), entries.len());
    Ok(())
}
