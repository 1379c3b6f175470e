use std::path::Path;

use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clients;
use crate::db::{
    decimal_at, event_time_at, format_at, get_connection, init_db, now_stamp, stamp_at, text_at,
    uuid_at,
};
use crate::error::{LedgerError, Result};
use crate::feed::{Feed, Subscription};
use crate::models::{
    Client, ClientId, EntryId, EntryKind, LedgerEntry, LedgerInput, LedgerPatch, SessionState,
};

const ENTRY_COLUMNS: &str = "id, client_id, entry_type, amount, at, note, state, created_at";

/// What a ledger listener is watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerScope {
    Client(ClientId),
    All,
}

impl LedgerScope {
    fn covers(&self, client_id: ClientId) -> bool {
        match self {
            Self::Client(id) => *id == client_id,
            Self::All => true,
        }
    }
}

/// Owns the database connection and the live feeds over it.
///
/// Every write goes through this type so that subscribers are notified once
/// the write has committed.
pub struct LedgerStore {
    conn: Connection,
    ledger_feed: Feed<LedgerEntry, LedgerScope>,
    client_feed: Feed<Client, ()>,
}

impl LedgerStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = get_connection(db_path)?;
        init_db(&conn)?;
        Ok(Self::new(conn))
    }

    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            ledger_feed: Feed::new(),
            client_feed: Feed::new(),
        }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn add(&self, client_id: ClientId, input: LedgerInput) -> Result<EntryId> {
        let id = insert_entry(&self.conn, client_id, &input)?;
        debug!(%client_id, entry_id = %id, kind = %input.kind, "ledger entry added");
        self.publish_ledger(client_id);
        Ok(id)
    }

    pub fn update(&self, client_id: ClientId, entry_id: EntryId, patch: &LedgerPatch) -> Result<()> {
        update_entry(&self.conn, client_id, entry_id, patch)?;
        debug!(%client_id, %entry_id, "ledger entry updated");
        self.publish_ledger(client_id);
        Ok(())
    }

    /// Hard-delete an entry and hand it back so the caller can derive a cache reversal.
    pub fn delete(&self, client_id: ClientId, entry_id: EntryId) -> Result<LedgerEntry> {
        let entry = delete_entry(&self.conn, client_id, entry_id)?;
        self.publish_ledger(client_id);
        Ok(entry)
    }

    pub fn entry(&self, client_id: ClientId, entry_id: EntryId) -> Result<LedgerEntry> {
        get_entry(&self.conn, client_id, entry_id)
    }

    /// A client's entries, newest event first.
    pub fn list(&self, client_id: ClientId) -> Result<Vec<LedgerEntry>> {
        clients::ensure_exists(&self.conn, client_id)?;
        list_entries(&self.conn, client_id)
    }

    pub fn subscribe(
        &self,
        client_id: ClientId,
        on_change: impl FnMut(&[LedgerEntry]) + 'static,
        on_error: impl FnMut(&LedgerError) + 'static,
    ) -> Subscription {
        self.ledger_feed.subscribe(LedgerScope::Client(client_id), on_change, on_error, |scope| {
            self.load_scope(scope)
        })
    }

    /// Every client's ledger at once. Result order is unspecified.
    pub fn subscribe_all(
        &self,
        on_change: impl FnMut(&[LedgerEntry]) + 'static,
        on_error: impl FnMut(&LedgerError) + 'static,
    ) -> Subscription {
        self.ledger_feed
            .subscribe(LedgerScope::All, on_change, on_error, |scope| self.load_scope(scope))
    }

    pub fn subscribe_clients(
        &self,
        on_change: impl FnMut(&[Client]) + 'static,
        on_error: impl FnMut(&LedgerError) + 'static,
    ) -> Subscription {
        self.client_feed
            .subscribe((), on_change, on_error, |_| clients::list_clients(&self.conn))
    }

    pub(crate) fn publish_ledger(&self, client_id: ClientId) {
        self.publish_ledgers(&[client_id]);
    }

    /// One delivery per listener, however many of the touched clients it covers.
    pub(crate) fn publish_ledgers(&self, client_ids: &[ClientId]) {
        if client_ids.is_empty() {
            return;
        }
        self.ledger_feed.publish(
            |scope| client_ids.iter().any(|id| scope.covers(*id)),
            |scope| self.load_scope(scope),
        );
    }

    pub(crate) fn publish_clients(&self) {
        self.client_feed.publish(|_| true, |_| clients::list_clients(&self.conn));
    }

    fn load_scope(&self, scope: &LedgerScope) -> Result<Vec<LedgerEntry>> {
        match scope {
            LedgerScope::Client(id) => list_entries(&self.conn, *id),
            LedgerScope::All => all_entries(&self.conn),
        }
    }
}

pub(crate) fn insert_entry(conn: &Connection, client_id: ClientId, input: &LedgerInput) -> Result<EntryId> {
    if input.kind == EntryKind::Other {
        return Err(LedgerError::Validation(
            "ledger entries must be a session or a payment".to_string(),
        ));
    }
    clients::ensure_exists(conn, client_id)?;

    let id = Uuid::new_v4();
    let state = match input.kind {
        EntryKind::Session => Some(input.state.unwrap_or_default().as_str()),
        _ => None,
    };
    conn.execute(
        &format!("INSERT INTO ledger_entries ({ENTRY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            id.to_string(),
            client_id.to_string(),
            input.kind.as_str(),
            input.amount_or_zero().to_string(),
            format_at(&input.at),
            input.note,
            state,
            now_stamp(),
        ],
    )?;
    Ok(id)
}

pub(crate) fn update_entry(conn: &Connection, client_id: ClientId, entry_id: EntryId, patch: &LedgerPatch) -> Result<()> {
    if patch.is_empty() {
        get_entry(conn, client_id, entry_id)?;
        return Ok(());
    }

    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(amount) = patch.amount {
        values.push(Value::from(amount.to_string()));
        sets.push(format!("amount = ?{}", values.len()));
    }
    if let Some(at) = patch.at {
        values.push(Value::from(format_at(&at)));
        sets.push(format!("at = ?{}", values.len()));
    }
    if let Some(note) = &patch.note {
        values.push(Value::from(note.clone()));
        sets.push(format!("note = ?{}", values.len()));
    }
    if let Some(state) = patch.state {
        values.push(Value::from(state.as_str().to_string()));
        let n = values.len();
        sets.push(format!("state = CASE WHEN entry_type = 'session' THEN ?{n} ELSE state END"));
    }
    values.push(Value::from(entry_id.to_string()));
    let id_param = values.len();
    values.push(Value::from(client_id.to_string()));
    let client_param = values.len();

    let sql = format!(
        "UPDATE ledger_entries SET {} WHERE id = ?{id_param} AND client_id = ?{client_param}",
        sets.join(", ")
    );
    let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
    if changed == 0 {
        return Err(LedgerError::entry_not_found(entry_id));
    }
    Ok(())
}

/// Hard-delete one entry, returning what was removed.
pub(crate) fn delete_entry(conn: &Connection, client_id: ClientId, entry_id: EntryId) -> Result<LedgerEntry> {
    let entry = get_entry(conn, client_id, entry_id)?;
    let removed = conn.execute(
        "DELETE FROM ledger_entries WHERE id = ?1 AND client_id = ?2",
        params![entry_id.to_string(), client_id.to_string()],
    )?;
    if removed == 0 {
        return Err(LedgerError::entry_not_found(entry_id));
    }
    debug!(%client_id, %entry_id, "ledger entry deleted");
    Ok(entry)
}

pub(crate) fn get_entry(conn: &Connection, client_id: ClientId, entry_id: EntryId) -> Result<LedgerEntry> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = ?1 AND client_id = ?2"
    ))?;
    let mut rows = stmt.query(params![entry_id.to_string(), client_id.to_string()])?;
    match rows.next()? {
        Some(row) => row_to_entry(row),
        None => Err(LedgerError::entry_not_found(entry_id)),
    }
}

pub(crate) fn list_entries(conn: &Connection, client_id: ClientId) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE client_id = ?1 ORDER BY at DESC, created_at DESC"
    ))?;
    let mut rows = stmt.query([client_id.to_string()])?;
    collect_entries(&mut rows)
}

pub(crate) fn all_entries(conn: &Connection) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(&format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries"))?;
    let mut rows = stmt.query([])?;
    collect_entries(&mut rows)
}

/// Entries across all clients with `from <= at < to`.
pub(crate) fn entries_between(conn: &Connection, from: NaiveDateTime, to: NaiveDateTime) -> Result<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE at >= ?1 AND at < ?2"
    ))?;
    let mut rows = stmt.query(params![format_at(&from), format_at(&to)])?;
    collect_entries(&mut rows)
}

pub(crate) fn entry_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT count(*) FROM ledger_entries", [], |r| r.get(0))?)
}

fn collect_entries(rows: &mut rusqlite::Rows<'_>) -> Result<Vec<LedgerEntry>> {
    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        let entry = row_to_entry(row)?;
        if entry.kind == EntryKind::Other {
            warn!(entry_id = %entry.id, "ledger entry with unknown type is excluded from totals");
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn row_to_entry(row: &Row<'_>) -> Result<LedgerEntry> {
    let kind = EntryKind::from_label(&text_at(row, 2)?);
    let raw_state: Option<String> = row.get(6)?;
    let state = match kind {
        EntryKind::Session => Some(SessionState::normalize(raw_state.as_deref().unwrap_or(""))),
        _ => None,
    };
    Ok(LedgerEntry {
        id: uuid_at(row, 0, "id")?,
        client_id: uuid_at(row, 1, "client_id")?,
        kind,
        amount: decimal_at(row, 3, "amount")?,
        at: event_time_at(row, 4)?,
        note: text_at(row, 5)?,
        state,
        created_at: stamp_at(row, 7, "created_at")?,
    })
}
