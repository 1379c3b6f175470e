use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, Row, Transaction, TransactionBehavior};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::models::AT_FORMAT;

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS clients (
    id TEXT PRIMARY KEY,
    file_number TEXT NOT NULL DEFAULT '',
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL DEFAULT '',
    price_per_session TEXT,
    currency TEXT NOT NULL DEFAULT '',
    fix_time TEXT NOT NULL DEFAULT '',
    source TEXT NOT NULL DEFAULT '',
    starting_balance TEXT,
    cached_meetings_total TEXT,
    cached_paid_total TEXT,
    cached_remain TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS clients_idx_file_number ON clients(file_number);

CREATE TABLE IF NOT EXISTS ledger_entries (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL,
    entry_type TEXT NOT NULL,
    amount TEXT,
    at TEXT NOT NULL,
    note TEXT DEFAULT '',
    state TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (client_id) REFERENCES clients(id)
);

CREATE INDEX IF NOT EXISTS ledger_idx_client_at ON ledger_entries(client_id, at);
CREATE INDEX IF NOT EXISTS ledger_idx_at ON ledger_entries(at);

CREATE TABLE IF NOT EXISTS batch_commits (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    checksum TEXT NOT NULL UNIQUE,
    entry_count INTEGER NOT NULL,
    client_count INTEGER NOT NULL,
    committed_at TEXT NOT NULL
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

/// GLOB pattern matching `AT_FORMAT` output.
const CANONICAL_AT: &str =
    "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9]";

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    normalize_event_times(conn)?;
    Ok(())
}

/// Rewrite older `at` spellings into `AT_FORMAT` so that text order on the
/// column is time order. Returns how many rows were rewritten.
pub fn normalize_event_times(conn: &Connection) -> Result<usize> {
    let legacy: Vec<(String, String)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, at FROM ledger_entries WHERE typeof(at) = 'text' AND at NOT GLOB '{CANONICAL_AT}'"
        ))?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<std::result::Result<_, _>>()?
    };
    if legacy.is_empty() {
        return Ok(0);
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut rewritten = 0;
    for (id, raw) in &legacy {
        match parse_event_time(raw) {
            Ok(at) => {
                tx.execute("UPDATE ledger_entries SET at = ?1 WHERE id = ?2", params![format_at(&at), id])?;
                rewritten += 1;
            }
            Err(_) => warn!(entry_id = %id, at = %raw, "ledger entry time left as is"),
        }
    }
    tx.commit()?;
    info!(rows = rewritten, "normalized ledger entry times");
    Ok(rewritten)
}

/// Store-assigned timestamp.
pub fn now_stamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_at(at: &NaiveDateTime) -> String {
    at.format(AT_FORMAT).to_string()
}

/// Read a money column. NULL and empty text are legacy "missing" values and read as zero.
pub fn decimal_at(row: &Row<'_>, idx: usize, field: &str) -> Result<Decimal> {
    match row.get_ref(idx)? {
        ValueRef::Null => Ok(Decimal::ZERO),
        ValueRef::Integer(i) => Ok(Decimal::from(i)),
        ValueRef::Real(f) => Decimal::try_from(f)
            .map_err(|e| LedgerError::InvalidRecord(format!("{field}: {f} ({e})"))),
        ValueRef::Text(raw) => {
            let text = std::str::from_utf8(raw)
                .map_err(|e| LedgerError::InvalidRecord(format!("{field}: {e}")))?
                .trim();
            if text.is_empty() {
                return Ok(Decimal::ZERO);
            }
            Decimal::from_str(text)
                .map_err(|e| LedgerError::InvalidRecord(format!("{field}: '{text}' ({e})")))
        }
        ValueRef::Blob(_) => Err(LedgerError::InvalidRecord(format!("{field}: unexpected blob"))),
    }
}

pub fn text_at(row: &Row<'_>, idx: usize) -> Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

pub fn uuid_at(row: &Row<'_>, idx: usize, field: &str) -> Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| LedgerError::InvalidRecord(format!("{field}: '{raw}' ({e})")))
}

pub fn stamp_at(row: &Row<'_>, idx: usize, field: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LedgerError::InvalidRecord(format!("{field}: '{raw}' ({e})")))
}

/// Read a stored `at`. Only the canonical form is accepted; anything else would
/// sort and range-compare wrongly next to it.
pub fn event_time_at(row: &Row<'_>, idx: usize) -> Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, AT_FORMAT)
        .ok()
        .filter(|at| format_at(at) == raw)
        .ok_or_else(|| LedgerError::InvalidRecord(format!("at: '{raw}' is not in canonical form")))
}

/// Lenient parse of the spellings older databases and hand-edited rows use.
pub fn parse_event_time(raw: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, AT_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M"))
        .map_err(|e| LedgerError::InvalidRecord(format!("at: '{raw}' ({e})")))
}
