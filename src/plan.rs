//! Day plans read from CSV and committed as one ledger batch.
//!
//! Columns: `client,type,amount,date,time,note,state`. `client` is a client id
//! or an unambiguous file number. An empty session amount takes the client's
//! price per session. Canceled sessions and rows without a positive amount are
//! skipped, the same way the planner leaves empty slots out of a save.

use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::batch::PlanRecord;
use crate::clients::resolve_client;
use crate::error::{LedgerError, Result};
use crate::models::{ClientId, EntryKind, LedgerInput, SessionState};

#[derive(Debug, Deserialize)]
struct PlanRow {
    client: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    amount: String,
    date: String,
    time: String,
    #[serde(default)]
    note: String,
    #[serde(default)]
    state: String,
}

#[derive(Debug)]
pub struct Plan {
    pub entries: Vec<(ClientId, LedgerInput)>,
    pub skipped: usize,
    pub record: PlanRecord,
}

pub fn compute_checksum(file_path: &Path) -> Result<String> {
    let data = std::fs::read(file_path)?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(hex::encode(hasher.finalize()))
}

pub fn load_plan(conn: &Connection, file_path: &Path) -> Result<Plan> {
    let file = std::fs::File::open(file_path)?;
    let (entries, skipped) = parse_plan(conn, file)?;
    let filename = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| file_path.display().to_string());
    Ok(Plan {
        entries,
        skipped,
        record: PlanRecord { filename, checksum: compute_checksum(file_path)? },
    })
}

pub fn parse_plan<R: Read>(conn: &Connection, reader: R) -> Result<(Vec<(ClientId, LedgerInput)>, usize)> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut entries = Vec::new();
    let mut skipped = 0;

    for (i, row) in rdr.deserialize::<PlanRow>().enumerate() {
        let line = i + 2;
        let row = row?;
        let invalid = |msg: String| LedgerError::Validation(format!("line {line}: {msg}"));

        let client = resolve_client(conn, &row.client).map_err(|e| match e {
            LedgerError::NotFound { .. } | LedgerError::AmbiguousClient(_) => invalid(e.to_string()),
            other => other,
        })?;
        let kind = EntryKind::from_str(&row.kind).map_err(invalid)?;
        let state = match (kind, row.state.as_str()) {
            (EntryKind::Session, "") => Some(SessionState::Scheduled),
            (EntryKind::Session, raw) => Some(SessionState::from_str(raw).map_err(invalid)?),
            _ => None,
        };
        let amount = match row.amount.replace(',', "").as_str() {
            "" if kind == EntryKind::Session => client.price_per_session,
            "" => Decimal::ZERO,
            raw => Decimal::from_str(raw).map_err(|e| invalid(format!("amount '{raw}': {e}")))?,
        };
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .map_err(|e| invalid(format!("date '{}': {e}", row.date)))?;
        let time = NaiveTime::parse_from_str(&row.time, "%H:%M")
            .map_err(|e| invalid(format!("time '{}': {e}", row.time)))?;

        if state == Some(SessionState::Canceled) || amount <= Decimal::ZERO {
            warn!(line, client = %client.file_number, "skipping canceled or zero-amount plan row");
            skipped += 1;
            continue;
        }

        let note = if row.note.is_empty() {
            match kind {
                EntryKind::Session => format!("Scheduled {}", time.format("%H:%M")),
                _ => format!("Payment {}", time.format("%H:%M")),
            }
        } else {
            row.note
        };
        entries.push((
            client.id,
            LedgerInput { kind, amount: Some(amount), at: date.and_time(time), note, state },
        ));
    }
    Ok((entries, skipped))
}
