use std::collections::BTreeMap;

use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::info;

use crate::cache::{apply_delta, CacheDelta};
use crate::db::now_stamp;
use crate::error::{LedgerError, Result};
use crate::models::{ClientId, EntryId, LedgerInput};
use crate::store::{insert_entry, LedgerStore};

/// Upper bound on entry inserts plus cache updates in one commit.
pub const MAX_BATCH_WRITES: usize = 500;

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub entry_ids: Vec<(ClientId, EntryId)>,
    pub deltas: BTreeMap<ClientId, CacheDelta>,
}

/// Identifies the plan file a batch came from so it is only committed once.
#[derive(Debug, Clone)]
pub struct PlanRecord {
    pub filename: String,
    pub checksum: String,
}

impl LedgerStore {
    /// Insert every entry and apply one cache adjustment per client, all or nothing.
    pub fn commit_batch(&self, entries: &[(ClientId, LedgerInput)]) -> Result<BatchSummary> {
        let summary = commit_batch(self.conn(), entries, None)?;
        self.publish_batch(&summary);
        Ok(summary)
    }

    pub fn commit_plan(&self, entries: &[(ClientId, LedgerInput)], record: &PlanRecord) -> Result<BatchSummary> {
        let summary = commit_batch(self.conn(), entries, Some(record))?;
        self.publish_batch(&summary);
        Ok(summary)
    }

    fn publish_batch(&self, summary: &BatchSummary) {
        if summary.entry_ids.is_empty() {
            return;
        }
        let touched: Vec<ClientId> = summary.deltas.keys().copied().collect();
        self.publish_ledgers(&touched);
        self.publish_clients();
    }
}

/// Per-client sums of the batch, using the same formula as single-entry adjustments.
pub fn group_deltas(entries: &[(ClientId, LedgerInput)]) -> Result<BTreeMap<ClientId, CacheDelta>> {
    let mut deltas: BTreeMap<ClientId, CacheDelta> = BTreeMap::new();
    for (client_id, input) in entries {
        let slot = deltas.entry(*client_id).or_default();
        *slot = slot.checked_add(CacheDelta::for_input(input))?;
    }
    Ok(deltas)
}

pub fn commit_batch(
    conn: &Connection,
    entries: &[(ClientId, LedgerInput)],
    record: Option<&PlanRecord>,
) -> Result<BatchSummary> {
    if entries.is_empty() {
        return Ok(BatchSummary::default());
    }
    let deltas = group_deltas(entries)?;
    let writes = entries.len() + deltas.len() + usize::from(record.is_some());
    if writes > MAX_BATCH_WRITES {
        return Err(LedgerError::BatchTooLarge { writes, max: MAX_BATCH_WRITES });
    }
    if let Some(record) = record {
        if plan_already_committed(conn, &record.checksum)? {
            return Err(LedgerError::DuplicatePlan(record.filename.clone()));
        }
    }

    // Dropping `tx` on any early return rolls everything back.
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut entry_ids = Vec::with_capacity(entries.len());
    for (client_id, input) in entries {
        let id = insert_entry(&tx, *client_id, input)?;
        entry_ids.push((*client_id, id));
    }
    for (client_id, delta) in &deltas {
        apply_delta(&tx, *client_id, *delta)?;
    }
    if let Some(record) = record {
        tx.execute(
            "INSERT INTO batch_commits (filename, checksum, entry_count, client_count, committed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![record.filename, record.checksum, entries.len() as i64, deltas.len() as i64, now_stamp()],
        )?;
    }
    tx.commit()?;

    info!(entries = entry_ids.len(), clients = deltas.len(), "committed ledger batch");
    Ok(BatchSummary { entry_ids, deltas })
}

pub fn plan_already_committed(conn: &Connection, checksum: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM batch_commits WHERE checksum = ?1", [checksum], |_| Ok(()))
        .optional()?
        .is_some())
}
