use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use crate::balance::remain_of;
use crate::db::{decimal_at, now_stamp, stamp_at, text_at, uuid_at};
use crate::error::{LedgerError, Result};
use crate::models::{Client, ClientId, ClientInput};
use crate::store::LedgerStore;

const CLIENT_COLUMNS: &str = "id, file_number, first_name, last_name, phone, email, price_per_session, \
     currency, fix_time, source, starting_balance, cached_meetings_total, cached_paid_total, \
     cached_remain, created_at, updated_at";

impl LedgerStore {
    pub fn create_client(&self, input: &ClientInput) -> Result<ClientId> {
        let id = create_client(self.conn(), input)?;
        self.publish_clients();
        Ok(id)
    }

    /// Profile edit. Cached totals are kept; only `cached_remain` follows a new starting balance.
    pub fn update_client(&self, id: ClientId, input: &ClientInput) -> Result<()> {
        update_client(self.conn(), id, input)?;
        self.publish_clients();
        Ok(())
    }

    pub fn client(&self, id: ClientId) -> Result<Client> {
        get_client(self.conn(), id)
    }

    pub fn clients(&self) -> Result<Vec<Client>> {
        list_clients(self.conn())
    }

    pub fn resolve_client(&self, key: &str) -> Result<Client> {
        resolve_client(self.conn(), key)
    }
}

pub fn create_client(conn: &Connection, input: &ClientInput) -> Result<ClientId> {
    let id = Uuid::new_v4();
    let now = now_stamp();
    let starting = input.starting_balance.to_string();
    conn.execute(
        &format!(
            "INSERT INTO clients ({CLIENT_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, '0', '0', ?11, ?12, ?12)"
        ),
        params![
            id.to_string(),
            input.file_number,
            input.first_name,
            input.last_name,
            input.phone,
            input.email,
            input.price_per_session.to_string(),
            input.currency,
            input.fix_time,
            input.source,
            starting,
            now,
        ],
    )?;
    debug!(client_id = %id, file_number = %input.file_number, "client created");
    Ok(id)
}

pub fn update_client(conn: &Connection, id: ClientId, input: &ClientInput) -> Result<()> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let current = get_client(&tx, id)?;
    let remain = remain_of(input.starting_balance, current.cached_meetings_total, current.cached_paid_total)?;
    tx.execute(
        "UPDATE clients SET file_number = ?1, first_name = ?2, last_name = ?3, phone = ?4, email = ?5, \
         price_per_session = ?6, currency = ?7, fix_time = ?8, source = ?9, starting_balance = ?10, \
         cached_remain = ?11, updated_at = ?12 WHERE id = ?13",
        params![
            input.file_number,
            input.first_name,
            input.last_name,
            input.phone,
            input.email,
            input.price_per_session.to_string(),
            input.currency,
            input.fix_time,
            input.source,
            input.starting_balance.to_string(),
            remain.to_string(),
            now_stamp(),
            id.to_string(),
        ],
    )?;
    tx.commit()?;
    debug!(client_id = %id, "client profile updated");
    Ok(())
}

pub fn find_client(conn: &Connection, id: ClientId) -> Result<Option<Client>> {
    let mut stmt = conn.prepare(&format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ?1"))?;
    let mut rows = stmt.query([id.to_string()])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_client(row)?)),
        None => Ok(None),
    }
}

pub fn get_client(conn: &Connection, id: ClientId) -> Result<Client> {
    find_client(conn, id)?.ok_or_else(|| LedgerError::client_not_found(id))
}

pub fn list_clients(conn: &Connection) -> Result<Vec<Client>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CLIENT_COLUMNS} FROM clients ORDER BY file_number ASC, last_name ASC"
    ))?;
    let mut rows = stmt.query([])?;
    let mut clients = Vec::new();
    while let Some(row) = rows.next()? {
        clients.push(row_to_client(row)?);
    }
    Ok(clients)
}

/// Look a client up by id, or by file number when exactly one client carries it.
pub fn resolve_client(conn: &Connection, key: &str) -> Result<Client> {
    let key = key.trim();
    if let Ok(id) = Uuid::parse_str(key) {
        return get_client(conn, id);
    }
    let mut stmt = conn.prepare("SELECT id FROM clients WHERE file_number = ?1")?;
    let ids: Vec<String> = stmt
        .query_map([key], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    match ids.as_slice() {
        [] => Err(LedgerError::client_not_found(key)),
        [only] => {
            let id = Uuid::parse_str(only)
                .map_err(|e| LedgerError::InvalidRecord(format!("id: '{only}' ({e})")))?;
            get_client(conn, id)
        }
        _ => Err(LedgerError::AmbiguousClient(key.to_string())),
    }
}

pub(crate) fn ensure_exists(conn: &Connection, id: ClientId) -> Result<()> {
    let found = conn
        .query_row("SELECT 1 FROM clients WHERE id = ?1", [id.to_string()], |_| Ok(()))
        .optional()?;
    found.ok_or_else(|| LedgerError::client_not_found(id))
}

fn row_to_client(row: &Row<'_>) -> Result<Client> {
    Ok(Client {
        id: uuid_at(row, 0, "id")?,
        file_number: text_at(row, 1)?,
        first_name: text_at(row, 2)?,
        last_name: text_at(row, 3)?,
        phone: text_at(row, 4)?,
        email: text_at(row, 5)?,
        price_per_session: decimal_at(row, 6, "price_per_session")?,
        currency: text_at(row, 7)?,
        fix_time: text_at(row, 8)?,
        source: text_at(row, 9)?,
        starting_balance: decimal_at(row, 10, "starting_balance")?,
        cached_meetings_total: decimal_at(row, 11, "cached_meetings_total")?,
        cached_paid_total: decimal_at(row, 12, "cached_paid_total")?,
        cached_remain: decimal_at(row, 13, "cached_remain")?,
        created_at: stamp_at(row, 14, "created_at")?,
        updated_at: stamp_at(row, 15, "updated_at")?,
    })
}
