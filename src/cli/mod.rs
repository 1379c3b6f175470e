pub mod clients;
pub mod commit;
pub mod init;
pub mod ledger;
pub mod planner;
pub mod recompute;
pub mod status;

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};
use crate::models::{EntryKind, SessionState};
use crate::settings;
use crate::store::LedgerStore;

pub(crate) fn open_store() -> Result<LedgerStore> {
    let path = settings::db_path();
    if !path.exists() {
        return Err(LedgerError::Settings(format!(
            "No database found at {}\nRun `tally init` to create one.",
            path.display()
        )));
    }
    LedgerStore::open(&path)
}

/// Amounts typed by a user must be positive; the store itself does not check.
pub(crate) fn parse_amount(raw: &str) -> Result<Decimal> {
    let cleaned = raw.trim().replace(',', "");
    let amount = Decimal::from_str(&cleaned)
        .map_err(|_| LedgerError::Validation(format!("'{raw}' is not a number")))?;
    if amount <= Decimal::ZERO {
        return Err(LedgerError::Validation(format!("amount must be greater than zero, got {raw}")));
    }
    Ok(amount)
}

pub(crate) fn parse_money(raw: &str) -> Result<Decimal> {
    Decimal::from_str(&raw.trim().replace(',', ""))
        .map_err(|_| LedgerError::Validation(format!("'{raw}' is not a number")))
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| LedgerError::Validation(format!("'{raw}' is not a date (YYYY-MM-DD)")))
}

/// `YYYY-MM-DD HH:MM`, or a bare date which lands at noon.
pub(crate) fn parse_event_time(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN)));
    }
    crate::db::parse_event_time(raw)
        .map_err(|_| LedgerError::Validation(format!("'{raw}' is not a time (YYYY-MM-DD HH:MM)")))
}

pub(crate) fn parse_month(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&format!("{}-01", raw.trim()), "%Y-%m-%d")
        .map_err(|_| LedgerError::Validation(format!("'{raw}' is not a month (YYYY-MM)")))
}

#[derive(Parser)]
#[command(name = "tally", about = "Clients, sessions, payments and balances for a counseling practice.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Set up tally: choose a data directory and initialize the database.
    Init {
        /// Path for tally data (default: ~/Documents/tally)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Manage clients.
    Clients {
        #[command(subcommand)]
        command: ClientsCommands,
    },
    /// Record, edit and remove sessions and payments.
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },
    /// Rebuild cached balances from the ledger.
    Recompute {
        /// Client id or file number
        client: Option<String>,
        /// Recompute every client
        #[arg(long, conflicts_with = "client")]
        all: bool,
    },
    /// Commit a CSV day plan as one batch.
    Commit {
        /// Path to the plan file (client,type,amount,date,time,note,state)
        file: String,
    },
    /// Show one day's sessions or payments across all clients.
    Day {
        /// Date: YYYY-MM-DD
        date: String,
        #[arg(long = "type", default_value = "session")]
        kind: EntryKind,
    },
    /// List the days of a month that have sessions or payments.
    Month {
        /// Month: YYYY-MM
        month: String,
        #[arg(long = "type", default_value = "session")]
        kind: EntryKind,
    },
    /// Suggest clients who usually come on this weekday.
    Suggest {
        /// Date: YYYY-MM-DD
        date: String,
        /// Days to look back (default from settings)
        #[arg(long)]
        lookback: Option<u32>,
    },
    /// Show the current database and summary statistics.
    Status,
    /// Print shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args)]
pub struct ClientArgs {
    #[arg(long = "file-number")]
    pub file_number: Option<String>,
    #[arg(long = "first-name")]
    pub first_name: Option<String>,
    #[arg(long = "last-name")]
    pub last_name: Option<String>,
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
    /// Price per session
    #[arg(long)]
    pub price: Option<String>,
    #[arg(long)]
    pub currency: Option<String>,
    /// Regular appointment slot, e.g. 'Tue 10:00'
    #[arg(long = "fix-time")]
    pub fix_time: Option<String>,
    /// How the client found the practice
    #[arg(long)]
    pub source: Option<String>,
    /// Balance carried in from before tally (positive = client owes)
    #[arg(long = "starting-balance", allow_hyphen_values = true)]
    pub starting_balance: Option<String>,
}

#[derive(Subcommand)]
pub enum ClientsCommands {
    /// Add a new client.
    Add {
        #[command(flatten)]
        args: ClientArgs,
    },
    /// List clients with their cached balances.
    List,
    /// Show a client's profile, balance and ledger.
    Show {
        /// Client id or file number
        client: String,
    },
    /// Edit a client's profile.
    Edit {
        /// Client id or file number
        client: String,
        #[command(flatten)]
        args: ClientArgs,
    },
}

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// Record a session or payment and refresh the client's balance.
    Add {
        /// Client id or file number
        client: String,
        #[arg(long = "type")]
        kind: EntryKind,
        /// Amount (defaults to the client's price for sessions)
        #[arg(long)]
        amount: Option<String>,
        /// Event time: YYYY-MM-DD or 'YYYY-MM-DD HH:MM'
        #[arg(long)]
        at: String,
        #[arg(long, default_value = "")]
        note: String,
        #[arg(long)]
        state: Option<SessionState>,
    },
    /// Edit an entry and refresh the client's balance.
    Edit {
        client: String,
        entry: String,
        #[arg(long)]
        amount: Option<String>,
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        note: Option<String>,
        #[arg(long)]
        state: Option<SessionState>,
    },
    /// Delete an entry and refresh the client's balance.
    Delete { client: String, entry: String },
    /// List a client's entries, newest first.
    List { client: String },
}
