use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::balance::BalanceSnapshot;

pub type ClientId = Uuid;
pub type EntryId = Uuid;

/// Storage format for event times: practice-local wall clock, sortable as text.
pub const AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Session,
    Payment,
    /// A label found at rest that this version does not know. Never written.
    Other,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Payment => "payment",
            Self::Other => "other",
        }
    }

    /// Lenient mapping used when reading stored rows.
    pub fn from_label(raw: &str) -> Self {
        match raw {
            "session" => Self::Session,
            "payment" => Self::Payment,
            _ => Self::Other,
        }
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "payment" => Ok(Self::Payment),
            other => Err(format!("unknown entry type '{other}' (expected session or payment)")),
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Planner label on a session. Does not change how the session is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Scheduled,
    Held,
    Canceled,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Held => "held",
            Self::Canceled => "canceled",
        }
    }

    /// Map free-text states written by older front-ends onto the three labels.
    pub fn normalize(raw: &str) -> Self {
        let raw = raw.to_lowercase();
        if raw.contains("cancel") {
            Self::Canceled
        } else if raw.contains("hold")
            || raw.contains("held")
            || raw.contains("done")
            || raw.contains("complete")
        {
            Self::Held
        } else {
            Self::Scheduled
        }
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "held" => Ok(Self::Held),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            other => Err(format!("unknown session state '{other}'")),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    pub id: ClientId,
    pub file_number: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub price_per_session: Decimal,
    pub currency: String,
    pub fix_time: String,
    pub source: String,
    pub starting_balance: Decimal,
    pub cached_meetings_total: Decimal,
    pub cached_paid_total: Decimal,
    pub cached_remain: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// The cached balance as last written. May lag the ledger.
    pub fn cached_snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            meetings_total: self.cached_meetings_total,
            paid_total: self.cached_paid_total,
            remain: self.cached_remain,
        }
    }
}

/// Profile fields a caller may set on create or edit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientInput {
    pub file_number: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub price_per_session: Decimal,
    pub currency: String,
    pub fix_time: String,
    pub source: String,
    pub starting_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub client_id: ClientId,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub at: NaiveDateTime,
    pub note: String,
    /// Always set for sessions, `None` for payments.
    pub state: Option<SessionState>,
    pub created_at: DateTime<Utc>,
}

/// A new ledger entry before the store assigns its id and creation time.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerInput {
    pub kind: EntryKind,
    /// Missing amounts are stored as zero.
    pub amount: Option<Decimal>,
    pub at: NaiveDateTime,
    pub note: String,
    pub state: Option<SessionState>,
}

impl LedgerInput {
    pub fn session(amount: Decimal, at: NaiveDateTime) -> Self {
        Self {
            kind: EntryKind::Session,
            amount: Some(amount),
            at,
            note: String::new(),
            state: Some(SessionState::Scheduled),
        }
    }

    pub fn payment(amount: Decimal, at: NaiveDateTime) -> Self {
        Self {
            kind: EntryKind::Payment,
            amount: Some(amount),
            at,
            note: String::new(),
            state: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = note.into();
        self
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn amount_or_zero(&self) -> Decimal {
        self.amount.unwrap_or(Decimal::ZERO)
    }
}

/// Partial edit of a stored entry. The entry kind cannot be changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerPatch {
    pub amount: Option<Decimal>,
    pub at: Option<NaiveDateTime>,
    pub note: Option<String>,
    pub state: Option<SessionState>,
}

impl LedgerPatch {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.at.is_none() && self.note.is_none() && self.state.is_none()
    }
}
