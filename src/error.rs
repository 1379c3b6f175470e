use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("{0}")]
    Validation(String),

    #[error("{what} is out of range")]
    Overflow { what: &'static str },

    #[error("Batch of {writes} writes exceeds the limit of {max}")]
    BatchTooLarge { writes: usize, max: usize },

    #[error("Plan file already committed: {0}")]
    DuplicatePlan(String),

    #[error("More than one client has file number {0}; use the client id")]
    AmbiguousClient(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

impl LedgerError {
    pub fn client_not_found(id: impl ToString) -> Self {
        Self::NotFound { what: "Client", id: id.to_string() }
    }

    pub fn entry_not_found(id: impl ToString) -> Self {
        Self::NotFound { what: "Ledger entry", id: id.to_string() }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
