use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use crate::models::ClientInput;
use crate::store::LedgerStore;

pub fn test_store() -> (tempfile::TempDir, LedgerStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = LedgerStore::open(&dir.path().join("test.db")).unwrap();
    (dir, store)
}

pub fn sample_client(file_number: &str, starting_balance: Decimal) -> ClientInput {
    ClientInput {
        file_number: file_number.to_string(),
        first_name: "Dana".to_string(),
        last_name: "Rivers".to_string(),
        phone: "555-0100".to_string(),
        email: "dana@example.com".to_string(),
        price_per_session: Decimal::from(120),
        currency: "USD".to_string(),
        fix_time: "Tue 10:00".to_string(),
        source: "referral".to_string(),
        starting_balance,
    }
}

pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, 0).unwrap()
}
