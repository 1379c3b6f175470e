use crate::cli::open_store;
use crate::error::{LedgerError, Result};
use crate::fmt::money;

pub fn run(client: Option<String>, all: bool) -> Result<()> {
    let store = open_store()?;

    if all {
        let stale = store.recompute_all()?;
        let total = store.clients()?.len();
        println!("Recomputed {total} clients; {stale} had stale balances.");
        return Ok(());
    }

    let Some(key) = client else {
        return Err(LedgerError::Validation("give a client or --all".into()));
    };
    let client = store.resolve_client(&key)?;
    let before = client.cached_snapshot();
    let after = store.recompute_client(client.id)?;
    if before == after {
        println!("{}: balance already up to date ({})", client.full_name(), money(after.remain, &client.currency));
    } else {
        println!(
            "{}: balance {} -> {}",
            client.full_name(),
            money(before.remain, &client.currency),
            money(after.remain, &client.currency)
        );
    }
    Ok(())
}
