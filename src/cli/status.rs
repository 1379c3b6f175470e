use colored::Colorize;

use crate::error::Result;
use crate::settings::{db_path, load_settings};
use crate::store::{entry_count, LedgerStore};

pub fn run() -> Result<()> {
    let settings = load_settings();
    let db_path = db_path();

    let practice = if settings.practice_name.is_empty() { "(not set)" } else { &settings.practice_name };
    println!("Practice:   {practice}");
    println!("Data dir:   {}", settings.data_dir);
    println!("Database:   {}", db_path.display());

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `tally init` to set up.");
        return Ok(());
    }

    let store = LedgerStore::open(&db_path)?;
    let clients = store.clients()?;
    let entries = entry_count(store.conn())?;
    let plans: i64 = store.conn().query_row("SELECT count(*) FROM batch_commits", [], |r| r.get(0))?;

    let mut stale = 0;
    for client in &clients {
        if !store.check_cache(client.id)?.is_consistent() {
            stale += 1;
        }
    }

    println!();
    println!("Clients:       {}", clients.len());
    println!("Entries:       {entries}");
    println!("Plans:         {plans}");
    if stale > 0 {
        println!("Stale caches:  {}", stale.to_string().yellow());
        println!("Run `tally recompute --all` to repair them.");
    } else {
        println!("Stale caches:  0");
    }
    Ok(())
}
