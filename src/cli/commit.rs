use std::path::Path;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::cli::open_store;
use crate::error::{LedgerError, Result};
use crate::fmt::money;
use crate::plan::load_plan;

pub fn run(file: &str) -> Result<()> {
    let path = Path::new(file);
    if !path.exists() {
        return Err(LedgerError::Other(format!("File not found: {file}")));
    }

    let store = open_store()?;
    let plan = load_plan(store.conn(), path)?;
    if plan.entries.is_empty() {
        println!("Nothing to commit in {} ({} rows skipped).", plan.record.filename, plan.skipped);
        return Ok(());
    }

    let summary = store.commit_plan(&plan.entries, &plan.record)?;

    let mut table = Table::new();
    table.set_header(vec!["Client", "Sessions", "Paid", "Balance"]);
    for (client_id, delta) in &summary.deltas {
        let client = store.client(*client_id)?;
        table.add_row(vec![
            Cell::new(client.full_name()),
            Cell::new(money(delta.meetings, &client.currency)),
            Cell::new(money(delta.paid, &client.currency)),
            Cell::new(money(client.cached_remain, &client.currency)),
        ]);
    }

    println!(
        "{} {} entries from {} for {} clients.",
        "Committed".green(),
        summary.entry_ids.len(),
        plan.record.filename,
        summary.deltas.len()
    );
    if plan.skipped > 0 {
        println!("Skipped {} empty or canceled rows.", plan.skipped);
    }
    println!("{table}");
    Ok(())
}
