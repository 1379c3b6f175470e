use std::collections::HashMap;

use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::calendar::{summarize_day, Revenue};
use crate::cli::{open_store, parse_date, parse_month};
use crate::error::Result;
use crate::fmt::{day_key, money};
use crate::models::{Client, ClientId, EntryKind};
use crate::settings::load_settings;

pub fn day(date: &str, kind: EntryKind) -> Result<()> {
    let date = parse_date(date)?;
    let store = open_store()?;
    let known = store.clients()?;
    let by_id: HashMap<ClientId, &Client> = known.iter().map(|c| (c.id, c)).collect();

    let entries = store.entries_for_day(date, kind, &known)?;
    if entries.is_empty() {
        println!("No {kind} entries on {}.", day_key(date));
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Time", "File", "Client", "Amount", "State", "Note"]);
    for entry in &entries {
        let Some(client) = by_id.get(&entry.client_id) else { continue };
        table.add_row(vec![
            Cell::new(entry.at.format("%H:%M")),
            Cell::new(&client.file_number),
            Cell::new(client.full_name()),
            Cell::new(money(entry.amount, &client.currency)),
            Cell::new(entry.state.map(|s| s.as_str()).unwrap_or("")),
            Cell::new(&entry.note),
        ]);
    }
    println!("{} {}\n{table}", day_key(date).bold(), date.format("%A"));

    let summary = summarize_day(&entries, &known)?;
    let revenue = match summary.revenue {
        Revenue::Total { amount, currency } => money(amount, currency.as_deref().unwrap_or("")),
        Revenue::Mixed => "mixed currencies".yellow().to_string(),
    };
    println!("{} {kind}s, {revenue}", summary.count);
    Ok(())
}

pub fn month(month: &str, kind: EntryKind) -> Result<()> {
    let first = parse_month(month)?;
    let store = open_store()?;
    let known = store.clients()?;

    let days = store.days_with_entries_in_month(first, kind, &known)?;
    if days.is_empty() {
        println!("No {kind} entries in {}.", first.format("%B %Y"));
        return Ok(());
    }
    println!("{} ({} days with {kind}s)", first.format("%B %Y").to_string().bold(), days.len());
    for day in days {
        println!("  {}  {}", day_key(day), day.format("%a"));
    }
    Ok(())
}

pub fn suggest(date: &str, lookback: Option<u32>) -> Result<()> {
    let selected = parse_date(date)?;
    let lookback = lookback.unwrap_or_else(|| load_settings().suggestion_lookback_days);
    let store = open_store()?;
    let known = store.clients()?;

    let suggestions = store.suggest_clients_for_weekday(selected, lookback, &known)?;
    if suggestions.is_empty() {
        println!("No {} regulars in the last {lookback} days.", selected.format("%A"));
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["File", "Client", "Slot", "Times", "Last seen"]);
    for s in &suggestions {
        table.add_row(vec![
            Cell::new(&s.client.file_number),
            Cell::new(s.client.full_name()),
            Cell::new(&s.client.fix_time),
            Cell::new(s.count),
            Cell::new(s.last_seen.format("%Y-%m-%d %H:%M")),
        ]);
    }
    println!("Suggested for {} {}\n{table}", day_key(selected), selected.format("%A"));
    Ok(())
}
