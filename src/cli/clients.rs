use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::balance::{BalanceSnapshot, BalanceStatus};
use crate::cli::{open_store, parse_money, ClientArgs};
use crate::error::{LedgerError, Result};
use crate::fmt::money;
use crate::models::{ClientInput, EntryKind};
use crate::settings::load_settings;

pub(crate) fn status_cell(snapshot: &BalanceSnapshot) -> String {
    let status = snapshot.status();
    match status {
        BalanceStatus::Debt => status.label().red().to_string(),
        BalanceStatus::Settled => status.label().normal().to_string(),
        BalanceStatus::Credit => status.label().green().to_string(),
    }
}

fn apply_args(mut input: ClientInput, args: ClientArgs) -> Result<ClientInput> {
    if let Some(v) = args.file_number {
        input.file_number = v;
    }
    if let Some(v) = args.first_name {
        input.first_name = v;
    }
    if let Some(v) = args.last_name {
        input.last_name = v;
    }
    if let Some(v) = args.phone {
        input.phone = v;
    }
    if let Some(v) = args.email {
        input.email = v;
    }
    if let Some(v) = args.price {
        input.price_per_session = parse_money(&v)?;
        if input.price_per_session.is_sign_negative() {
            return Err(LedgerError::Validation("price per session cannot be negative".into()));
        }
    }
    if let Some(v) = args.currency {
        input.currency = v;
    }
    if let Some(v) = args.fix_time {
        input.fix_time = v;
    }
    if let Some(v) = args.source {
        input.source = v;
    }
    if let Some(v) = args.starting_balance {
        input.starting_balance = parse_money(&v)?;
    }
    Ok(input)
}

pub fn add(args: ClientArgs) -> Result<()> {
    let store = open_store()?;
    let defaults = ClientInput { currency: load_settings().default_currency, ..Default::default() };
    let input = apply_args(defaults, args)?;
    if input.first_name.is_empty() && input.last_name.is_empty() {
        return Err(LedgerError::Validation("a client needs a first or last name".into()));
    }
    let id = store.create_client(&input)?;
    println!("Added client {} ({id})", format!("{} {}", input.first_name, input.last_name).trim());
    Ok(())
}

pub fn edit(key: &str, args: ClientArgs) -> Result<()> {
    let store = open_store()?;
    let client = store.resolve_client(key)?;
    let current = ClientInput {
        file_number: client.file_number.clone(),
        first_name: client.first_name.clone(),
        last_name: client.last_name.clone(),
        phone: client.phone.clone(),
        email: client.email.clone(),
        price_per_session: client.price_per_session,
        currency: client.currency.clone(),
        fix_time: client.fix_time.clone(),
        source: client.source.clone(),
        starting_balance: client.starting_balance,
    };
    let input = apply_args(current, args)?;
    store.update_client(client.id, &input)?;
    let updated = store.client(client.id)?;
    println!(
        "Updated {}. Balance: {}",
        updated.full_name(),
        money(updated.cached_remain, &updated.currency)
    );
    Ok(())
}

pub fn list() -> Result<()> {
    let store = open_store()?;
    let clients = store.clients()?;

    let mut table = Table::new();
    table.set_header(vec!["File", "Name", "Price", "Sessions", "Paid", "Remain", "Status"]);
    for client in &clients {
        let snapshot = client.cached_snapshot();
        table.add_row(vec![
            Cell::new(&client.file_number),
            Cell::new(client.full_name()),
            Cell::new(money(client.price_per_session, &client.currency)),
            Cell::new(money(snapshot.meetings_total, &client.currency)),
            Cell::new(money(snapshot.paid_total, &client.currency)),
            Cell::new(money(snapshot.remain, &client.currency)),
            Cell::new(status_cell(&snapshot)),
        ]);
    }
    println!("Clients ({})\n{table}", clients.len());
    Ok(())
}

pub fn show(key: &str) -> Result<()> {
    let store = open_store()?;
    let client = store.resolve_client(key)?;
    let check = store.check_cache(client.id)?;
    let actual = check.actual;
    let cur = client.currency.as_str();

    println!("{} (file {})", client.full_name().bold(), client.file_number);
    println!("Id:         {}", client.id);
    println!("Phone:      {}", client.phone);
    println!("Email:      {}", client.email);
    println!("Slot:       {}", client.fix_time);
    println!("Source:     {}", client.source);
    println!("Price:      {}", money(client.price_per_session, cur));
    println!();
    println!("Starting:   {}", money(client.starting_balance, cur));
    println!("Sessions:   {}", money(actual.meetings_total, cur));
    println!("Paid:       {}", money(actual.paid_total, cur));
    println!("Remain:     {} ({})", money(actual.remain, cur), status_cell(&actual));
    if !check.is_consistent() {
        println!(
            "{}",
            format!(
                "Cached balance {} is out of date; run `tally recompute {}`.",
                money(check.cached.remain, cur),
                client.file_number
            )
            .yellow()
        );
    }

    let entries = store.list(client.id)?;
    if entries.is_empty() {
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["Id", "When", "Type", "Amount", "State", "Note"]);
    for entry in entries {
        let kind = match entry.kind {
            EntryKind::Session => "session".normal(),
            EntryKind::Payment => "payment".green(),
            EntryKind::Other => "unknown".dimmed(),
        };
        table.add_row(vec![
            Cell::new(entry.id),
            Cell::new(entry.at.format("%Y-%m-%d %H:%M")),
            Cell::new(kind),
            Cell::new(money(entry.amount, cur)),
            Cell::new(entry.state.map(|s| s.as_str()).unwrap_or("")),
            Cell::new(entry.note),
        ]);
    }
    println!("\n{table}");
    Ok(())
}
