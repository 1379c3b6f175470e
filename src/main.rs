mod balance;
mod batch;
mod cache;
mod calendar;
mod cli;
mod clients;
mod db;
mod error;
mod feed;
mod fmt;
mod logging;
mod models;
mod plan;
mod settings;
mod store;
#[cfg(test)]
mod testutil;

use clap::{CommandFactory, Parser};
use clap_complete::generate;

use cli::{Cli, ClientsCommands, Commands, LedgerCommands};

fn main() {
    let cli = Cli::parse();
    logging::init(&settings::load_settings().log_level);

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Clients { command } => match command {
            ClientsCommands::Add { args } => cli::clients::add(args),
            ClientsCommands::List => cli::clients::list(),
            ClientsCommands::Show { client } => cli::clients::show(&client),
            ClientsCommands::Edit { client, args } => cli::clients::edit(&client, args),
        },
        Commands::Ledger { command } => match command {
            LedgerCommands::Add {
                client,
                kind,
                amount,
                at,
                note,
                state,
            } => cli::ledger::add(&client, kind, amount, &at, note, state),
            LedgerCommands::Edit {
                client,
                entry,
                amount,
                at,
                note,
                state,
            } => cli::ledger::edit(&client, &entry, amount, at, note, state),
            LedgerCommands::Delete { client, entry } => cli::ledger::delete(&client, &entry),
            LedgerCommands::List { client } => cli::ledger::list(&client),
        },
        Commands::Recompute { client, all } => cli::recompute::run(client, all),
        Commands::Commit { file } => cli::commit::run(&file),
        Commands::Day { date, kind } => cli::planner::day(&date, kind),
        Commands::Month { month, kind } => cli::planner::month(&month, kind),
        Commands::Suggest { date, lookback } => cli::planner::suggest(&date, lookback),
        Commands::Status => cli::status::run(),
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            generate(shell, &mut command, "tally", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
