//! sheetsync CLI entry point.

use clap::Parser;
use sheetsync::cli::commands;
use sheetsync::cli::{Cli, Commands};
use sheetsync::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    if cli.no_color {
        colored::control::set_override(false);
    }

    // --json OR non-TTY stdout
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
        .and_then(|runtime| runtime.block_on(run(&cli, json)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

async fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    let db = cli.db.as_ref();
    let source = cli.source.as_ref();

    match &cli.command {
        Commands::Sync { form, full } => {
            commands::sync::execute_sync(form, *full, db, source, json).await
        }
        Commands::List {
            form,
            refresh,
            force,
        } => commands::sync::execute_list(form, *refresh, *force, db, source, json).await,

        Commands::Get {
            form,
            entry,
            force,
            row,
        } => commands::entry::execute_get(form, entry, *force, *row, db, source, json).await,
        Commands::Put(args) => {
            commands::entry::execute_put(args, db, cli.actor.as_deref(), json).await
        }
        Commands::Delete { form, entry } => {
            commands::entry::execute_delete(form, entry, db, json).await
        }

        Commands::Status { form } => commands::status::execute(form.as_deref(), db, json).await,
    }
}
