use std::io::IsTerminal;
use std::process::ExitCode;

use clap::Parser;
use rproj::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load .env early; ignore if missing.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Keep stdout clean for machine-readable output.
    let json = matches!(&cli.command, Commands::Sync(args) if args.json);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_target(false);
    if json {
        builder
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .init();
    } else {
        builder.with_ansi(std::io::stdout().is_terminal()).init();
    }

    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    match rproj::run(cli) {
        Ok(status) => status.exit_code(),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
