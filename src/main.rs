use clap::Parser as _;
use solvis_sc3_tools::commands;
use tracing_subscriber::filter::targets::Targets;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

const LOG_FILTER_VARIABLE: &str = "SOLVIS_SC3_TOOLS_LOG";

/// Inspect and control a Solvis SC3 heating controller over Modbus TCP.
#[derive(clap::Parser)]
#[clap(version, author)]
enum Commands {
    Registers(commands::registers::Args),
    Read(commands::read::Args),
    Write(commands::write::Args),
}

#[derive(thiserror::Error, Debug)]
#[error("SOLVIS_SC3_TOOLS_LOG does not contain a valid log filter")]
struct LogFilterError(#[source] tracing_subscriber::filter::ParseError);

fn init_logging() -> Result<(), LogFilterError> {
    let filter = match std::env::var(LOG_FILTER_VARIABLE) {
        Ok(description) => description.parse::<Targets>().map_err(LogFilterError)?,
        Err(_) => Targets::new().with_default(tracing::Level::WARN),
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
    Ok(())
}

fn exit_code(error: &dyn std::error::Error) -> i32 {
    eprintln!("error: {error}");
    let mut cause = error.source();
    while let Some(e) = cause {
        eprintln!("  because: {e}");
        cause = e.source();
    }
    1
}

fn main() {
    if let Err(e) = init_logging() {
        std::process::exit(exit_code(&e));
    }
    let result = match Commands::parse() {
        Commands::Registers(args) => commands::registers::run(args).map_err(|e| exit_code(&e)),
        Commands::Read(args) => commands::read::run(args).map_err(|e| exit_code(&e)),
        Commands::Write(args) => commands::write::run(args).map_err(|e| exit_code(&e)),
    };
    std::process::exit(result.err().unwrap_or(0));
}
