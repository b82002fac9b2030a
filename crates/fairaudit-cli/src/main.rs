mod commands;
mod input;
mod output;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::process;
use tracing_subscriber::EnvFilter;

use commands::audit::AuditArgs;
use commands::cohort::{DescribeArgs, SuggestAttributesArgs};

/// Fairness audits for clinical risk models
#[derive(Parser)]
#[command(
    name = "fairaudit",
    version,
    about = "Fairness audits for clinical risk models",
    long_about = "Audit a binary clinical risk model's predictions for fairness across \
                  patient subgroups: discrimination and calibration per group, gaps \
                  against a reference group, bootstrap confidence intervals, and a \
                  governance recommendation from configurable thresholds."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, default_value = "json", global = true)]
    output: OutputFormat,

    /// Log verbosity on stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full fairness audit
    Audit(AuditArgs),
    /// Descriptive statistics of a cohort by sensitive attribute
    Describe(DescribeArgs),
    /// List cohort columns that look like sensitive attributes
    SuggestAttributes(SuggestAttributesArgs),
    /// Print version information
    Version,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Csv,
    Minimal,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result: Result<serde_json::Value, Box<dyn std::error::Error>> = match cli.command {
        Commands::Audit(args) => commands::audit::run_audit(args),
        Commands::Describe(args) => commands::cohort::run_describe(args),
        Commands::SuggestAttributes(args) => commands::cohort::run_suggest_attributes(args),
        Commands::Version => {
            println!("fairaudit {}", env!("CARGO_PKG_VERSION"));
            return;
        }
    };

    match result {
        Ok(value) => {
            output::format_output(&cli.output, &value);
            process::exit(0);
        }
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            process::exit(1);
        }
    }
}
