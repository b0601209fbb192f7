use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use swap_cli::{check_patterns, load_config, run_batch, write_reports};

#[derive(Parser)]
#[command(name = "swap-cli", version, about = "Request-pair analyzer and swap-request templating engine")]
struct Cli {
    /// Path to a TOML configuration file; falls back to built-in defaults
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a batch of candidate request pairs from a JSON Lines file
    Run {
        /// Path to the JSON Lines input file
        input: PathBuf,
        /// Where to write the JSON Lines report (defaults to stdout)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load and report on the configured pattern files, without processing
    /// any candidates
    CheckPatterns,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "swap_cli=info".into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let rules = config.load_rules().context("loading pattern files")?;

    match cli.command {
        Command::Run { input, output } => {
            info!(input = %input.display(), "processing candidate batch");
            let reports = run_batch(&input, &config, &rules)?;
            info!(count = reports.len(), "finished processing batch");

            match output {
                Some(path) => {
                    let mut file = std::fs::File::create(&path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    write_reports(&reports, &mut file)?;
                }
                None => {
                    let mut stdout = std::io::stdout();
                    write_reports(&reports, &mut stdout)?;
                }
            }
        }
        Command::CheckPatterns => {
            let report = check_patterns(&rules);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
