use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod config;
mod evaluation;
mod feedback;
mod generation;
mod judge;
mod models;
mod output;
mod retry;
mod runner;
mod statistics;

use crate::config::Config;
use crate::output::OutputFormat;
use crate::runner::Runner;

/// RAG system-prompt evaluation - generate answers with a retrieval-augmented
/// chat deployment, then score them for correctness, relevance and faithfulness
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Verbose output - show progress for each API request
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer every example that has no response yet
    Generate {
        /// Path to the TOML run file
        run_file: PathBuf,
        /// Example collection to read
        #[arg(short, long)]
        input: PathBuf,
        /// Where to write the collection with responses
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Score generated responses and write result tables
    Evaluate {
        /// Path to the TOML run file
        run_file: PathBuf,
        /// Example collection with responses
        #[arg(short, long)]
        input: PathBuf,
        /// Directory for the CSV tables
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Only evaluate the first N examples
        #[arg(long)]
        limit: Option<usize>,
        /// Summary format: plain or json
        #[arg(short, long, default_value = "plain")]
        format: OutputFormat,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Secrets may come from a .env file
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Generate {
            run_file,
            input,
            output,
        } => {
            let runner = Runner::new(Config::from_file(&run_file)?);
            runner.run_generation(&input, &output).await?;
        }
        Command::Evaluate {
            run_file,
            input,
            out_dir,
            limit,
            format,
        } => {
            let runner = Runner::new(Config::from_file(&run_file)?);
            runner
                .run_evaluation(&input, &out_dir, limit, format)
                .await?;
        }
    }

    Ok(())
}
