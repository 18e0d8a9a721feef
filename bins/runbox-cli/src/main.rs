mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use runbox_common::types::Language;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "runbox-cli")]
#[command(about = "Runbox CLI - Run code in sandboxed containers and manage language workers", long_about = None)]
struct Cli {
    /// Print executor logs to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a source file once and print the result
    Run {
        /// Language (python, javascript, cpp)
        #[arg(short, long)]
        language: Language,

        /// Source file to run
        #[arg(short, long)]
        file: PathBuf,

        /// Text fed to the program's stdin
        #[arg(short, long, conflicts_with = "input_file")]
        input: Option<String>,

        /// File fed to the program's stdin
        #[arg(long)]
        input_file: Option<PathBuf>,

        /// Use a single-use container instead of the language worker
        #[arg(long, default_value = "false")]
        ephemeral: bool,

        /// Print the raw result as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Build worker images (all languages if none given)
    Build {
        #[arg(short, long)]
        language: Option<Language>,
    },

    /// Start workers (all languages if none given)
    Start {
        #[arg(short, long)]
        language: Option<Language>,
    },

    /// Stop and remove workers (all languages if none given)
    Stop {
        #[arg(short, long)]
        language: Option<Language>,
    },

    /// Show which workers are running
    Status,

    /// List supported languages and their resource limits
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run {
            language,
            file,
            input,
            input_file,
            ephemeral,
            json,
        } => {
            let input = commands::resolve_input(input, input_file.as_deref())?;
            let ok = commands::run_file(language, &file, &input, ephemeral, json).await?;
            if !ok {
                std::process::exit(1);
            }
        }
        Commands::Build { language } => {
            commands::build_images(language).await?;
        }
        Commands::Start { language } => {
            commands::start_workers(language).await?;
        }
        Commands::Stop { language } => {
            commands::stop_workers(language).await?;
        }
        Commands::Status => {
            commands::show_status().await?;
        }
        Commands::Languages => {
            commands::list_languages()?;
        }
    }

    Ok(())
}
