//! card-eval CLI - business-card VLM evaluation tool

use std::path::PathBuf;

use card_eval::{ModelSpec, Pairing, TurnMode};
use clap::{Args, Parser, Subcommand};

mod commands;
mod logging;

/// Vision-language model evaluation on business cards.
#[derive(Parser)]
#[command(name = "card-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Environment file with provider secrets
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run models over a card corpus and write a results CSV
    Run(RunArgs),

    /// Inspect a card corpus
    Corpus {
        #[command(subcommand)]
        action: CorpusAction,
    },

    /// Show latency statistics for a results CSV
    Stats {
        /// Results CSV file
        input: PathBuf,

        /// Group by image
        #[arg(long, conflicts_with = "by_turn")]
        by_image: bool,

        /// Group by turn
        #[arg(long)]
        by_turn: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Chat with a model about uploaded card images
    Chat(ChatArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of card images
    #[arg(long)]
    images: Option<PathBuf>,

    /// Questions file, one per line
    #[arg(long)]
    questions: Option<PathBuf>,

    /// Results CSV file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Question mode (single, multi-turn)
    #[arg(long)]
    mode: Option<TurnMode>,

    /// Image/question pairing (zip, cross)
    #[arg(long)]
    pairing: Option<Pairing>,

    /// Model to evaluate as provider:name (repeatable)
    #[arg(short, long = "model")]
    models: Vec<ModelSpec>,

    /// File holding the system instruction
    #[arg(long)]
    system_instruction_file: Option<PathBuf>,

    /// Sampling temperature
    #[arg(long)]
    temperature: Option<f32>,

    /// Nucleus sampling threshold
    #[arg(long)]
    top_p: Option<f32>,

    /// Top-k sampling
    #[arg(long)]
    top_k: Option<u32>,

    /// Maximum response tokens
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Write an "Error: ..." row when a session fails
    #[arg(long)]
    record_failures: bool,
}

#[derive(Subcommand)]
pub enum CorpusAction {
    /// List images in run order
    Images {
        /// Image directory
        path: PathBuf,
    },

    /// Parse a questions file
    Questions {
        /// Questions file
        path: PathBuf,

        /// Question mode (single, multi-turn)
        #[arg(long, default_value = "single")]
        mode: TurnMode,
    },
}

#[derive(Args)]
pub struct ChatArgs {
    /// Model as provider:name
    #[arg(short, long, default_value = "gemini:gemini-2.0-flash")]
    model: ModelSpec,

    /// TOML config file for provider settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// File holding the system instruction
    #[arg(long)]
    system_instruction_file: Option<PathBuf>,

    /// Where /save writes the transcript
    #[arg(long, default_value = "chat_history.json")]
    transcript: PathBuf,

    /// Images to upload before the first message
    #[arg(long = "upload")]
    uploads: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // before logging, so RUST_LOG from the file applies
    let env_status = logging::load_env_file(&cli.env_file);
    logging::init_logging(cli.verbose)?;
    logging::report_env_file(&cli.env_file, &env_status);

    match cli.command {
        Commands::Run(args) => commands::run::run(args, cli.verbose),
        Commands::Corpus { action } => commands::corpus::run(action, cli.verbose),
        Commands::Stats { input, by_image, by_turn, json } => {
            commands::stats::run(input, by_image, by_turn, json, cli.verbose)
        }
        Commands::Chat(args) => commands::chat::run(args, cli.verbose),
    }
}
