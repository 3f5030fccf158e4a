use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(
    name = "ytsum",
    about = "YouTube video summarizer",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// YouTube video URL or video ID (reads from stdin if omitted)
    pub url: Option<String>,

    /// Preferred caption language, most preferred first (repeatable; default from config)
    #[arg(short, long = "lang")]
    pub langs: Vec<String>,

    /// LLM model for summarization (default from config)
    #[arg(long)]
    pub model: Option<String>,

    /// Output format: text (default), json
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Write output to file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print the assembled transcript instead of a summary
    #[arg(long)]
    pub transcript: bool,

    /// Don't fall back to yt-dlp when captions can't be fetched directly
    #[arg(long)]
    pub no_external: bool,

    /// Print the configured models and their chunk budgets, then exit
    #[arg(long)]
    pub list_models: bool,

    /// Show caption strategy and metadata
    #[arg(short, long)]
    pub verbose: bool,
}
