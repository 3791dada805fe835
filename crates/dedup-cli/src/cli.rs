use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dedup",
    about = "Content-addressed file store that keeps one copy of every distinct file",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Store directory (overrides the config file)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// TOML config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store files, skipping content that is already present
    Put(PutArgs),
    /// Write a stored object's content to a file or stdout
    Get(GetArgs),
    /// List stored objects
    Ls(LsArgs),
    /// Show physical vs. logical storage usage
    Stats(StatsArgs),
    /// Start the HTTP server
    Serve(ServeArgs),
}

#[derive(Args)]
pub struct PutArgs {
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,
    /// MIME type to record (guessed from the extension if omitted)
    #[arg(long)]
    pub content_type: Option<String>,
}

#[derive(Args)]
pub struct GetArgs {
    /// Hex digest of the object
    pub digest: String,
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct LsArgs {
    /// Case-insensitive filename substring
    #[arg(long)]
    pub search: Option<String>,
    #[arg(long)]
    pub file_type: Option<String>,
    #[arg(long)]
    pub size_min: Option<String>,
    #[arg(long)]
    pub size_max: Option<String>,
    /// YYYY-MM-DD, inclusive
    #[arg(long)]
    pub after: Option<String>,
    /// YYYY-MM-DD, inclusive
    #[arg(long)]
    pub before: Option<String>,
}

#[derive(Args)]
pub struct StatsArgs {}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}
