use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "formfill", about = "Fill table forms from a private knowledge base")]
pub struct Cli {
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub verbose: bool,
    /// TOML configuration file; `formfill.toml` is used when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add knowledge files (a file or a directory) to the retrieval index.
    Ingest {
        input: PathBuf,
        /// Let the model split the text instead of fixed windows.
        #[arg(long, default_value_t = false)]
        semantic: bool,
        /// Comma-separated globs, e.g. `*.md,notes/*.txt`.
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Tag, classify and fill one document.
    Fill {
        document: PathBuf,
        #[arg(long = "page-image")]
        page_images: Vec<PathBuf>,
        /// Append one JSON line per field decision to this file.
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Shade filled cells with this RGB hex colour.
        #[arg(long)]
        highlight: Option<String>,
    },
    /// Tag a document and print its field map.
    Index { document: PathBuf },
    /// Show retrieval index statistics.
    Stats,
}
