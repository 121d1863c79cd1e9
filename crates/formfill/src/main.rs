mod cli;
mod config;
mod ingest;
mod logging;
mod run;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};
use crate::config::FormfillConfig;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = if cli.verbose {
        true
    } else {
        logging::env_flag()
    };
    logging::init(verbose);
    let mut config = FormfillConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Ingest {
            input,
            semantic,
            pattern,
        } => {
            let pattern = pattern.unwrap_or_else(|| config.pattern.clone());
            ingest::run(&config, &input, &pattern, semantic)
        }
        Command::Fill {
            document,
            page_images,
            report,
            output_dir,
            highlight,
        } => {
            if let Some(dir) = output_dir {
                config.executor.output_dir = dir;
            }
            if highlight.is_some() {
                config.executor.highlight = highlight;
            }
            run::fill(
                &config,
                run::FillArgs {
                    document,
                    page_images,
                    report,
                },
            )
        }
        Command::Index { document } => run::index(&config, &document),
        Command::Stats => run::stats(&config),
    }
}
