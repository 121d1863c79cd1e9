use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use formfill_core::{Coordinate, FieldIndexer};
use formfill_index::JsonlWriter;
use formfill_llm::{ImageAttachment, LlmClient};
use formfill_rag::{EmbeddingClient, FillPipeline, FillReport, LlmClassifier, RetrievalEngine};

use crate::config::FormfillConfig;

pub struct FillArgs {
    pub document: PathBuf,
    pub page_images: Vec<PathBuf>,
    pub report: Option<PathBuf>,
}

pub fn fill(config: &FormfillConfig, args: FillArgs) -> Result<()> {
    let classifier = LlmClassifier::new(LlmClient::new(config.llm.clone())?);
    let engine = RetrievalEngine::new(
        config.retrieval.clone(),
        EmbeddingClient::new(&config.embedding)?,
    );
    let pipeline = FillPipeline::new(
        config.indexer.clone(),
        config.executor.clone(),
        config.orchestrator.clone(),
        &classifier,
        &engine,
    );
    let report = run_fill(args, |document, images| Ok(pipeline.run(document, images)?))?;
    println!("{}", report.outcome.output_path.display());
    Ok(())
}

fn run_fill<F>(args: FillArgs, fill_fn: F) -> Result<FillReport>
where
    F: FnOnce(&Path, Vec<ImageAttachment>) -> Result<FillReport>,
{
    let images = args
        .page_images
        .iter()
        .map(|path| ImageAttachment::from_path(path))
        .collect::<Result<Vec<_>>>()?;
    let report = fill_fn(&args.document, images)
        .with_context(|| format!("failed to fill {}", args.document.display()))?;
    if let Some(path) = &args.report {
        append_report(path, &report)?;
        info!(report = %path.display(), "decision report written");
    }
    Ok(report)
}

fn append_report(path: &Path, report: &FillReport) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open report {}", path.display()))?;
    let mut writer = JsonlWriter::new(BufWriter::new(file));
    for record in report.records() {
        writer.write_record(&record)?;
    }
    writer.into_inner().flush()?;
    Ok(())
}

#[derive(Serialize)]
struct FieldMapEntry<'a> {
    index: u32,
    coordinate: Coordinate,
    original_text: &'a str,
}

#[derive(Serialize)]
struct FieldMap<'a> {
    tagged_path: &'a Path,
    fields: Vec<FieldMapEntry<'a>>,
}

pub fn index(config: &FormfillConfig, document: &Path) -> Result<()> {
    let indexed = FieldIndexer::new(config.indexer.clone()).index_file(document)?;
    let map = FieldMap {
        tagged_path: &indexed.tagged_path,
        fields: indexed
            .fields
            .iter()
            .map(|f| FieldMapEntry {
                index: f.index,
                coordinate: f.coordinate,
                original_text: &f.original_text,
            })
            .collect(),
    };
    println!("{}", serde_json::to_string_pretty(&map)?);
    Ok(())
}

pub fn stats(config: &FormfillConfig) -> Result<()> {
    let engine = RetrievalEngine::new(
        config.retrieval.clone(),
        EmbeddingClient::new(&config.embedding)?,
    );
    println!("{}", serde_json::to_string_pretty(&engine.stats())?);
    Ok(())
}
