use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use formfill_core::{
    ApplyOutcome, Coordinate, ExecutorConfig, FieldIndexer, FieldState, FillExecutor,
    IndexerConfig,
};
use formfill_llm::ImageAttachment;

use crate::classifier::FieldClassifier;
use crate::engine::RetrievalEngine;
use crate::error::Result;
use crate::orchestrator::{DecisionOrchestrator, OrchestratorConfig, Reconciliation};

/// One line of the per-run decision report.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionRecord {
    pub document: PathBuf,
    pub index: u32,
    pub coordinate: Coordinate,
    pub original_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_type: Option<String>,
    pub decision: FieldState,
    pub evidence: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FillReport {
    pub source: PathBuf,
    pub tagged_path: PathBuf,
    pub outcome: ApplyOutcome,
    pub reconciliation: Reconciliation,
}

impl FillReport {
    pub fn records(&self) -> Vec<DecisionRecord> {
        self.reconciliation
            .fields
            .iter()
            .map(|field| DecisionRecord {
                document: self.source.clone(),
                index: field.index,
                coordinate: field.coordinate,
                original_text: field.original_text.clone(),
                description: field.description.clone(),
                suggested_type: field.suggested_type.clone(),
                decision: field.state.clone(),
                evidence: field.evidence.iter().map(|e| e.id.clone()).collect(),
            })
            .collect()
    }
}

/// Tag, classify, retrieve, decide and write back one document.
pub struct FillPipeline<'a> {
    indexer: FieldIndexer,
    executor: FillExecutor,
    orchestrator: DecisionOrchestrator<'a>,
}

impl<'a> FillPipeline<'a> {
    pub fn new(
        indexer: IndexerConfig,
        executor: ExecutorConfig,
        orchestrator: OrchestratorConfig,
        classifier: &'a dyn FieldClassifier,
        retrieval: &'a RetrievalEngine,
    ) -> Self {
        Self {
            indexer: FieldIndexer::new(indexer),
            executor: FillExecutor::new(executor),
            orchestrator: DecisionOrchestrator::new(orchestrator, classifier, retrieval),
        }
    }

    pub fn run(&self, document: &Path, page_images: Vec<ImageAttachment>) -> Result<FillReport> {
        let mut indexed = self.indexer.index_file(document)?;
        let text = indexed.document.render_text();
        info!(
            document = %document.display(),
            fields = indexed.fields.len(),
            "document tagged"
        );
        let reconciliation = self.orchestrator.run(&text, page_images, indexed.fields);
        let outcome = self.executor.apply(
            &mut indexed.document,
            &reconciliation.fills,
            &reconciliation.restores,
        )?;
        info!(
            output = %outcome.output_path.display(),
            filled = outcome.filled.len(),
            restored = outcome.restored.len(),
            skipped = outcome.skipped.len(),
            "document written"
        );
        Ok(FillReport {
            source: document.to_path_buf(),
            tagged_path: indexed.tagged_path,
            outcome,
            reconciliation,
        })
    }
}
