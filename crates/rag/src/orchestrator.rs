use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use formfill_core::{strip_tag, Field, FieldState, FillEntry, RestoreEntry};
use formfill_llm::ImageAttachment;

use crate::classifier::{
    DecisionField, DecisionRequest, DecisionResponse, DescribeRequest, DescriptionResponse,
    FieldClassifier,
};
use crate::engine::RetrievalEngine;

/// What happens to a field the first round neither describes nor restores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UndescribedPolicy {
    #[default]
    Fill,
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub undescribed: UndescribedPolicy,
    pub evidence_top_k: usize,
    /// Use the model's restored text instead of the saved original.
    pub trust_model_restore: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            undescribed: UndescribedPolicy::Fill,
            evidence_top_k: 3,
            trust_model_restore: false,
        }
    }
}

/// Final, disjoint decision sets for one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Reconciliation {
    pub fills: Vec<FillEntry>,
    pub restores: Vec<RestoreEntry>,
    /// Described fields without a final decision; they stay tagged.
    pub unresolved: Vec<u32>,
    pub fields: Vec<Field>,
}

impl Reconciliation {
    fn from_fields(fields: Vec<Field>) -> Self {
        let mut out = Self::default();
        for field in &fields {
            match &field.state {
                FieldState::Fill(content) => out.fills.push(FillEntry {
                    index: field.index,
                    coordinate: field.coordinate,
                    content: content.clone(),
                    format: field.format.clone(),
                }),
                FieldState::Restore(text) => out.restores.push(RestoreEntry {
                    index: field.index,
                    coordinate: field.coordinate,
                    text: text.clone(),
                    format: field.format.clone(),
                }),
                FieldState::Unresolved | FieldState::Described => out.unresolved.push(field.index),
            }
        }
        out.fields = fields;
        out
    }
}

/// Drives the describe round, evidence lookup and the decision round.
pub struct DecisionOrchestrator<'a> {
    config: OrchestratorConfig,
    classifier: &'a dyn FieldClassifier,
    retrieval: &'a RetrievalEngine,
}

impl<'a> DecisionOrchestrator<'a> {
    pub fn new(
        config: OrchestratorConfig,
        classifier: &'a dyn FieldClassifier,
        retrieval: &'a RetrievalEngine,
    ) -> Self {
        Self {
            config,
            classifier,
            retrieval,
        }
    }

    pub fn run(
        &self,
        document_text: &str,
        page_images: Vec<ImageAttachment>,
        fields: Vec<Field>,
    ) -> Reconciliation {
        let mut slots: IndexMap<u32, Field> = IndexMap::with_capacity(fields.len());
        for field in fields {
            if let Some(kept) = slots.get(&field.index) {
                warn!(
                    index = field.index,
                    kept = ?kept.coordinate,
                    dropped = ?field.coordinate,
                    "duplicate field index; later cell is not reconciled"
                );
                continue;
            }
            slots.insert(field.index, field);
        }

        let first = self
            .classifier
            .describe(&DescribeRequest {
                document_text: document_text.to_string(),
                page_images,
            })
            .unwrap_or_else(|err| {
                warn!(error = %err, round = 1, "classification failed; round treated as empty");
                DescriptionResponse::default()
            });
        self.apply_descriptions(&mut slots, first);

        let mut described = 0usize;
        for field in slots.values_mut().filter(|f| f.is_described()) {
            field.evidence = self
                .retrieval
                .semantic_search(std::slice::from_ref(field), self.config.evidence_top_k);
            described += 1;
        }

        if described > 0 {
            let request = DecisionRequest {
                fields: slots
                    .values()
                    .filter(|f| f.is_described())
                    .map(|f| DecisionField {
                        index: f.index,
                        original_text: f.original_text.clone(),
                        description: f.description.clone().unwrap_or_default(),
                        suggested_content_type: f.suggested_type.clone().unwrap_or_default(),
                        evidence: f.evidence.clone(),
                    })
                    .collect(),
            };
            let second = self.classifier.decide(&request).unwrap_or_else(|err| {
                warn!(error = %err, round = 2, "classification failed; round treated as empty");
                DecisionResponse::default()
            });
            self.apply_decisions(&mut slots, second);
        } else {
            debug!("no described fields; skipping decision round");
        }

        let outcome = Reconciliation::from_fields(slots.into_values().collect());
        info!(
            fill = outcome.fills.len(),
            restore = outcome.restores.len(),
            unresolved = outcome.unresolved.len(),
            "reconciled field decisions"
        );
        outcome
    }

    fn apply_descriptions(&self, slots: &mut IndexMap<u32, Field>, response: DescriptionResponse) {
        for cell in response.restored_cells {
            let Some(field) = lookup(slots, cell.index, 1) else {
                continue;
            };
            let text = self.restore_text(field, &cell.restored_content);
            if let Err(err) = field.restore(text) {
                debug!(%err, "duplicate restore");
            }
        }
        for item in response.fields_to_fill {
            let Some(field) = lookup(slots, item.index, 1) else {
                continue;
            };
            if let Err(err) =
                field.describe(item.description, item.suggested_content_type, item.field_type)
            {
                debug!(%err, "description ignored");
            }
        }
        for field in slots.values_mut() {
            if field.state != FieldState::Unresolved {
                continue;
            }
            let result = match self.config.undescribed {
                UndescribedPolicy::Fill => field.describe(String::new(), None, None),
                UndescribedPolicy::Drop => field.restore(field.original_text.clone()),
            };
            if let Err(err) = result {
                debug!(%err, "undescribed policy not applied");
            }
        }
    }

    fn apply_decisions(&self, slots: &mut IndexMap<u32, Field>, response: DecisionResponse) {
        for cell in response.restored_cells {
            let Some(field) = lookup(slots, cell.index, 2) else {
                continue;
            };
            let text = self.restore_text(field, &cell.restored_content);
            if let Err(err) = field.restore(text) {
                debug!(%err, "duplicate restore");
            }
        }
        for cell in response.filled_cells {
            let Some(field) = lookup(slots, cell.index, 2) else {
                continue;
            };
            field.redescribe(cell.description, cell.suggested_content_type);
            if let Err(err) = field.fill(cell.content) {
                debug!(%err, "fill ignored");
            }
        }
    }

    fn restore_text(&self, field: &Field, model_text: &str) -> String {
        if self.config.trust_model_restore && !model_text.trim().is_empty() {
            strip_tag(model_text)
        } else {
            field.original_text.clone()
        }
    }
}

fn lookup(slots: &mut IndexMap<u32, Field>, index: Option<u32>, round: u8) -> Option<&mut Field> {
    let Some(index) = index else {
        warn!(round, "model returned an entry without a usable index");
        return None;
    };
    let field = slots.get_mut(&index);
    if field.is_none() {
        warn!(round, index, "ignoring unknown field index");
    }
    field
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::classifier::{FieldDescription, FilledCell, RestoredCell};
    use crate::embedding::EmbeddingClient;
    use crate::engine::RetrievalConfig;
    use crate::error::{RagError, Result};
    use formfill_core::{Coordinate, FormatSnapshot};
    use formfill_index::KnowledgeChunk;
    use tempfile::tempdir;

    #[derive(Default)]
    struct Scripted {
        first: Option<DescriptionResponse>,
        second: Option<DecisionResponse>,
        seen: RefCell<Vec<u32>>,
    }

    impl FieldClassifier for Scripted {
        fn describe(&self, _request: &DescribeRequest) -> Result<DescriptionResponse> {
            self.first
                .clone()
                .ok_or_else(|| RagError::ClassificationParse("scripted failure".into()))
        }

        fn decide(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
            self.seen
                .borrow_mut()
                .extend(request.fields.iter().map(|f| f.index));
            self.second
                .clone()
                .ok_or_else(|| RagError::ClassificationParse("scripted failure".into()))
        }
    }

    fn fields(texts: &[&str]) -> Vec<Field> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                Field::new(
                    i as u32 + 1,
                    Coordinate::new(0, i / 2, i % 2),
                    *text,
                    FormatSnapshot::default(),
                )
            })
            .collect()
    }

    fn described(index: u32, field_type: Option<&str>) -> FieldDescription {
        FieldDescription {
            index: Some(index),
            description: format!("field {index}"),
            suggested_content_type: Some("text".into()),
            field_type: field_type.map(str::to_string),
        }
    }

    fn restored(index: u32, text: &str) -> RestoredCell {
        RestoredCell {
            index: Some(index),
            restored_content: text.into(),
        }
    }

    fn filled(index: u32, content: &str) -> FilledCell {
        FilledCell {
            index: Some(index),
            content: content.into(),
            ..FilledCell::default()
        }
    }

    fn offline_engine(dir: &std::path::Path) -> RetrievalEngine {
        RetrievalEngine::new(
            RetrievalConfig {
                working_dir: dir.to_path_buf(),
                ..RetrievalConfig::default()
            },
            EmbeddingClient::hash(),
        )
    }

    #[test]
    fn three_by_two_form_is_split_into_fill_and_restore() {
        let dir = tempdir().unwrap();
        let engine = offline_engine(dir.path());
        let classifier = Scripted {
            first: Some(DescriptionResponse {
                fields_to_fill: vec![described(2, Some("name")), described(4, None)],
                restored_cells: vec![
                    restored(1, "Name"),
                    restored(3, "Age"),
                    restored(5, "Dept"),
                    restored(6, "Engineering"),
                ],
            }),
            second: Some(DecisionResponse {
                filled_cells: vec![filled(2, "Alice"), filled(4, "30")],
                restored_cells: Vec::new(),
            }),
            ..Scripted::default()
        };
        let orchestrator =
            DecisionOrchestrator::new(OrchestratorConfig::default(), &classifier, &engine);
        let outcome = orchestrator.run(
            "Name [1] | [2]\nAge [3] | [4]",
            Vec::new(),
            fields(&["Name", "", "Age", "", "Dept", "Engineering"]),
        );
        let fill: Vec<u32> = outcome.fills.iter().map(|f| f.index).collect();
        let restore: Vec<u32> = outcome.restores.iter().map(|r| r.index).collect();
        assert_eq!(fill, vec![2, 4]);
        assert_eq!(restore, vec![1, 3, 5, 6]);
        assert_eq!(outcome.fills[0].content, "Alice");
        assert!(outcome.unresolved.is_empty());
        assert_eq!(*classifier.seen.borrow(), vec![2, 4]);
    }

    #[test]
    fn restore_wins_and_unknown_indices_are_ignored() {
        let dir = tempdir().unwrap();
        let engine = offline_engine(dir.path());
        let classifier = Scripted {
            first: Some(DescriptionResponse {
                fields_to_fill: vec![described(1, None), described(2, None), described(9, None)],
                restored_cells: vec![restored(1, "model text")],
            }),
            second: Some(DecisionResponse {
                filled_cells: vec![filled(1, "x"), filled(2, "y"), filled(2, "z"), filled(7, "w")],
                restored_cells: vec![restored(2, "")],
            }),
            ..Scripted::default()
        };
        let orchestrator =
            DecisionOrchestrator::new(OrchestratorConfig::default(), &classifier, &engine);
        let outcome = orchestrator.run("", Vec::new(), fields(&["Label", "old"]));
        assert!(outcome.fills.is_empty());
        let restores: Vec<(u32, &str)> = outcome
            .restores
            .iter()
            .map(|r| (r.index, r.text.as_str()))
            .collect();
        assert_eq!(restores, vec![(1, "Label"), (2, "old")]);
        assert_eq!(*classifier.seen.borrow(), vec![2]);
    }

    #[test]
    fn undescribed_policy_decides_silent_fields() {
        let dir = tempdir().unwrap();
        let engine = offline_engine(dir.path());
        let classifier = Scripted {
            first: Some(DescriptionResponse::default()),
            second: Some(DecisionResponse {
                filled_cells: vec![filled(1, "value")],
                restored_cells: Vec::new(),
            }),
            ..Scripted::default()
        };
        let fill = DecisionOrchestrator::new(OrchestratorConfig::default(), &classifier, &engine)
            .run("", Vec::new(), fields(&["", "x"]));
        assert_eq!(fill.fills.len(), 1);
        assert_eq!(fill.unresolved, vec![2]);

        let drop = DecisionOrchestrator::new(
            OrchestratorConfig {
                undescribed: UndescribedPolicy::Drop,
                ..OrchestratorConfig::default()
            },
            &classifier,
            &engine,
        )
        .run("", Vec::new(), fields(&["", "x"]));
        assert!(drop.fills.is_empty());
        assert_eq!(drop.restores.len(), 2);
    }

    #[test]
    fn malformed_rounds_degrade_to_empty() {
        let dir = tempdir().unwrap();
        let engine = offline_engine(dir.path());
        let classifier = Scripted::default();
        let outcome = DecisionOrchestrator::new(
            OrchestratorConfig {
                undescribed: UndescribedPolicy::Drop,
                ..OrchestratorConfig::default()
            },
            &classifier,
            &engine,
        )
        .run("", Vec::new(), fields(&["a", ""]));
        assert_eq!(outcome.restores.len(), 2);
        assert!(classifier.seen.borrow().is_empty());

        let outcome = DecisionOrchestrator::new(OrchestratorConfig::default(), &classifier, &engine)
            .run("", Vec::new(), fields(&["a", ""]));
        assert!(outcome.fills.is_empty());
        assert!(outcome.restores.is_empty());
        assert_eq!(outcome.unresolved, vec![1, 2]);
    }

    #[test]
    fn trusted_model_restore_text_is_untagged() {
        let dir = tempdir().unwrap();
        let engine = offline_engine(dir.path());
        let classifier = Scripted {
            first: Some(DescriptionResponse {
                fields_to_fill: Vec::new(),
                restored_cells: vec![restored(1, "Name [1]")],
            }),
            second: None,
            ..Scripted::default()
        };
        let outcome = DecisionOrchestrator::new(
            OrchestratorConfig {
                trust_model_restore: true,
                undescribed: UndescribedPolicy::Drop,
                ..OrchestratorConfig::default()
            },
            &classifier,
            &engine,
        )
        .run("", Vec::new(), fields(&["Nmae"]));
        assert_eq!(outcome.restores[0].text, "Name");
    }

    #[test]
    fn described_fields_receive_evidence() {
        let dir = tempdir().unwrap();
        let engine = offline_engine(dir.path());
        engine
            .add(vec![
                KnowledgeChunk::new("hr.txt_0", "邮箱: alice@example.com"),
                KnowledgeChunk::new("hr.txt_1", "Office address: 1 Main Street"),
            ])
            .unwrap();
        let classifier = Scripted {
            first: Some(DescriptionResponse {
                fields_to_fill: vec![described(1, Some("email"))],
                restored_cells: Vec::new(),
            }),
            second: Some(DecisionResponse::default()),
            ..Scripted::default()
        };
        let outcome = DecisionOrchestrator::new(OrchestratorConfig::default(), &classifier, &engine)
            .run("", Vec::new(), fields(&[""]));
        let evidence = &outcome.fields[0].evidence;
        assert_eq!(evidence.len(), 2);
        assert_eq!(evidence[0].id, "hr.txt_0");
        assert_eq!(evidence[0].rank, 1);
    }

    #[test]
    fn repeated_index_keeps_the_first_cell() {
        let dir = tempdir().unwrap();
        let engine = offline_engine(dir.path());
        let classifier = Scripted {
            first: Some(DescriptionResponse {
                fields_to_fill: vec![described(1, None)],
                restored_cells: Vec::new(),
            }),
            second: Some(DecisionResponse {
                filled_cells: vec![filled(1, "Alice")],
                restored_cells: Vec::new(),
            }),
            ..Scripted::default()
        };
        let mut duplicated = fields(&["", "copy"]);
        duplicated[1].index = 1;
        let outcome = DecisionOrchestrator::new(OrchestratorConfig::default(), &classifier, &engine)
            .run("", Vec::new(), duplicated);
        assert_eq!(outcome.fields.len(), 1);
        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills[0].coordinate, Coordinate::new(0, 0, 0));
    }
}
