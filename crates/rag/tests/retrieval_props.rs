use std::collections::HashSet;

use proptest::prelude::*;
use formfill_core::{Coordinate, Field, FormatSnapshot};
use formfill_index::KnowledgeChunk;
use formfill_rag::{EmbeddingClient, RetrievalConfig, RetrievalEngine};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn retrieval_is_deterministic_and_deduplicated(
        contents in prop::collection::vec("[a-e]{1,3}( [a-e]{1,3}){0,3}", 1..12),
        query in "[a-e]{1,3}( [a-e]{1,3}){0,2}",
        top_k in 1usize..6,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let engine = RetrievalEngine::new(
            RetrievalConfig { working_dir: dir.path().to_path_buf(), ..RetrievalConfig::default() },
            EmbeddingClient::hash(),
        );
        let chunks: Vec<KnowledgeChunk> = contents
            .iter()
            .enumerate()
            .map(|(i, c)| KnowledgeChunk::new(format!("kb_{i}"), c.clone()))
            .collect();
        engine.add(chunks).unwrap();

        let first = engine.search(&query, top_k);
        let second = engine.search(&query, top_k);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), top_k.min(contents.len()));
        for (i, pair) in first.windows(2).enumerate() {
            prop_assert!(pair[0].similarity_score >= pair[1].similarity_score);
            if pair[0].similarity_score == pair[1].similarity_score {
                let a: usize = pair[0].id[3..].parse().unwrap();
                let b: usize = pair[1].id[3..].parse().unwrap();
                prop_assert!(a < b, "tie at rank {} out of insertion order", i + 1);
            }
        }

        let mut fields = Vec::new();
        for (i, kind) in ["name", "email", "skill"].iter().enumerate() {
            let mut field = Field::new(i as u32 + 1, Coordinate::new(0, i, 1), "", FormatSnapshot::default());
            field.describe(query.clone(), None, Some((*kind).to_string())).unwrap();
            fields.push(field);
        }
        let pooled = engine.semantic_search(&fields, top_k);
        let ids: HashSet<&str> = pooled.iter().map(|r| r.id.as_str()).collect();
        prop_assert_eq!(ids.len(), pooled.len());
        prop_assert!(pooled.len() <= top_k);
        let ranks: Vec<usize> = pooled.iter().map(|r| r.rank).collect();
        let expected: Vec<usize> = (1..=pooled.len()).collect();
        prop_assert_eq!(ranks, expected);
    }
}
