use std::collections::HashSet;

use proptest::prelude::*;
use formfill_core::fixtures;
use formfill_core::{DocumentKind, FieldDocument, FieldIndexer, IndexerConfig};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn indexing_is_dense_and_idempotent(tables in table_vec()) {
        let borrowed: Vec<Vec<Vec<&str>>> = tables
            .iter()
            .map(|t| t.iter().map(|r| r.iter().map(String::as_str).collect()).collect())
            .collect();
        let bytes = fixtures::docx_with_tables(&borrowed);
        let mut doc = FieldDocument::from_bytes(DocumentKind::WordProcessor, &bytes, "p.docx")
            .expect("fixture opens");
        let indexer = FieldIndexer::new(IndexerConfig::default());

        let first = indexer.index_document(&mut doc);
        let cell_count: usize = tables.iter().map(|t| t.iter().map(Vec::len).sum::<usize>()).sum();
        prop_assert_eq!(first.len(), cell_count);
        let indices: Vec<u32> = first.iter().map(|f| f.index).collect();
        let expected: Vec<u32> = (1..=cell_count as u32).collect();
        prop_assert_eq!(&indices, &expected);

        let rendered = doc.render_text();
        let second = indexer.index_document(&mut doc);
        prop_assert_eq!(doc.render_text(), rendered);
        let again: Vec<u32> = second.iter().map(|f| f.index).collect();
        prop_assert_eq!(again, indices);
        let unique: HashSet<u32> = second.iter().map(|f| f.index).collect();
        prop_assert_eq!(unique.len(), second.len());
    }
}

fn table_vec() -> impl Strategy<Value = Vec<Vec<Vec<String>>>> {
    prop::collection::vec(table(), 1..3)
}

fn table() -> impl Strategy<Value = Vec<Vec<String>>> {
    (1usize..4).prop_flat_map(|cols| prop::collection::vec(row(cols), 1..4))
}

fn row(cols: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop_oneof![Just(String::new()), "[A-Za-z]{1,8}", "[a-z]{1,4} [a-z]{1,4}"],
        cols,
    )
}
