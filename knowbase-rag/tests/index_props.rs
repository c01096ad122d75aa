//! Property tests for exact search ordering, chunk coverage and store pairing.

use knowbase_rag::{
    ChunkId, DocumentMetadata, FixedSizeChunker, PreparedDocument, RagError, SimilarityMetric, StoreState, VectorIndex,
};
use proptest::prelude::*;

const DIM: usize = 8;

fn arb_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim)
}

fn arb_metric() -> impl Strategy<Value = SimilarityMetric> {
    prop_oneof![Just(SimilarityMetric::Cosine), Just(SimilarityMetric::InnerProduct)]
}

fn build_index(metric: SimilarityMetric, vectors: &[Vec<f32>], reverse: bool) -> VectorIndex {
    let mut index = VectorIndex::new(DIM, metric);
    let mut entries: Vec<(ChunkId, Vec<f32>)> =
        vectors.iter().enumerate().map(|(i, v)| (ChunkId(i as u64 + 1), v.clone())).collect();
    if reverse {
        entries.reverse();
    }
    for (id, vector) in entries {
        index.insert(id, vector).unwrap();
    }
    index
}

/// Search ranking: results are the true top `k`, ordered by descending score
/// with ties broken by ascending id, regardless of insertion order.
mod prop_search_ordering {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn search_matches_brute_force_ranking(
            vectors in proptest::collection::vec(arb_embedding(DIM), 0..30),
            query in arb_embedding(DIM),
            metric in arb_metric(),
            k in 0usize..40,
        ) {
            let index = build_index(metric, &vectors, false);
            let results = index.search(&query, k).unwrap();

            prop_assert_eq!(results.len(), k.min(vectors.len()));

            let mut expected: Vec<(ChunkId, f32)> =
                index.iter().map(|(id, v)| (id, metric.score(v, &query))).collect();
            expected.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            expected.truncate(k);

            let actual: Vec<(ChunkId, f32)> = results.iter().map(|r| (r.id, r.score)).collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn search_is_independent_of_insertion_order(
            vectors in proptest::collection::vec(arb_embedding(DIM), 1..20),
            query in arb_embedding(DIM),
            k in 1usize..25,
        ) {
            let forward = build_index(SimilarityMetric::Cosine, &vectors, false);
            let backward = build_index(SimilarityMetric::Cosine, &vectors, true);
            prop_assert_eq!(forward.search(&query, k).unwrap(), backward.search(&query, k).unwrap());
            prop_assert_eq!(forward.search(&query, k).unwrap(), forward.search(&query, k).unwrap());
        }

        #[test]
        fn duplicated_vectors_tie_by_ascending_id(
            vector in arb_embedding(DIM),
            copies in 2usize..10,
        ) {
            let vectors = vec![vector.clone(); copies];
            let index = build_index(SimilarityMetric::Cosine, &vectors, true);
            let ids: Vec<u64> = index.search(&vector, copies).unwrap().iter().map(|r| r.id.0).collect();
            prop_assert_eq!(ids, (1..=copies as u64).collect::<Vec<_>>());
        }
    }
}

/// Every stored vector has the index dimension.
mod prop_dimension_invariant {
    use super::*;

    proptest! {
        #[test]
        fn wrong_length_vectors_are_rejected(
            vectors in proptest::collection::vec(arb_embedding(DIM), 0..10),
            bad_len in (0usize..16).prop_filter("must differ from DIM", |n| *n != DIM),
        ) {
            let mut index = build_index(SimilarityMetric::Cosine, &vectors, false);
            let before = index.clone();

            let err = index.insert(ChunkId(1000), vec![0.5; bad_len]).unwrap_err();
            let is_mismatch = matches!(err, RagError::DimensionMismatch { expected: DIM, actual } if actual == bad_len);
            prop_assert!(is_mismatch);
            prop_assert!(index.search(&vec![0.5; bad_len], 3).is_err());
            prop_assert_eq!(index, before);
        }
    }
}

/// Chunk windows never exceed the configured size, overlap by the
/// configured amount, and together cover the whole text.
mod prop_chunk_coverage {
    use super::*;

    proptest! {
        #[test]
        fn windows_cover_text_with_fixed_overlap(
            text in "[a-zé ]{0,300}",
            size in 2usize..60,
            overlap_frac in 0.0f64..0.9,
        ) {
            let overlap = ((size as f64) * overlap_frac) as usize;
            let chunker = FixedSizeChunker::new(size, overlap).unwrap();
            let windows: Vec<_> = chunker.windows(&text).collect();
            let chars: Vec<char> = text.chars().collect();

            prop_assert_eq!(windows.is_empty(), chars.is_empty());
            let mut covered = 0;
            for (i, window) in windows.iter().enumerate() {
                prop_assert_eq!(window.ordinal, i);
                prop_assert_eq!(window.start, i * (size - overlap));
                let len = window.text.chars().count();
                prop_assert!(len <= size);
                let expected: String = chars[window.start..window.start + len].iter().collect();
                prop_assert_eq!(window.text, expected.as_str());
                covered = covered.max(window.start + len);
            }
            prop_assert_eq!(covered, chars.len());
        }
    }
}

/// Ingest and delete keep the index and metadata in one-to-one agreement.
mod prop_store_pairing {
    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        Ingest { doc: u8, chunks: Vec<Vec<f32>> },
        Delete { doc: u8 },
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..5, proptest::collection::vec(arb_embedding(DIM), 0..4))
                .prop_map(|(doc, chunks)| Op::Ingest { doc, chunks }),
            (0u8..5).prop_map(|doc| Op::Delete { doc }),
        ]
    }

    proptest! {
        #[test]
        fn index_and_metadata_stay_paired(ops in proptest::collection::vec(arb_op(), 1..30)) {
            let mut state = StoreState::new(DIM, SimilarityMetric::Cosine);
            let mut highest_issued = 0u64;

            for op in ops {
                let before = state.clone();
                let outcome = match op {
                    Op::Ingest { doc, chunks } => state
                        .apply_ingest(PreparedDocument {
                            document_id: format!("doc-{doc}"),
                            metadata: DocumentMetadata::new(format!("{doc}.txt"), "txt"),
                            text: format!("document {doc}"),
                            chunks: chunks.into_iter().enumerate().map(|(i, v)| (format!("part {i}"), v)).collect(),
                        })
                        .map(|ids| {
                            // Fresh ids are never reused.
                            for id in &ids {
                                assert!(id.0 > highest_issued);
                                highest_issued = id.0;
                            }
                        }),
                    Op::Delete { doc } => state.apply_delete(&format!("doc-{doc}")).map(|_| ()),
                };
                if outcome.is_err() {
                    prop_assert_eq!(&state, &before);
                }

                prop_assert_eq!(state.index().len(), state.metadata().len());
                for (id, _) in state.index().iter() {
                    prop_assert!(state.metadata().get(id).is_ok());
                }
            }
        }
    }
}
