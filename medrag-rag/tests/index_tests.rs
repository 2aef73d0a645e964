//! Property tests for vector index search ordering and persistence.

use std::collections::HashSet;

use medrag_core::InMemoryStorage;
use medrag_rag::{Chunk, DistanceMetric, RagError, VectorIndex};
use proptest::prelude::*;

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-8 {
                return None;
            }
            for val in &mut v {
                *val /= norm;
            }
            Some(v)
        },
    )
}

/// Generate chunks with unique, position-derived IDs.
fn arb_chunks(dim: usize, max: usize) -> impl Strategy<Value = Vec<Chunk>> {
    proptest::collection::vec(("[a-z ]{5,30}", "[a-z]{3,8}\\.pdf", arb_normalized_embedding(dim)), 1..max)
        .prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (text, source, embedding))| Chunk {
                    id: format!("chunk-{i}"),
                    text,
                    source,
                    offset: i * 10,
                    embedding,
                })
                .collect()
        })
}

fn arb_metric() -> impl Strategy<Value = DistanceMetric> {
    prop_oneof![Just(DistanceMetric::Cosine), Just(DistanceMetric::L2)]
}

fn chunk(id: &str, embedding: Vec<f32>) -> Chunk {
    Chunk { id: id.into(), text: id.into(), source: format!("{id}.txt"), offset: 0, embedding }
}

mod prop_search_ordering {
    use super::*;

    const DIM: usize = 16;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Results are sorted by non-increasing score, hold exactly
        /// `min(k, len)` entries, and never repeat a chunk.
        #[test]
        fn results_ordered_descending_and_sized_by_k(
            chunks in arb_chunks(DIM, 20),
            query in arb_normalized_embedding(DIM),
            metric in arb_metric(),
            top_k in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let count = chunks.len();
            let results = rt.block_on(async {
                let index = VectorIndex::new(metric);
                index.build(chunks).await.unwrap();
                index.search(&query, top_k).await.unwrap()
            });

            prop_assert_eq!(results.len(), top_k.min(count));

            let ids: HashSet<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
            prop_assert_eq!(ids.len(), results.len());

            for window in results.windows(2) {
                prop_assert!(
                    window[0].score >= window[1].score,
                    "results not in descending order: {} < {}",
                    window[0].score,
                    window[1].score,
                );
            }
        }

        /// Saving then loading an index reproduces search results exactly.
        #[test]
        fn save_then_load_reproduces_search(
            chunks in arb_chunks(DIM, 20),
            queries in proptest::collection::vec(arb_normalized_embedding(DIM), 1..5),
            metric in arb_metric(),
            top_k in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (before, after) = rt.block_on(async {
                let storage = InMemoryStorage::new();
                let index = VectorIndex::new(metric);
                index.build(chunks).await.unwrap();
                index.save(&storage, "index/kb.json").await.unwrap();
                let reloaded = VectorIndex::load(&storage, "index/kb.json").await.unwrap();
                assert_eq!(reloaded.metric(), metric);

                let mut before = Vec::new();
                let mut after = Vec::new();
                for query in &queries {
                    before.push(index.search(query, top_k).await.unwrap());
                    after.push(reloaded.search(query, top_k).await.unwrap());
                }
                (before, after)
            });

            for (b, a) in before.iter().zip(&after) {
                let b_ids: Vec<&str> = b.iter().map(|r| r.chunk.id.as_str()).collect();
                let a_ids: Vec<&str> = a.iter().map(|r| r.chunk.id.as_str()).collect();
                prop_assert_eq!(b_ids, a_ids);
                for (x, y) in b.iter().zip(a) {
                    prop_assert!((x.score - y.score).abs() < 1e-6);
                }
            }
        }

        /// Incremental `add` yields the same search results as one `build`.
        #[test]
        fn add_matches_full_build(
            chunks in arb_chunks(DIM, 20),
            split in 0usize..20,
            query in arb_normalized_embedding(DIM),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let split = split.min(chunks.len());
            let (built, added) = rt.block_on(async {
                let full = VectorIndex::default();
                full.build(chunks.clone()).await.unwrap();

                let incremental = VectorIndex::default();
                incremental.build(chunks[..split].to_vec()).await.unwrap();
                incremental.add(chunks[split..].to_vec()).await.unwrap();

                let k = chunks.len();
                (full.search(&query, k).await.unwrap(), incremental.search(&query, k).await.unwrap())
            });

            prop_assert_eq!(built, added);
        }
    }
}

#[tokio::test]
async fn ties_are_broken_by_insertion_order() {
    let index = VectorIndex::default();
    index
        .build(vec![
            chunk("first", vec![1.0, 0.0]),
            chunk("second", vec![1.0, 0.0]),
            chunk("other", vec![0.0, 1.0]),
            chunk("third", vec![2.0, 0.0]),
        ])
        .await
        .unwrap();

    let results = index.search(&[1.0, 0.0], 3).await.unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.chunk.id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn k_larger_than_index_returns_everything() {
    let index = VectorIndex::default();
    index.build(vec![chunk("a", vec![1.0, 0.0]), chunk("b", vec![0.0, 1.0])]).await.unwrap();
    let results = index.search(&[0.0, 1.0], 10).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.id, "b");
}

#[tokio::test]
async fn empty_index_and_zero_k_are_errors() {
    let index = VectorIndex::default();
    assert!(matches!(index.search(&[1.0], 1).await, Err(RagError::EmptyIndex)));

    index.build(vec![chunk("a", vec![1.0])]).await.unwrap();
    assert!(matches!(index.search(&[1.0], 0).await, Err(RagError::InvalidArgument(_))));
}

#[tokio::test]
async fn build_rejects_mixed_dimensions_and_keeps_previous_generation() {
    let index = VectorIndex::default();
    index.build(vec![chunk("a", vec![1.0, 0.0])]).await.unwrap();

    let err = index
        .build(vec![chunk("b", vec![1.0, 0.0, 0.0]), chunk("c", vec![1.0, 0.0])])
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { expected: 3, actual: 2, .. }));
    assert_eq!(index.len().await, 1);
    assert_eq!(index.dimension().await, Some(2));
}

#[tokio::test]
async fn query_dimension_must_match_index() {
    let index = VectorIndex::default();
    index.build(vec![chunk("a", vec![1.0, 0.0])]).await.unwrap();
    let err = index.search(&[1.0, 0.0, 0.0], 1).await.unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { ref id, .. } if id == "query"));
}

#[tokio::test]
async fn loading_missing_or_corrupt_index_fails() {
    let storage = InMemoryStorage::new();
    assert!(matches!(
        VectorIndex::load(&storage, "index/kb.json").await,
        Err(RagError::IndexNotFound(_))
    ));

    use medrag_core::Storage;
    storage.write("index/kb.json", b"{not json").await.unwrap();
    assert!(matches!(
        VectorIndex::load(&storage, "index/kb.json").await,
        Err(RagError::CorruptIndex { .. })
    ));

    let mixed = br#"{"format_version":1,"metric":"cosine","dimension":2,"chunks":[
        {"id":"a","text":"a","source":"a","offset":0,"embedding":[1.0,0.0]},
        {"id":"b","text":"b","source":"b","offset":0,"embedding":[1.0]}]}"#;
    storage.write("index/kb.json", mixed).await.unwrap();
    assert!(matches!(
        VectorIndex::load(&storage, "index/kb.json").await,
        Err(RagError::CorruptIndex { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_searches_see_whole_generations() {
    let index = std::sync::Arc::new(VectorIndex::default());
    let base: Vec<Chunk> = (0..50).map(|i| chunk(&format!("base-{i}"), vec![1.0, i as f32])).collect();
    let extra: Vec<Chunk> = (0..50).map(|i| chunk(&format!("extra-{i}"), vec![i as f32, 1.0])).collect();
    index.build(base).await.unwrap();

    let searches = (0..32).map(|_| {
        let index = index.clone();
        tokio::spawn(async move { index.search(&[1.0, 1.0], 1000).await.unwrap().len() })
    });
    let writer = {
        let index = index.clone();
        tokio::spawn(async move { index.add(extra).await.unwrap() })
    };

    for len in futures::future::join_all(searches).await {
        let len = len.unwrap();
        assert!(len == 50 || len == 100, "observed a torn generation with {len} chunks");
    }
    assert_eq!(writer.await.unwrap(), 100);
}
