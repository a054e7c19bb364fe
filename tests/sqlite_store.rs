//! SQLite store behaviour: persistence across reopen, atomic replace and
//! test-case upserts.

use std::sync::Arc;

use chrono::Utc;
use rag_testgen::config::Config;
use rag_testgen::models::{
    Chunk, EmbeddingRecord, Phase, ScriptArtifact, SourceDocument, SourceRef, TestCase,
};
use rag_testgen::parse::DocumentFormat;
use rag_testgen::pipeline::{Pipeline, PipelineSettings};
use rag_testgen::store::sqlite::SqliteStore;
use rag_testgen::store::Store;
use rag_testgen::testing::{HashEmbedder, ScriptedGenerator};
use tempfile::TempDir;

fn config(dir: &TempDir) -> Config {
    let mut config: Config = toml::from_str("[db]\npath = \"unused\"\n").unwrap();
    config.db.path = dir.path().join("data").join("testgen.sqlite");
    config
}

fn record(source: &str, index: usize, vector: Vec<f32>) -> EmbeddingRecord {
    EmbeddingRecord {
        chunk: Chunk {
            text: format!("{} chunk {}", source, index),
            source_id: source.to_string(),
            chunk_index: index,
            word_count: 3,
            overlap_with_predecessor: if index == 0 { 0 } else { 1 },
        },
        vector,
    }
}

fn case(id: &str, title: &str) -> TestCase {
    TestCase {
        id: id.to_string(),
        title: title.to_string(),
        scenario: "apply SAVE15".to_string(),
        steps: vec!["open cart".to_string(), "apply code".to_string()],
        expected: "15% off".to_string(),
        grounded_in: SourceRef::Many(vec!["product_specs.md".to_string()]),
    }
}

#[tokio::test]
async fn records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);

    let store = SqliteStore::open(&cfg).await.unwrap();
    store
        .append(vec![
            record("a.md", 0, vec![1.0, 0.0, 0.0]),
            record("a.md", 1, vec![0.0, 1.0, 0.0]),
            record("b.txt", 0, vec![1.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();
    store.close().await;

    let store = SqliteStore::open(&cfg).await.unwrap();
    assert_eq!(store.record_count().await.unwrap(), 3);
    assert_eq!(store.dims().await.unwrap(), Some(3));

    let hits = store.vector_search(&[1.0, 0.0, 0.0], 3).await.unwrap();
    let order: Vec<(&str, usize)> = hits
        .iter()
        .map(|h| (h.chunk.source_id.as_str(), h.chunk.chunk_index))
        .collect();
    assert_eq!(order, vec![("a.md", 0), ("b.txt", 0), ("a.md", 1)]);
    assert_eq!(hits[2].chunk.overlap_with_predecessor, 1);
    store.close().await;
}

#[tokio::test]
async fn test_cases_upsert_and_replace_clears_everything() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&config(&dir)).await.unwrap();

    store.append(vec![record("a.md", 0, vec![1.0])]).await.unwrap();
    store
        .put_test_cases(&[case("TC001", "first"), case("TC002", "second")])
        .await
        .unwrap();
    store
        .put_test_cases(&[case("TC001", "updated")])
        .await
        .unwrap();

    let listed = store.list_test_cases().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, "TC001");
    assert_eq!(listed[0].title, "updated");
    assert_eq!(
        store.get_test_case("TC002").await.unwrap().unwrap().grounded_in,
        SourceRef::Many(vec!["product_specs.md".to_string()])
    );

    store
        .put_script(&ScriptArtifact {
            id: "s-1".into(),
            text: "print('hi')".into(),
            based_on: "TC001".into(),
            framework: "selenium-python".into(),
            generated_at: Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(store.counts().await.unwrap().phase(), Phase::ScriptReady);

    store
        .replace(vec![record("c.md", 0, vec![0.5]), record("c.md", 1, vec![0.25])])
        .await
        .unwrap();
    let counts = store.counts().await.unwrap();
    assert_eq!((counts.records, counts.test_cases, counts.scripts), (2, 0, 0));

    store.clear().await.unwrap();
    assert_eq!(store.dims().await.unwrap(), None);
    store.close().await;
}

#[tokio::test]
async fn pipeline_state_persists_in_sqlite() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    let generator = ScriptedGenerator::new().with_response(
        r#"[{"id":"TC001","title":"t","scenario":"discount","steps":["a"],"expected":"e","based_on":"product_specs.md"}]"#,
    );

    {
        let store = SqliteStore::open(&cfg).await.unwrap();
        let p = Pipeline::new(
            Arc::new(store),
            Arc::new(HashEmbedder::default()),
            Arc::new(generator),
            PipelineSettings::default(),
        );
        p.build_index(
            vec![SourceDocument::new(
                "product_specs.md",
                DocumentFormat::Text,
                b"Discount code SAVE15 gives 15% off.".to_vec(),
            )],
            false,
        )
        .await
        .unwrap();
        p.generate_test_cases("discount", None, None).await.unwrap();
        p.close().await;
    }

    let store = SqliteStore::open(&cfg).await.unwrap();
    let counts = store.counts().await.unwrap();
    assert_eq!(counts.phase(), Phase::TestCasesReady);
    assert!(store.get_test_case("TC001").await.unwrap().is_some());
    store.close().await;
}
