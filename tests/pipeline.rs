//! End-to-end pipeline tests: scan, dispatch, embed, and query against a
//! temporary workspace, a real LanceDB table, and a deterministic
//! embedder.

use filesift::config::AppConfig;
use filesift::embed::{EmbeddingGenerator, HashingEmbedder, TextEmbedder};
use filesift::error::{Error, ProcessError};
use filesift::process::{Dispatcher, FileProcessor, ProcessorRegistry};
use filesift::scan::Scanner;
use filesift::search::QueryEngine;
use filesift::store::{DefinitionDraft, ErrorEvent, FileObject, NewFileObject, Store};
use filesift::tasks::TaskScheduler;
use filesift::vector::{ObjectPointer, VectorIndex};

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn write_png(path: &Path) {
    let img = image::ImageBuffer::from_fn(2, 2, |x, y| {
        if (x + y) % 2 == 0 {
            image::Rgba([255u8, 0, 0, 255])
        } else {
            image::Rgba([0u8, 255, 0, 255])
        }
    });
    img.save(path).expect("write png");
}

async fn open_index(dir: &Path) -> Arc<VectorIndex> {
    let connection = lancedb::connect(dir.to_str().expect("path utf8"))
        .execute()
        .await
        .expect("connect lancedb");
    let embedder: Arc<dyn TextEmbedder> = Arc::new(HashingEmbedder::new(256));
    Arc::new(
        VectorIndex::open_or_create(&connection, embedder)
            .await
            .expect("open index"),
    )
}

async fn insert_object(store: &Store, name: &str) -> FileObject {
    store
        .insert_object(NewFileObject {
            object_type: "image".to_string(),
            path: format!("/photos/{name}"),
            name: name.to_string(),
            file_id: format!("dev-{name}"),
            file_created_at: Utc::now(),
            metadata: serde_json::json!({ "file_size": 64 }),
        })
        .await
        .expect("insert object")
}

async fn add_definition(store: &Store, object: &FileObject, content: &str) {
    store
        .insert_definition(
            object.id,
            DefinitionDraft {
                definition_type: "image-description".to_string(),
                content: content.to_string(),
                processing_secs: 0.05,
                model: Some("test-model".to_string()),
            },
        )
        .await
        .expect("insert definition");
    store.mark_processed(object.id).await.expect("mark processed");
}

/// A processor with a canned caption, used to drive the pipeline without
/// a model endpoint.
struct CannedProcessor {
    caption: String,
}

#[async_trait::async_trait]
impl FileProcessor for CannedProcessor {
    fn id(&self) -> &str {
        "canned"
    }

    fn target_type(&self) -> &str {
        "image"
    }

    fn title(&self) -> &str {
        "Canned caption"
    }

    async fn process(&self, _object: &FileObject) -> filesift::Result<DefinitionDraft> {
        Ok(DefinitionDraft {
            definition_type: "image-description".to_string(),
            content: self.caption.clone(),
            processing_secs: 0.01,
            model: None,
        })
    }
}

struct FailingProcessor;

#[async_trait::async_trait]
impl FileProcessor for FailingProcessor {
    fn id(&self) -> &str {
        "failing"
    }

    fn target_type(&self) -> &str {
        "image"
    }

    fn title(&self) -> &str {
        "Always fails"
    }

    async fn process(&self, _object: &FileObject) -> filesift::Result<DefinitionDraft> {
        Err(ProcessError::Failed {
            processor: "failing".to_string(),
            detail: "synthetic failure".to_string(),
        }
        .into())
    }
}

#[tokio::test]
async fn scan_dispatch_embed_query_round_trip() {
    let workspace = tempfile::tempdir().expect("workspace");
    let index_dir = tempfile::tempdir().expect("index dir");

    write_png(&workspace.path().join("orchard.png"));

    let store = Store::open_in_memory().await.expect("open store");
    let mut config = AppConfig::default();
    config.storage.roots = vec![workspace.path().to_path_buf()];

    // Scan: the file becomes an object.
    let scanner = Scanner::new(store.clone(), &config);
    let (_tx, shutdown) = tokio::sync::watch::channel(false);
    let summary = scanner.run_pass(&shutdown).await.expect("scan pass");
    assert_eq!(summary.saved, 1);

    // Dispatch: the canned processor captions it.
    let registry = Arc::new(ProcessorRegistry::with_processors(vec![Arc::new(
        CannedProcessor {
            caption: "a red apple hanging in an orchard".to_string(),
        },
    )
        as Arc<dyn FileProcessor>]));
    let dispatcher = Dispatcher::new(store.clone(), registry);
    assert!(dispatcher.run_once().await.expect("dispatch"));

    // Embed: the object lands in the vector index.
    let index = open_index(index_dir.path()).await;
    let generator = EmbeddingGenerator::new(store.clone(), index.clone());
    assert!(generator.run_once().await.expect("embed"));
    assert!(!generator.run_once().await.expect("no more work"));
    assert_eq!(index.count().await.expect("index count"), 1);

    // Query: text matching the definition content finds the object.
    let engine = QueryEngine::new(store.clone(), index, config.query.clone());
    let (saved, hits) = engine
        .search("red apple orchard", 10, Some(1.5))
        .await
        .expect("search");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].object.name, "orchard.png");
    assert!(hits[0].distance <= 1.5);
    assert_eq!(saved.returned_results, 1);

    let object = store
        .get_object(hits[0].object.id)
        .await
        .expect("get")
        .expect("exists");
    assert!(object.processed);
    assert!(object.generated_embeddings);
    assert!(!object.error);
}

#[tokio::test]
async fn partial_processor_failure_still_reaches_the_index() {
    let index_dir = tempfile::tempdir().expect("index dir");
    let store = Store::open_in_memory().await.expect("open store");

    let object = insert_object(&store, "beach.png").await;

    let registry = Arc::new(ProcessorRegistry::with_processors(vec![
        Arc::new(FailingProcessor) as Arc<dyn FileProcessor>,
        Arc::new(CannedProcessor {
            caption: "waves breaking on a sandy beach".to_string(),
        }) as Arc<dyn FileProcessor>,
    ]));
    let dispatcher = Dispatcher::new(store.clone(), registry);
    dispatcher.dispatch(&object).await.expect("dispatch");

    let updated = store
        .get_object(object.id)
        .await
        .expect("get")
        .expect("exists");
    assert!(updated.processed);
    assert!(updated.error);
    assert_eq!(
        store
            .count_errors(ErrorEvent::ProcessingObjectFailed)
            .await
            .expect("errors"),
        1
    );

    // `error = true` keeps the object out of the embedder's eligible set.
    let index = open_index(index_dir.path()).await;
    let generator = EmbeddingGenerator::new(store.clone(), index);
    assert!(!generator.run_once().await.expect("embedder sees nothing"));
}

#[tokio::test]
async fn stale_index_hits_are_dropped_without_failing_the_request() {
    let index_dir = tempfile::tempdir().expect("index dir");
    let store = Store::open_in_memory().await.expect("open store");
    let index = open_index(index_dir.path()).await;

    let real = insert_object(&store, "cabin.png").await;
    add_definition(&store, &real, "a log cabin in a snowy forest").await;

    let generator = EmbeddingGenerator::new(store.clone(), index.clone());
    assert!(generator.run_once().await.expect("embed real object"));

    // A hit whose id no longer resolves: embedded directly, never stored.
    index
        .upsert(
            Uuid::new_v4(),
            "a log cabin beside a frozen lake",
            &ObjectPointer {
                path: "/photos/gone.png".to_string(),
                name: "gone.png".to_string(),
                file_id: "dev-gone".to_string(),
            },
        )
        .await
        .expect("upsert stale row");

    let engine = QueryEngine::new(store.clone(), index, AppConfig::default().query);
    let (saved, hits) = engine
        .search("log cabin forest", 10, Some(2.0))
        .await
        .expect("search succeeds despite the stale hit");

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].object.id, real.id);
    assert_eq!(saved.returned_results, 1);
    assert_eq!(
        store
            .count_errors(ErrorEvent::ObjectNotFoundWhileQuerying)
            .await
            .expect("errors"),
        1
    );
}

#[tokio::test]
async fn distance_threshold_filters_and_orders_results() {
    let index_dir = tempfile::tempdir().expect("index dir");
    let store = Store::open_in_memory().await.expect("open store");
    let index = open_index(index_dir.path()).await;
    let generator = EmbeddingGenerator::new(store.clone(), index.clone());

    // Three objects at increasing distance from the query text: an exact
    // wording match, a partial overlap, and unrelated content.
    for (name, caption) in [
        ("exact.png", "crimson maple leaves"),
        ("partial.png", "crimson sunset skyline"),
        ("unrelated.png", "spreadsheet quarterly budget numbers"),
    ] {
        let object = insert_object(&store, name).await;
        add_definition(&store, &object, caption).await;
        assert!(generator.run_once().await.expect("embed"));
    }

    let engine = QueryEngine::new(store.clone(), index, AppConfig::default().query);

    // A wide-open threshold returns everything, ascending by distance.
    let (_, all_hits) = engine
        .search("crimson maple leaves", 10, Some(10.0))
        .await
        .expect("search all");
    assert_eq!(all_hits.len(), 3);
    assert_eq!(all_hits[0].object.name, "exact.png");
    assert!(all_hits[0].distance <= all_hits[1].distance);
    assert!(all_hits[1].distance <= all_hits[2].distance);

    // A threshold between the partial and unrelated distances keeps two.
    let cutoff = (all_hits[1].distance + all_hits[2].distance) / 2.0;
    let (saved, close_hits) = engine
        .search("crimson maple leaves", 10, Some(cutoff))
        .await
        .expect("search filtered");
    assert_eq!(close_hits.len(), 2);
    assert!(close_hits.iter().all(|hit| hit.distance <= cutoff));
    assert_eq!(saved.returned_results, 2);
}

#[tokio::test]
async fn saved_queries_replay_without_touching_the_index() {
    let index_dir = tempfile::tempdir().expect("index dir");
    let store = Store::open_in_memory().await.expect("open store");
    let index = open_index(index_dir.path()).await;

    let object = insert_object(&store, "harbor.png").await;
    add_definition(&store, &object, "sailboats moored in a harbor").await;
    let generator = EmbeddingGenerator::new(store.clone(), index.clone());
    assert!(generator.run_once().await.expect("embed"));

    let engine = QueryEngine::new(store.clone(), index.clone(), AppConfig::default().query);
    let (saved, hits) = engine
        .search("sailboats harbor", 10, Some(2.0))
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);

    // Deleting the index row afterwards does not affect the replay.
    index.delete(object.id).await.expect("delete index row");

    let (replayed, replayed_hits) = engine
        .saved_query_results(saved.id)
        .await
        .expect("replay saved query");
    assert_eq!(replayed.id, saved.id);
    assert_eq!(replayed_hits.len(), 1);
    assert_eq!(replayed_hits[0].object.id, object.id);
    assert!((replayed_hits[0].distance - hits[0].distance).abs() < 1e-5);

    let missing = engine
        .saved_query_results(Uuid::new_v4())
        .await
        .expect_err("unknown id must fail distinctly");
    assert!(matches!(missing, Error::QueryNotFound(_)));
}

#[tokio::test]
async fn empty_query_text_is_rejected() {
    let index_dir = tempfile::tempdir().expect("index dir");
    let store = Store::open_in_memory().await.expect("open store");
    let index = open_index(index_dir.path()).await;

    let engine = QueryEngine::new(store, index, AppConfig::default().query);
    let error = engine
        .search("   ", 10, None)
        .await
        .expect_err("blank text must be rejected");
    assert!(matches!(error, Error::EmptyQuery));
}

#[tokio::test]
async fn scheduler_joins_all_workers_on_stop() {
    let workspace = tempfile::tempdir().expect("workspace");
    let index_dir = tempfile::tempdir().expect("index dir");
    write_png(&workspace.path().join("one.png"));

    let store = Store::open_in_memory().await.expect("open store");
    let mut config = AppConfig::default();
    config.storage.roots = vec![workspace.path().to_path_buf()];

    let index = open_index(index_dir.path()).await;
    let scanner = Scanner::new(store.clone(), &config);
    let dispatcher = Dispatcher::new(
        store.clone(),
        Arc::new(ProcessorRegistry::with_processors(vec![Arc::new(
            CannedProcessor {
                caption: "a checkerboard test image".to_string(),
            },
        )
            as Arc<dyn FileProcessor>])),
    );
    let generator = EmbeddingGenerator::new(store.clone(), index);

    let scheduler = TaskScheduler::start(scanner, dispatcher, generator, &config);

    // Let the workers run at least one iteration each.
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(10), scheduler.stop_and_wait())
        .await
        .expect("all workers must observe cancellation and exit");

    // The pipeline made progress before the stop.
    assert_eq!(store.count_objects().await.expect("count"), 1);
}
