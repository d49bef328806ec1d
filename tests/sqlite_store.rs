//! SQLite-backed stores and the persistent app setup.

mod common;

use std::sync::Arc;
use tempfile::TempDir;

use common::*;
use finreport::app::{App, Collaborators, Services};
use finreport::blob_fs::FsBlobStore;
use finreport::db::connect_path;
use finreport::migrate::run_migrations;
use finreport::sqlite_store::SqliteStore;
use finreport_core::models::{
    ChatSession, ChatTurn, ChunkMetadata, Document, DocumentFilter, IndexedChunk, Principal,
    ReportFormat, ReportJob, ReportStatus, ReportUpdate, Role, SearchMode, Template,
    VectorStatus,
};
use finreport_core::store::{
    DocumentStore, ReportStore, SessionStore, VectorFilter, VectorIndex,
};

async fn store(tmp: &TempDir) -> SqliteStore {
    let pool = connect_path(&tmp.path().join("test.sqlite")).await.unwrap();
    run_migrations(&pool).await.unwrap();
    SqliteStore::new(pool)
}

fn chunk(id: &str, doc: &str, index: i64, vector: Vec<f32>) -> IndexedChunk {
    IndexedChunk {
        id: id.into(),
        text: format!("text of {id}"),
        hash: format!("hash-{id}"),
        vector,
        metadata: ChunkMetadata {
            document_id: doc.into(),
            filename: "f.csv".into(),
            position: index,
        },
    }
}

async fn insert_doc(store: &SqliteStore, id: &str, owner: &str, status: VectorStatus) {
    let mut doc = Document::new(&Principal::new(owner), format!("{id}.csv"), 1, "text/csv", id);
    doc.id = id.to_string();
    doc.vector_status = status;
    store.insert_document(&doc).await.unwrap();
}

#[tokio::test]
async fn test_migrations_idempotent() {
    let tmp = TempDir::new().unwrap();
    let pool = connect_path(&tmp.path().join("test.sqlite")).await.unwrap();
    run_migrations(&pool).await.unwrap();
    run_migrations(&pool).await.unwrap();
}

#[tokio::test]
async fn test_document_roundtrip_and_filters() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp).await;
    let owner = Principal::local();
    let base = chrono::Utc::now();

    let mut ids = Vec::new();
    for (i, name) in ["a.csv", "b.xlsx", "c.csv"].iter().enumerate() {
        let mut doc = Document::new(&owner, *name, 10, "text/csv", format!("documents/{i}"));
        doc.uploaded_at = base + chrono::Duration::seconds(i as i64);
        store.insert_document(&doc).await.unwrap();
        ids.push(doc.id);
    }

    let loaded = store.get_document(&ids[0]).await.unwrap().unwrap();
    assert_eq!(loaded.filename, "a.csv");
    assert_eq!(loaded.vector_status, VectorStatus::Pending);

    let page = store
        .list_documents(&DocumentFilter::page(2, 1))
        .await
        .unwrap();
    let names: Vec<&str> = page.iter().map(|d| d.filename.as_str()).collect();
    assert_eq!(names, vec!["b.xlsx", "a.csv"]);

    let csv_only = store
        .list_documents(&DocumentFilter {
            categories: vec!["csv".parse().unwrap()],
            ..DocumentFilter::page(10, 0)
        })
        .await
        .unwrap();
    assert_eq!(csv_only.len(), 2);

    let searched = store
        .list_documents(&DocumentFilter {
            search: Some("B.XL".into()),
            ..DocumentFilter::page(10, 0)
        })
        .await
        .unwrap();
    assert_eq!(searched.len(), 1);

    let mut doc = loaded;
    doc.vector_status = VectorStatus::Completed;
    doc.content_preview = "Total Assets".into();
    doc.version = 1;
    assert!(store.update_document(&doc).await.unwrap());
    let searchable = store
        .list_documents(&DocumentFilter {
            searchable_only: true,
            ..DocumentFilter::page(10, 0)
        })
        .await
        .unwrap();
    assert_eq!(searchable.len(), 1);
    assert_eq!(searchable[0].content_preview, "Total Assets");

    assert!(store.delete_document(&ids[0]).await.unwrap());
    assert!(!store.delete_document(&ids[0]).await.unwrap());
    assert!(store.get_document(&ids[0]).await.unwrap().is_none());
}

#[tokio::test]
async fn test_vector_query_and_delete() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp).await;
    insert_doc(&store, "d1", "local", VectorStatus::Completed).await;
    insert_doc(&store, "d2", "local", VectorStatus::Completed).await;
    store
        .upsert(&[
            chunk("c1", "d1", 0, vec![1.0, 0.0]),
            chunk("c2", "d2", 0, vec![0.0, 1.0]),
            chunk("c3", "d1", 1, vec![0.7, 0.7]),
        ])
        .await
        .unwrap();

    let all = VectorFilter::default();
    let hits = store.query(&[1.0, 0.0], 2, &all).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk_id, "c1");
    assert_eq!(hits[0].document_id, "d1");
    assert_eq!(hits[1].chunk_id, "c3");

    assert_eq!(store.delete_by_document("d1").await.unwrap(), 2);
    assert_eq!(store.count_for_document("d1").await.unwrap(), 0);
    assert_eq!(store.count_for_document("d2").await.unwrap(), 1);
    let hits = store.query(&[1.0, 0.0], 5, &all).await.unwrap();
    assert!(hits.iter().all(|h| h.document_id != "d1"));
}

#[tokio::test]
async fn test_vector_query_filters_before_top_k() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp).await;
    insert_doc(&store, "big", "alice", VectorStatus::Completed).await;
    insert_doc(&store, "small", "bob", VectorStatus::Completed).await;
    insert_doc(&store, "draft", "bob", VectorStatus::Pending).await;
    let mut chunks: Vec<IndexedChunk> = (0..30)
        .map(|i| chunk(&format!("big-{i}"), "big", i, vec![1.0, 0.0]))
        .collect();
    chunks.push(chunk("small-0", "small", 0, vec![0.8, 0.2]));
    chunks.push(chunk("draft-0", "draft", 0, vec![1.0, 0.0]));
    store.upsert(&chunks).await.unwrap();

    let bob = VectorFilter {
        owner: Some("bob".into()),
        searchable_only: true,
        ..VectorFilter::default()
    };
    let hits = store.query(&[1.0, 0.0], 3, &bob).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, "small");

    let csv = VectorFilter {
        categories: vec!["csv".parse().unwrap()],
        document_ids: vec!["draft".into()],
        ..VectorFilter::default()
    };
    let hits = store.query(&[1.0, 0.0], 3, &csv).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk_id, "draft-0");
}

#[tokio::test]
async fn test_keyword_search_folds_unicode_case() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp).await;
    let memory = finreport_core::store::memory::InMemoryStore::new();
    let mut doc = Document::new(&Principal::local(), "Überblick-2024.csv", 1, "text/csv", "r");
    doc.content_preview = "ÄRGER mit Forderungen".into();
    store.insert_document(&doc).await.unwrap();
    memory.insert_document(&doc).await.unwrap();

    for needle in ["überblick", "ÜBERBLICK", "ärger"] {
        let filter = DocumentFilter {
            search: Some(needle.into()),
            ..DocumentFilter::page(10, 0)
        };
        let sql = store.list_documents(&filter).await.unwrap();
        let mem = memory.list_documents(&filter).await.unwrap();
        assert_eq!(sql.len(), 1, "sqlite missed {needle}");
        assert_eq!(mem.len(), 1, "memory missed {needle}");
    }

    doc.filename = "Ökonomie.csv".into();
    store.update_document(&doc).await.unwrap();
    let filter = DocumentFilter {
        search: Some("ökonomie".into()),
        ..DocumentFilter::page(10, 0)
    };
    assert_eq!(store.list_documents(&filter).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_report_updates_stop_at_terminal() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp).await;
    let owner = Principal::local();
    let job = ReportJob::new(
        &owner,
        vec!["d1".into()],
        Template::Executive,
        ReportFormat::Json,
    );
    store.insert_report(&job).await.unwrap();

    assert!(store
        .apply_report_update(&job.id, ReportUpdate::Progress(40))
        .await
        .unwrap());
    assert!(store
        .apply_report_update(
            &job.id,
            ReportUpdate::Completed {
                download_ref: "reports/x.json".into(),
                analysis: Default::default(),
            }
        )
        .await
        .unwrap());
    assert!(!store
        .apply_report_update(
            &job.id,
            ReportUpdate::Failed {
                message: "late".into()
            }
        )
        .await
        .unwrap());

    let loaded = store.get_report(&job.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, ReportStatus::Completed);
    assert_eq!(loaded.template, Template::Executive);
    assert_eq!(loaded.download_ref.as_deref(), Some("reports/x.json"));
    assert!(loaded.error_message.is_none());

    assert_eq!(store.list_reports("local", 10, 0).await.unwrap().len(), 1);
    assert!(store.list_reports("someone", 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_session_turns_in_order() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp).await;
    store
        .create_session(&ChatSession::new("s1", &Principal::new("alice")))
        .await
        .unwrap();
    for (i, role) in [Role::User, Role::Assistant, Role::User].into_iter().enumerate() {
        store
            .append_turn(
                "s1",
                &ChatTurn {
                    role,
                    content: format!("turn {i}"),
                    timestamp: chrono::Utc::now(),
                    metadata: Some(serde_json::json!({ "n": i })),
                },
            )
            .await
            .unwrap();
    }
    store
        .set_selected_files("s1", &["d1".to_string()])
        .await
        .unwrap();

    let session = store.load_session("s1").await.unwrap().unwrap();
    let contents: Vec<&str> = session.turns.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(contents, vec!["turn 0", "turn 1", "turn 2"]);
    assert_eq!(session.turns[1].role, Role::Assistant);
    assert_eq!(session.turns[2].metadata, Some(serde_json::json!({ "n": 2 })));
    assert_eq!(session.selected_file_ids, vec!["d1".to_string()]);
    assert_eq!(session.owner, "alice");

    assert!(store.delete_session("s1").await.unwrap());
    assert!(store.load_session("s1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_services_over_sqlite_and_fs_blobs() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = Arc::new(store(&tmp).await);
    let blobs = Arc::new(FsBlobStore::new(config.blobs.root.clone()));
    let services = Services::new(
        &config,
        Collaborators {
            documents: store.clone(),
            index: store.clone(),
            reports: store.clone(),
            sessions: store.clone(),
            blobs,
            embedder: Arc::new(HashEmbedder),
            model: Arc::new(ScriptedModel::new(MODEL_RESPONSE)),
        },
    );
    let owner = Principal::local();

    let doc = services
        .pipeline
        .upload(&owner, "balance.csv", balance_sheet_csv())
        .await
        .unwrap();
    services.pipeline.drain().await;
    assert!(store.count_for_document(&doc.id).await.unwrap() > 0);

    let results = services
        .search
        .search(&owner, "total assets", SearchMode::Hybrid, None, &[])
        .await
        .unwrap();
    assert_eq!(results[0].document_id, doc.id);

    let job = services
        .reports
        .generate(&owner, &[doc.id.clone()], Template::Comprehensive, ReportFormat::Markdown)
        .await
        .unwrap();
    services.reports.drain().await;
    let artifact = services.reports.download(&owner, &job.id).await.unwrap();
    assert!(!artifact.bytes.is_empty());

    services.registry.delete(&doc.id).await.unwrap();
    assert_eq!(store.count_for_document(&doc.id).await.unwrap(), 0);
    assert!(store.get_document(&doc.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_app_state_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let owner = Principal::local();

    let app = App::init(test_config(&tmp)).await.unwrap();
    let doc = app
        .services
        .pipeline
        .upload(&owner, "notes.txt", text_note())
        .await
        .unwrap();
    app.shutdown().await;

    let app = App::init(test_config(&tmp)).await.unwrap();
    let doc = app.services.registry.get(&doc.id).await.unwrap();
    assert_eq!(doc.vector_status, VectorStatus::Completed);
    assert!(doc.content_preview.contains("inventory"));
    app.shutdown().await;
}
