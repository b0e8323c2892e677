use std::sync::Arc;

use placement_backup_core::{Archive, BackupConfig, Document, Operation};
use placement_backup_daemon::{build_router, AppState, CronSchedule, Scheduler};
use placement_backup_docstore::{DocumentStore, MemoryDocumentStore};
use placement_backup_storage::{BackupService, SidecarStore};
use serde_json::{json, Map, Value};

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn portal_documents() -> Arc<MemoryDocumentStore> {
    Arc::new(
        MemoryDocumentStore::new()
            .with_collection(
                "users",
                vec![
                    Document::new("u1", fields(json!({"name": "Ada", "role": "student"}))),
                    Document::new("u2", fields(json!({"name": "Grace", "role": "mentor"}))),
                ],
            )
            .with_collection(
                "placements",
                vec![Document::new(
                    "p1",
                    fields(json!({"school": "Northside", "weeks": 12})),
                )],
            ),
    )
}

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    service: Arc<BackupService>,
    documents: Arc<MemoryDocumentStore>,
    _dir: tempfile::TempDir,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

async fn start_server(api_token: Option<String>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = BackupConfig::new(dir.path());
    cfg.compression = false;

    let documents = portal_documents();
    let metadata = Arc::new(SidecarStore::new(dir.path()).unwrap());
    let service = Arc::new(BackupService::new(cfg, documents.clone(), metadata).unwrap());
    let scheduler = Arc::new(Scheduler::new(
        service.clone(),
        CronSchedule::parse("0 2 * * *").unwrap(),
        30,
    ));

    let app = build_router(AppState {
        service: service.clone(),
        scheduler,
        api_token,
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{addr}"),
        client: reqwest::Client::new(),
        service,
        documents,
        _dir: dir,
        _handle: handle,
    }
}

async fn create_backup(server: &TestServer) -> Value {
    let resp = server
        .client
        .post(server.url("/api/v1/backups"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn healthz_returns_ok() {
    let server = start_server(None).await;
    let resp = server
        .client
        .get(server.url("/api/v1/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn backup_listed_and_fetched_by_id() {
    let server = start_server(None).await;
    let run = create_backup(&server).await;
    assert_eq!(run["status"], "success");
    assert_eq!(run["document_count"], 3);
    let id = run["id"].as_str().unwrap().to_owned();

    let list: Vec<Value> = server
        .client
        .get(server.url("/api/v1/backups"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], id.as_str());

    let detail = server
        .client
        .get(server.url(&format!("/api/v1/backups/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(detail.status(), 200);
    let detail: Value = detail.json().await.unwrap();
    assert_eq!(detail["checksum"], run["checksum"]);
}

#[tokio::test]
async fn unknown_and_malformed_ids() {
    let server = start_server(None).await;

    let missing = server
        .client
        .get(server.url(&format!("/api/v1/backups/{}", uuid::Uuid::now_v7())))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);
    let body: Value = missing.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let malformed = server
        .client
        .get(server.url("/api/v1/backups/not-a-uuid"))
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 400);
}

#[tokio::test]
async fn restore_puts_documents_back() {
    let server = start_server(None).await;
    let run = create_backup(&server).await;
    let id = run["id"].as_str().unwrap();

    server
        .documents
        .upsert_document("users", "u1", &fields(json!({"name": "Changed"})))
        .await
        .unwrap();

    let resp = server
        .client
        .post(server.url(&format!("/api/v1/backups/{id}/restore")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let report: Value = resp.json().await.unwrap();
    assert_eq!(report["restored"], 3);
    assert_eq!(report["failed"], 0);

    let restored = server.documents.document("users", "u1").await.unwrap();
    assert_eq!(restored.fields["name"], "Ada");
}

#[tokio::test]
async fn verify_reports_intact_archive() {
    let server = start_server(None).await;
    let run = create_backup(&server).await;
    let id = run["id"].as_str().unwrap();

    let report: Value = server
        .client
        .get(server.url(&format!("/api/v1/backups/{id}/verify")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["valid"], true);
    assert_eq!(report["expected"], run["checksum"]);
}

#[tokio::test]
async fn delete_then_lookup_is_not_found() {
    let server = start_server(None).await;
    let run = create_backup(&server).await;
    let id = run["id"].as_str().unwrap();

    let resp = server
        .client
        .delete(server.url(&format!("/api/v1/backups/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let again = server
        .client
        .delete(server.url(&format!("/api/v1/backups/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);

    let detail = server
        .client
        .get(server.url(&format!("/api/v1/backups/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(detail.status(), 404);
}

#[tokio::test]
async fn download_returns_archive_bytes() {
    let server = start_server(None).await;
    let run = create_backup(&server).await;
    let id = run["id"].as_str().unwrap();

    let resp = server
        .client
        .get(server.url(&format!("/api/v1/backups/{id}/download")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let disposition = resp
        .headers()
        .get("content-disposition")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert!(disposition.contains(&format!("{id}.json")));

    let bytes = resp.bytes().await.unwrap();
    let archive = Archive::from_bytes(&bytes).unwrap();
    assert_eq!(archive.document_count(), 3);
    assert_eq!(archive.metadata.collections, vec!["users", "placements"]);
}

#[tokio::test]
async fn stats_summarize_runs() {
    let server = start_server(None).await;
    create_backup(&server).await;
    create_backup(&server).await;

    let stats: Value = server
        .client
        .get(server.url("/api/v1/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["count"], 2);
    assert_eq!(stats["failed_count"], 0);
    assert!(stats["total_size_bytes"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn busy_guard_maps_to_conflict() {
    let server = start_server(None).await;
    let _permit = server.service.guard().try_acquire(Operation::Backup).unwrap();

    let resp = server
        .client
        .post(server.url("/api/v1/backups"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("in progress"));
}

#[tokio::test]
async fn scheduler_start_and_stop() {
    let server = start_server(None).await;

    let status: Value = server
        .client
        .get(server.url("/api/v1/scheduler"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["running"], false);
    assert!(status["next_run_time"].is_null());

    let started: Value = server
        .client
        .post(server.url("/api/v1/scheduler/start"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["running"], true);
    assert!(started["next_run_time"].is_string());

    let stopped: Value = server
        .client
        .post(server.url("/api/v1/scheduler/stop"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["running"], false);
}

#[tokio::test]
async fn api_requires_bearer_token_when_configured() {
    let server = start_server(Some("secret".to_owned())).await;

    let unauthorized = server
        .client
        .get(server.url("/api/v1/backups"))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), 401);

    let wrong = server
        .client
        .get(server.url("/api/v1/backups"))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let ok = server
        .client
        .get(server.url("/api/v1/backups"))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);

    let health = server
        .client
        .get(server.url("/api/v1/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);
}
