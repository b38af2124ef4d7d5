//! On-disk SurrealDB store (surrealkv) smoke test.

use grading_state::{SessionId, SessionRecord, SessionStore, SurrealSessionStore};
use serde_json::json;

#[tokio::test]
async fn local_store_persists_records_under_given_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    let store = SurrealSessionStore::open_local(&path).await.unwrap();
    assert!(path.exists());

    let id = SessionId::parse("grading_feedbeef").unwrap();
    store
        .put(SessionRecord::new(
            id.clone(),
            "awaiting_approval",
            3,
            json!({ "stage": "awaiting_approval", "percentage": 93.0 }),
        ))
        .await
        .unwrap();

    let back = store.get(&id).await.unwrap();
    assert_eq!(back.revision, 3);
    assert_eq!(back.payload["percentage"], json!(93.0));
}
