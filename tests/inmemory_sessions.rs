use session_mongo::inmemory::{InMemoryConnector, InMemoryServer};
use session_mongo::{CollectionStore, SessionStore, SessionStoreBuilder, StoreOptions};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DB: &str = "session-mongo-test";

async fn store_on(server: &Arc<InMemoryServer>) -> CollectionStore {
    SessionStoreBuilder::new(Arc::new(InMemoryConnector::new(server.clone())))
        .create(StoreOptions::database(DB))
        .await
        .expect("store created")
}

fn sid() -> String {
    Uuid::new_v4().to_string()
}

#[tokio::test]
async fn can_save_new_items() {
    let server = InMemoryServer::new();
    let store = store_on(&server).await;
    let sid = sid();

    store.save(&sid, "data1").await.expect("save");

    let raw = server.raw_record(DB, "sessions", &sid).expect("record stored");
    assert_eq!(raw.id, sid);
    assert_eq!(raw.blob, "data1");
}

#[tokio::test]
async fn can_load_items() {
    let server = InMemoryServer::new();
    let store = store_on(&server).await;
    let sid = sid();

    store.save(&sid, "hell").await.expect("save");
    assert_eq!(store.load(&sid).await.expect("load").as_deref(), Some("hell"));
}

#[tokio::test]
async fn can_overwrite_items() {
    let server = InMemoryServer::new();
    let store = store_on(&server).await;
    let sid = sid();

    store.save(&sid, "blobA").await.expect("first save");
    store.save(&sid, "blobB").await.expect("second save");

    assert_eq!(store.load(&sid).await.expect("load").as_deref(), Some("blobB"));
    assert_eq!(server.records(DB, "sessions").len(), 1);
}

#[tokio::test]
async fn overwrite_refreshes_updated_at() {
    let server = InMemoryServer::new();
    let store = store_on(&server).await;
    let sid = sid();

    store.save(&sid, "blah").await.expect("save");
    let first = server.raw_record(DB, "sessions", &sid).expect("stored").updated_at;

    tokio::time::sleep(Duration::from_millis(50)).await;
    store.save(&sid, "blah2").await.expect("save again");
    let second = server.raw_record(DB, "sessions", &sid).expect("stored").updated_at;

    assert!(second > first, "updatedAt should move forward on overwrite");
}

#[tokio::test]
async fn can_remove_items() {
    let server = InMemoryServer::new();
    let store = store_on(&server).await;
    let sid = sid();

    store.save(&sid, "hell").await.expect("save");
    store.remove(&sid).await.expect("remove");

    assert!(store.load(&sid).await.expect("load").is_none());
    assert!(server.raw_record(DB, "sessions", &sid).is_none());
}

#[tokio::test]
async fn missing_ids_are_not_errors() {
    let server = InMemoryServer::new();
    let store = store_on(&server).await;
    let sid = sid();

    assert!(store.load(&sid).await.expect("load").is_none());
    store.remove(&sid).await.expect("remove of unknown id");
    store.remove(&sid).await.expect("repeat remove");
}

#[tokio::test]
async fn stores_on_the_same_collection_share_records() {
    let server = InMemoryServer::new();
    let writer = store_on(&server).await;
    let reader = store_on(&server).await;
    let sid = sid();

    writer.save(&sid, "shared").await.expect("save");
    assert_eq!(reader.load(&sid).await.expect("load").as_deref(), Some("shared"));
}

#[tokio::test]
async fn concurrent_saves_to_distinct_ids() {
    let server = InMemoryServer::new();
    let store = store_on(&server).await;

    let mut tasks = Vec::new();
    for i in 0..32 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let id = format!("concurrent-{i}");
            store.save(&id, &format!("blob-{i}")).await.expect("save");
            id
        }));
    }

    for (i, task) in tasks.into_iter().enumerate() {
        let id = task.await.expect("task joined");
        let blob = store.load(&id).await.expect("load");
        assert_eq!(blob, Some(format!("blob-{i}")));
    }
}

#[tokio::test]
async fn concurrent_overwrites_leave_one_winner() {
    let server = InMemoryServer::new();
    let store = store_on(&server).await;
    let sid = sid();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        let sid = sid.clone();
        tasks.push(tokio::spawn(async move {
            store.save(&sid, &format!("writer-{i}")).await.expect("save");
        }));
    }
    for task in tasks {
        task.await.expect("task joined");
    }

    let blob = store.load(&sid).await.expect("load").expect("present");
    assert!(blob.starts_with("writer-"));
    assert_eq!(server.records(DB, "sessions").len(), 1);
}
