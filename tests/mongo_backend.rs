#![cfg(feature = "mongo")]

use session_mongo::{
    create_session_store, ConnectionRegistry, SessionBackendConfig, SessionStore,
    SessionStoreBuilder, StoreOptions,
};
use session_mongo::backend::ExistingConnection;
use session_mongo::mongo_store::{MongoConnection, MongoConnector};
use session_mongo::resolver;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

fn mongo_url() -> Option<String> {
    std::env::var("MONGODB_URL").ok().filter(|url| !url.is_empty())
}

fn test_options(url: String) -> StoreOptions {
    let collection = format!("sessions_test_{}", Uuid::new_v4().simple());
    StoreOptions::from_url(url).with_db("session-mongo-test").with_collection(collection)
}

#[tokio::test]
async fn mongo_backend_crud_when_url_provided() {
    let Some(url) = mongo_url() else {
        eprintln!("skipping mongo_backend_crud_when_url_provided: MONGODB_URL not set");
        return;
    };

    let store = create_session_store(SessionBackendConfig::Mongo(test_options(url)))
        .await
        .expect("construct mongo store");
    let sid = Uuid::new_v4().to_string();

    assert!(store.load(&sid).await.expect("load missing").is_none());

    store.save(&sid, "data1").await.expect("save");
    assert_eq!(store.load(&sid).await.expect("load").as_deref(), Some("data1"));

    store.save(&sid, "data2").await.expect("overwrite");
    assert_eq!(store.load(&sid).await.expect("load").as_deref(), Some("data2"));

    store.remove(&sid).await.expect("remove");
    assert!(store.load(&sid).await.expect("load after delete").is_none());
    store.remove(&sid).await.expect("remove is idempotent");
}

#[tokio::test]
async fn mongo_rejects_bad_credentials() {
    let Some(url) = mongo_url() else {
        eprintln!("skipping mongo_rejects_bad_credentials: MONGODB_URL not set");
        return;
    };

    let options = test_options(url).with_credentials("admin", "definitely-wrong");
    let err = create_session_store(SessionBackendConfig::Mongo(options))
        .await
        .expect_err("bad credentials");
    assert!(
        err.to_string().starts_with("Error authenticating with admin: "),
        "unexpected message: {err}"
    );
}

#[tokio::test]
async fn mongo_checks_option_credentials_on_existing_client() {
    let Some(url) = mongo_url() else {
        eprintln!("skipping mongo_checks_option_credentials_on_existing_client: MONGODB_URL not set");
        return;
    };

    let client = mongodb::Client::with_uri_str(&url).await.expect("client");
    let mut params = resolver::resolve(&test_options(url))
        .expect("resolves")
        .params();
    params.credentials = None;
    let existing = ExistingConnection::new(
        params.clone(),
        Arc::new(MongoConnection::from_client(client, params)),
    );

    let err = create_session_store(SessionBackendConfig::Mongo(
        StoreOptions::new()
            .with_credentials("admin", "definitely-wrong")
            .with_connection(existing),
    ))
    .await
    .expect_err("wrong credentials on an existing client");
    assert!(
        err.to_string().starts_with("Error authenticating with admin: "),
        "unexpected message: {err}"
    );
}

#[tokio::test]
async fn mongo_registry_closes_connections() {
    let Some(url) = mongo_url() else {
        eprintln!("skipping mongo_registry_closes_connections: MONGODB_URL not set");
        return;
    };

    let registry = ConnectionRegistry::new();
    let store = SessionStoreBuilder::new(Arc::new(MongoConnector::new()))
        .with_registry(registry.clone())
        .create(test_options(url))
        .await
        .expect("construct mongo store");
    store.save("sid", "blob").await.expect("save");

    registry.close_all().await.expect("close all");
    assert!(store.load("sid").await.is_err());
}

/// MongoDB's TTL monitor runs every 60 seconds; opt in with MONGODB_TTL_TEST=1.
#[tokio::test]
async fn mongo_expires_stale_sessions() {
    let Some(url) = mongo_url() else {
        eprintln!("skipping mongo_expires_stale_sessions: MONGODB_URL not set");
        return;
    };
    if std::env::var("MONGODB_TTL_TEST").ok().as_deref() != Some("1") {
        eprintln!("skipping mongo_expires_stale_sessions: MONGODB_TTL_TEST not set");
        return;
    }

    let store = create_session_store(SessionBackendConfig::Mongo(
        test_options(url).with_ttl(Duration::ZERO),
    ))
    .await
    .expect("construct mongo store");
    store.save("too-old", "blah").await.expect("save");

    let deadline = Instant::now() + Duration::from_secs(130);
    while store.load("too-old").await.expect("load").is_some() {
        assert!(Instant::now() < deadline, "record was never expired");
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}
