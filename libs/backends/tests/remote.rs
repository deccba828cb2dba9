//! Remote handler against a local dispatch server

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use mds_backends::{
    AuthContext, Backends, Error, Instance, MethodOptions, PluginTable, Registry, RemoteConfig,
    TargetMode,
};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct Seen {
    authorization: Arc<Mutex<Vec<String>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

async fn create_encounter(
    State(seen): State<Seen>,
    headers: HeaderMap,
    Json(mut body): Json<Value>,
) -> Json<Value> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        seen.authorization.lock().unwrap().push(value.to_string());
    }
    body["uuid"] = json!("remote-1");
    Json(json!({ "status": "SUCCESS", "code": 200, "data": [body] }))
}

async fn read_encounter(
    State(seen): State<Seen>,
    Path(uuid): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    seen.queries.lock().unwrap().push(query);
    if uuid == "known" {
        Ok(Json(json!({ "uuid": "known", "concept": "remote concept" })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn update_encounter() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn delete_encounter() -> StatusCode {
    StatusCode::OK
}

async fn spawn_server(seen: Seen) -> anyhow::Result<String> {
    let app = Router::new()
        .route("/api/encounter/", post(create_encounter))
        .route(
            "/api/encounter/:uuid/",
            get(read_encounter)
                .put(update_encounter)
                .delete(delete_encounter),
        )
        .with_state(seen);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("test server error: {e}");
        }
    });
    Ok(format!("http://{}/api/", addr))
}

async fn remote_backends(seen: Seen) -> anyhow::Result<Backends> {
    let base_url = spawn_server(seen).await?;
    let plugins = PluginTable::builtin(&RemoteConfig {
        base_url: Some(base_url),
        timeout_seconds: 5,
    });
    let mut registry = Registry::new();
    registry.register("Encounter", "remote");
    registry.register("Encounter", "log");

    Ok(Backends::new(Arc::new(registry), Arc::new(plugins))
        .with_target(TargetMode::Remote("remote".to_string())))
}

#[tokio::test]
async fn create_adopts_identifier_from_envelope() -> anyhow::Result<()> {
    let seen = Seen::default();
    let backends = remote_backends(seen.clone()).await?;
    let auth = AuthContext::bearer("token-123");

    let mut instance = Instance::new("Encounter")
        .with_uuid("local-1")
        .with_field("concept", "intake");
    let record = backends
        .create(&mut instance, Some(&auth), &MethodOptions::new())
        .await?
        .expect("remote returns a record");

    assert_eq!(record.uuid.as_deref(), Some("remote-1"));
    assert_eq!(record.field("concept"), Some(&json!("intake")));
    assert_eq!(instance.uuid.as_deref(), Some("remote-1"));
    assert_eq!(
        seen.authorization.lock().unwrap().as_slice(),
        ["Bearer token-123".to_string()]
    );
    Ok(())
}

#[tokio::test]
async fn read_maps_not_found_to_no_opinion() -> anyhow::Result<()> {
    let seen = Seen::default();
    let backends = remote_backends(seen.clone()).await?;
    let mut options = MethodOptions::new();
    options.insert("format".to_string(), json!("full"));

    let known = backends
        .read(&Instance::new("Encounter").with_uuid("known"), None, &options)
        .await?;
    assert_eq!(
        known.and_then(|i| i.field("concept").cloned()),
        Some(json!("remote concept"))
    );

    let unknown = backends
        .read(&Instance::new("Encounter").with_uuid("missing"), None, &options)
        .await?;
    assert!(unknown.is_none());

    let queries = seen.queries.lock().unwrap();
    assert_eq!(queries[0].get("format").map(String::as_str), Some("full"));
    Ok(())
}

#[tokio::test]
async fn server_error_fails_the_primary() -> anyhow::Result<()> {
    let backends = remote_backends(Seen::default()).await?;

    let err = backends
        .update(
            &Instance::new("Encounter").with_uuid("known"),
            None,
            &MethodOptions::new(),
        )
        .await
        .unwrap_err();

    match err {
        Error::Dispatch { handler, source, .. } => {
            assert_eq!(handler, "remote");
            assert!(source.to_string().contains("500"));
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[tokio::test]
async fn empty_delete_response_has_no_opinion() -> anyhow::Result<()> {
    let backends = remote_backends(Seen::default()).await?;

    let deleted = backends
        .delete(
            &Instance::new("Encounter").with_uuid("known"),
            None,
            &MethodOptions::new(),
        )
        .await?;
    assert!(deleted.is_none());
    Ok(())
}

#[tokio::test]
async fn uuid_is_required_for_item_operations() -> anyhow::Result<()> {
    let backends = remote_backends(Seen::default()).await?;

    let err = backends
        .read(&Instance::new("Encounter"), None, &MethodOptions::new())
        .await
        .unwrap_err();
    match err {
        Error::Dispatch { source, .. } => assert!(matches!(*source, Error::Validation(_))),
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}
