use std::sync::Arc;
use std::time::Duration;

use fluxbase::CollectionOptions;
use fluxbase::auth::{NullValidator, StaticTokenValidator, TokenValidator};
use fluxbase::realtime::{ConnectionHub, HubOptions, MessageSink, SubscriptionRegistry};
use fluxbase::service::{Backend, QueryResult};
use fluxbase::store::{SqliteStore, StoreOptions};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    _dir: tempfile::TempDir,
    hub: Arc<ConnectionHub>,
    registry: Arc<SubscriptionRegistry>,
    backend: Backend,
    url: String,
}

async fn start_server(validator: Arc<dyn TokenValidator>) -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteStore::open(&dir.path().join("hub.db"), &StoreOptions::default()).unwrap(),
    );
    let registry = Arc::new(SubscriptionRegistry::new());
    let hub = Arc::new(ConnectionHub::new(
        Arc::clone(&registry),
        validator,
        HubOptions::default(),
    ));
    let backend = Backend::new(
        store,
        Arc::clone(&registry),
        Arc::clone(&hub) as Arc<dyn MessageSink>,
    )
    .with_hub(Arc::clone(&hub));
    backend.catalog().create("products", CollectionOptions::default()).unwrap();
    backend.catalog().create("orders", CollectionOptions::default()).unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    tokio::spawn(Arc::clone(&hub).serve(listener));
    TestServer { _dir: dir, hub, registry, backend, url }
}

async fn connect(url: &str) -> Socket {
    let (socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    socket
}

async fn send_json(socket: &mut Socket, frame: Value) {
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn next_json(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed early")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn handshake_subscribe_ping_unsubscribe_round_trip() {
    let server = start_server(Arc::new(NullValidator)).await;
    let mut socket = connect(&server.url).await;

    let welcome = next_json(&mut socket).await;
    assert_eq!(welcome["type"], json!("welcome"));
    assert!(welcome["connectionId"].is_string());

    send_json(&mut socket, json!({"action": "subscribe", "collection": "products"})).await;
    let ack = next_json(&mut socket).await;
    assert_eq!(ack["type"], json!("subscribed"));
    assert_eq!(ack["collection"], json!("products"));
    assert!(ack["subscriptionId"].is_string());
    assert_eq!(server.registry.len(), 1);

    send_json(&mut socket, json!({"action": "ping"})).await;
    assert_eq!(next_json(&mut socket).await, json!({"action": "pong"}));

    send_json(&mut socket, json!({"action": "unsubscribe", "collection": "products"})).await;
    assert_eq!(next_json(&mut socket).await["type"], json!("unsubscribed"));
    assert!(server.registry.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn changes_are_pushed_to_collection_subscribers() {
    let server = start_server(Arc::new(NullValidator)).await;
    let mut products = connect(&server.url).await;
    let mut orders = connect(&server.url).await;
    next_json(&mut products).await;
    next_json(&mut orders).await;

    send_json(&mut products, json!({"action": "subscribe", "collection": "products"})).await;
    next_json(&mut products).await;
    send_json(&mut orders, json!({"action": "subscribe", "collection": "orders"})).await;
    next_json(&mut orders).await;

    server
        .backend
        .execute_json(&json!({
            "action": "create", "collection": "products", "data": {"name": "widget"}
        }))
        .unwrap();
    server
        .backend
        .execute_json(&json!({
            "action": "create", "collection": "orders", "data": {"total": 31}
        }))
        .unwrap();

    let event = next_json(&mut products).await;
    assert_eq!(event["event"], json!("create"));
    assert_eq!(event["collection"], json!("products"));
    assert_eq!(event["document"]["data"]["name"], json!("widget"));

    // the orders client never saw the products change or it would have
    // arrived ahead of this one
    let event = next_json(&mut orders).await;
    assert_eq!(event["collection"], json!("orders"));
    assert_eq!(event["document"]["data"]["total"], json!(31));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn document_scoped_subscribers_skip_other_documents() {
    let server = start_server(Arc::new(NullValidator)).await;
    let QueryResult::Created(watched) = server
        .backend
        .execute_json(&json!({
            "action": "create", "collection": "products", "data": {"name": "watched"}
        }))
        .unwrap()
    else {
        panic!("expected a created document")
    };
    server
        .backend
        .execute_json(&json!({
            "action": "create", "collection": "products", "data": {"name": "other"}
        }))
        .unwrap();

    let mut socket = connect(&server.url).await;
    next_json(&mut socket).await;
    send_json(
        &mut socket,
        json!({"action": "subscribe", "collection": "products", "documentId": watched.id}),
    )
    .await;
    let ack = next_json(&mut socket).await;
    assert_eq!(ack["documentId"], json!(watched.id));

    server
        .backend
        .execute_json(&json!({
            "action": "update", "collection": "products",
            "query": {"where": {"name": "other"}}, "data": {"price": 5}
        }))
        .unwrap();
    server
        .backend
        .execute_json(&json!({
            "action": "update", "collection": "products",
            "query": {"where": {"name": "watched"}}, "data": {"price": 9}
        }))
        .unwrap();

    let event = next_json(&mut socket).await;
    assert_eq!(event["documentId"], json!(watched.id));
    assert_eq!(event["document"]["version"], json!(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_frames_get_an_error_without_closing_the_socket() {
    let server = start_server(Arc::new(NullValidator)).await;
    let mut socket = connect(&server.url).await;
    next_json(&mut socket).await;

    send_json(&mut socket, json!({"action": "teleport"})).await;
    assert_eq!(next_json(&mut socket).await["type"], json!("error"));

    send_json(&mut socket, json!({"action": "ping"})).await;
    assert_eq!(next_json(&mut socket).await, json!({"action": "pong"}));
    assert_eq!(server.hub.connection_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tokens_attach_a_user_and_bad_tokens_stay_anonymous() {
    let mut tokens = std::collections::HashMap::new();
    tokens.insert("svc-token".to_string(), "ingest-worker".to_string());
    let server = start_server(Arc::new(StaticTokenValidator::new(tokens))).await;

    let mut authed = connect(&format!("{}/?token=svc-token", server.url)).await;
    next_json(&mut authed).await;
    send_json(&mut authed, json!({"action": "subscribe", "collection": "products"})).await;
    next_json(&mut authed).await;
    let subscriptions = server.registry.matching("products", "any");
    assert_eq!(subscriptions[0].user_id.as_deref(), Some("ingest-worker"));

    let mut anonymous = connect(&format!("{}/?token=wrong", server.url)).await;
    let welcome = next_json(&mut anonymous).await;
    assert_eq!(welcome["type"], json!("welcome"));
    send_json(&mut anonymous, json!({"action": "subscribe", "collection": "orders"})).await;
    next_json(&mut anonymous).await;
    let subscriptions = server.registry.matching("orders", "any");
    assert!(subscriptions[0].user_id.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closing_the_socket_drops_the_connection_and_its_subscriptions() {
    let server = start_server(Arc::new(NullValidator)).await;
    let mut socket = connect(&server.url).await;
    next_json(&mut socket).await;
    send_json(&mut socket, json!({"action": "subscribe", "collection": "products"})).await;
    next_json(&mut socket).await;
    assert_eq!(server.hub.connection_count(), 1);

    socket.close(None).await.unwrap();
    for _ in 0..50 {
        if server.hub.connection_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(server.hub.connection_count(), 0);
    assert!(server.registry.is_empty());
}
