//! Persistence tests: diagram save/load through a RocksDB-backed server
//! and directly against the stores.

use archiflow_collab::server::{CollabServer, ServerConfig};
use archiflow_collab::storage::{
    DiagramStore, MemoryStore, RocksStore, SaveRequest, StoreConfig,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_persistent_server(dir: &tempfile::TempDir) -> SocketAddr {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        storage_path: Some(dir.path().join("db")),
        ..ServerConfig::default()
    };
    let server = CollabServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Ws {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    assert_eq!(request(&mut ws, None).await["type"], "welcome");
    ws
}

/// Optionally send `value`, then return the next JSON text frame.
async fn request(ws: &mut Ws, value: Option<Value>) -> Value {
    if let Some(value) = value {
        ws.send(Message::text(value.to_string())).await.unwrap();
    }
    loop {
        let msg = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("reply within timeout")
            .expect("stream open")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

fn save_request(id: &str, xml: &str) -> SaveRequest {
    SaveRequest {
        id: Some(id.to_string()),
        name: format!("Diagram {id}"),
        xml: xml.to_string(),
        user_id: "tester".to_string(),
    }
}

#[tokio::test]
async fn test_versions_through_server() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_persistent_server(&dir).await;
    let mut ws = connect(addr).await;

    for (xml, expected) in [("<v1/>", 1), ("<v2/>", 2)] {
        let saved = request(
            &mut ws,
            Some(json!({"type": "save-diagram", "id": "arch", "name": "Arch", "xml": xml})),
        )
        .await;
        assert_eq!(saved["version"], expected);
    }

    let latest = request(&mut ws, Some(json!({"type": "load-diagram", "id": "arch"}))).await;
    assert_eq!(latest["xml"], "<v2/>");
    assert_eq!(latest["version"], 2);

    let first = request(
        &mut ws,
        Some(json!({"type": "load-diagram", "id": "arch", "version": 1})),
    )
    .await;
    assert_eq!(first["xml"], "<v1/>");
}

#[tokio::test]
async fn test_generated_id_and_listing_through_server() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_persistent_server(&dir).await;
    let mut ws = connect(addr).await;

    let saved = request(
        &mut ws,
        Some(json!({"type": "save-diagram", "name": "Untitled", "xml": "<x/>"})),
    )
    .await;
    let id = saved["id"].as_str().unwrap().to_string();
    assert!(id.starts_with("diagram-"));

    let list = request(&mut ws, Some(json!({"type": "list-diagrams"}))).await;
    assert_eq!(list["type"], "diagram-list");
    let diagrams = list["diagrams"].as_array().unwrap();
    assert_eq!(diagrams.len(), 1);
    assert_eq!(diagrams[0]["id"], id.as_str());
    assert_eq!(diagrams[0]["updatedBy"], "anonymous");
    assert!(diagrams[0].get("xml").is_none());
}

#[tokio::test]
async fn test_missing_and_invalid_requests_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let addr = start_persistent_server(&dir).await;
    let mut ws = connect(addr).await;

    let missing = request(&mut ws, Some(json!({"type": "load-diagram", "id": "nope"}))).await;
    assert_eq!(missing["type"], "error");
    assert_eq!(missing["request"], "load-diagram");

    let blank = request(
        &mut ws,
        Some(json!({"type": "save-diagram", "id": " ", "name": "x", "xml": "<x/>"})),
    )
    .await;
    assert_eq!(blank["type"], "error");
    assert_eq!(blank["request"], "save-diagram");

    // The connection is still usable.
    let pong = request(&mut ws, Some(json!({"type": "ping"}))).await;
    assert_eq!(pong["type"], "pong");
}

#[test]
fn test_rocks_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    {
        let store = RocksStore::open(StoreConfig::for_testing(&path)).unwrap();
        store.save_diagram(save_request("a", "<a1/>")).unwrap();
        store.save_diagram(save_request("a", "<a2/>")).unwrap();
        store.save_diagram(save_request("b", "<b1/>")).unwrap();
        store.flush().unwrap();
    }

    let store = RocksStore::open(StoreConfig::for_testing(&path)).unwrap();
    let list = store.list_diagrams().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, "a");
    assert_eq!(list[0].version, 2);

    let a1 = store.load_diagram("a", Some(1)).unwrap().unwrap();
    assert_eq!(a1.xml, "<a1/>");
    let saved = store.save_diagram(save_request("a", "<a3/>")).unwrap();
    assert_eq!(saved.version, 3);
}

#[test]
fn test_memory_and_rocks_agree() {
    let dir = tempfile::tempdir().unwrap();
    let rocks = RocksStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
    let memory = MemoryStore::new();
    let stores: [&dyn DiagramStore; 2] = [&memory, &rocks];

    for store in stores {
        store.save_diagram(save_request("z", "<z/>")).unwrap();
        store.save_diagram(save_request("m", "<m1/>")).unwrap();
        store.save_diagram(save_request("m", "<m2/>")).unwrap();
    }

    let summarize = |store: &dyn DiagramStore| -> Vec<(String, u64, String)> {
        store
            .list_diagrams()
            .unwrap()
            .into_iter()
            .map(|d| (d.id, d.version, d.name))
            .collect()
    };
    assert_eq!(summarize(&memory), summarize(&rocks));
    assert_eq!(
        memory.load_diagram("m", None).unwrap().map(|d| d.xml),
        rocks.load_diagram("m", None).unwrap().map(|d| d.xml),
    );
}
