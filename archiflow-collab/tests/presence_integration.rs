//! Integration tests for presence: identities, colours and rosters as
//! seen by real WebSocket clients.

use archiflow_collab::presence::PALETTE;
use archiflow_collab::server::{CollabServer, ServerConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_test_server() -> SocketAddr {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    };
    let server = CollabServer::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    addr
}

async fn send(ws: &mut Ws, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn recv(ws: &mut Ws) -> Value {
    loop {
        let msg = timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream open")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Connect, optionally identify, and return the welcome frame.
async fn connect_client(addr: SocketAddr, identity: Option<(&str, &str)>) -> (Ws, Value) {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();
    let welcome = recv(&mut ws).await;
    if let Some((user_id, display_name)) = identity {
        send(
            &mut ws,
            json!({"type": "identify", "userId": user_id, "displayName": display_name}),
        )
        .await;
    }
    (ws, welcome)
}

async fn join(ws: &mut Ws, room: &str) -> Value {
    send(ws, json!({"type": "join-room", "roomId": room})).await;
    recv(ws).await
}

// ─── Presence Protocol Tests ─────────────────────────────────────

#[tokio::test]
async fn test_presence_join_carries_identity() {
    let addr = start_test_server().await;
    let (mut alice, _) = connect_client(addr, Some(("u-alice", "Alice"))).await;
    let (mut bob, welcome_b) = connect_client(addr, Some(("u-bob", "Bob"))).await;

    join(&mut alice, "plan").await;
    let roster = join(&mut bob, "plan").await;
    assert_eq!(roster["members"][0]["userId"], "u-alice");
    assert_eq!(roster["members"][0]["displayName"], "Alice");

    let joined = recv(&mut alice).await;
    assert_eq!(joined["type"], "presence-join");
    assert_eq!(joined["userId"], "u-bob");
    assert_eq!(joined["displayName"], "Bob");
    assert_eq!(joined["color"], welcome_b["color"]);
    assert!(joined["timestamp"].as_u64().is_some());
}

#[tokio::test]
async fn test_roster_lists_members_in_join_order() {
    let addr = start_test_server().await;
    let mut clients = Vec::new();
    let mut ids = Vec::new();
    for name in ["A", "B", "C"] {
        let (mut ws, welcome) = connect_client(addr, Some((name, name))).await;
        join(&mut ws, "ordered").await;
        ids.push(welcome["connectionId"].clone());
        clients.push(ws);
    }

    let (mut late, _) = connect_client(addr, None).await;
    let roster = join(&mut late, "ordered").await;
    let members: Vec<Value> = roster["members"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["connectionId"].clone())
        .collect();
    assert_eq!(members, ids);
}

#[tokio::test]
async fn test_cursor_envelope_reflects_identify() {
    let addr = start_test_server().await;
    let (mut viewer, _) = connect_client(addr, None).await;
    let (mut editor, _) = connect_client(addr, None).await;
    join(&mut viewer, "r").await;
    join(&mut editor, "r").await;
    recv(&mut viewer).await;

    send(&mut editor, json!({"type": "identify", "userId": "u-9", "displayName": "Grace"})).await;
    send(&mut editor, json!({"type": "cursor-move", "x": 3.5, "y": -1.25})).await;

    let moved = recv(&mut viewer).await;
    assert_eq!(moved["sourceUserId"], "u-9");
    assert_eq!(moved["sourceDisplayName"], "Grace");
    assert_eq!(moved["x"], 3.5);
    assert_eq!(moved["y"], -1.25);
}

#[tokio::test]
async fn test_anonymous_defaults() {
    let addr = start_test_server().await;
    let (mut a, _) = connect_client(addr, None).await;
    let (mut b, _) = connect_client(addr, None).await;
    join(&mut a, "anon").await;
    join(&mut b, "anon").await;

    let joined = recv(&mut a).await;
    assert_eq!(joined["userId"], "anonymous");
    assert_eq!(joined["displayName"], "Anonymous");
}

#[tokio::test]
async fn test_colors_cycle_through_palette() {
    let addr = start_test_server().await;
    let mut sockets = Vec::new();
    let mut colors = HashSet::new();
    for _ in 0..PALETTE.len() {
        let (ws, welcome) = connect_client(addr, None).await;
        let color = welcome["color"].as_str().unwrap().to_string();
        assert!(PALETTE.contains(&color.as_str()));
        colors.insert(color);
        sockets.push(ws);
    }
    assert_eq!(colors.len(), PALETTE.len());
}

#[tokio::test]
async fn test_diagram_edit_relayed_untouched() {
    let addr = start_test_server().await;
    let (mut a, _) = connect_client(addr, None).await;
    let (mut b, _) = connect_client(addr, None).await;
    join(&mut a, "edit").await;
    join(&mut b, "edit").await;
    recv(&mut a).await;

    let change = json!({"op": "move", "cells": ["c1", "c2"], "dx": 4, "nested": {"keep": [1, null]}});
    send(&mut b, json!({"type": "diagram-edit", "change": change.clone()})).await;
    let relayed = recv(&mut a).await;
    assert_eq!(relayed["type"], "diagram-edit");
    assert_eq!(relayed["change"], change);
}
