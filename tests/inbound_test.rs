//! Inbound identity surface integration tests
//!
//! Serves one local node's handshake endpoints and talks to them with a
//! second node, both through raw HTTP and through the sync handshake.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use aether_node::api::{Address, ApiResponse};
use aether_node::inbound::{self, InboundState};
use aether_node::store::AddressFilter;
use aether_node::verify;
use tempfile::TempDir;

use common::{LocalNode, TEST_BITS};

async fn serve(node: &LocalNode) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(InboundState::new(
        node.identity.clone(),
        node.store.clone(),
        TEST_BITS,
    ));
    let router = inbound::create_router(state, "");
    tokio::spawn(async move {
        let _ = inbound::serve(listener, router).await;
    });
    addr
}

/// `caller`'s presentation, claiming to live at `location:port`.
fn presentation_claiming(caller: &LocalNode, location: &str, port: u16) -> ApiResponse {
    let mut page = caller.identity.presentation();
    page.address.location = location.to_string();
    page.address.port = port;
    verify::sign_page(&mut page, caller.identity.signing_key(), Some(TEST_BITS));
    page
}

async fn post(addr: SocketAddr, page: &ApiResponse) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{}/v0/node", addr))
        .json(page)
        .send()
        .await
        .unwrap()
}

// =============================================================================
// Raw endpoints
// =============================================================================

#[tokio::test]
async fn test_status_and_node() {
    let dir = TempDir::new().unwrap();
    let node = LocalNode::new(dir.path());
    let addr = serve(&node).await;

    let status = reqwest::get(format!("http://{}/v0/status", addr)).await.unwrap();
    assert!(status.status().is_success());
    assert!(status.text().await.unwrap().is_empty());

    let page: ApiResponse = reqwest::get(format!("http://{}/v0/node", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(verify::verify_page(&page).unwrap(), node.identity.node_id());
    verify::verify_page_work(&page, TEST_BITS).unwrap();

    // Repeated GETs are answered from the stamped reply, not restamped.
    let again: ApiResponse = reqwest::get(format!("http://{}/v0/node", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again.nonce, page.nonce);
}

// =============================================================================
// Trust tiering
// =============================================================================

#[tokio::test]
async fn test_inbound_caller_is_stored_at_socket_address() {
    let server_dir = TempDir::new().unwrap();
    let caller_dir = TempDir::new().unwrap();
    let server = LocalNode::new(server_dir.path());
    let caller = LocalNode::new(caller_dir.path());
    let addr = serve(&server).await;

    let reply = post(addr, &presentation_claiming(&caller, "1.2.3.4", 9999)).await;
    assert!(reply.status().is_success());
    let page: ApiResponse = reply.json().await.unwrap();
    assert_eq!(verify::verify_page(&page).unwrap(), server.identity.node_id());

    let known = server.store.read_addresses(&AddressFilter::default()).unwrap();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].location, "127.0.0.1");
    assert_eq!(known[0].port, 9999);
    assert!(known[0].last_successful_ping > 0);
    assert!(known.iter().all(|a| a.location != "1.2.3.4"));
}

#[tokio::test]
async fn test_replayed_presentation_is_rejected() {
    let server_dir = TempDir::new().unwrap();
    let caller_dir = TempDir::new().unwrap();
    let server = LocalNode::new(server_dir.path());
    let caller = LocalNode::new(caller_dir.path());
    let addr = serve(&server).await;

    let page = presentation_claiming(&caller, "1.2.3.4", 9999);
    assert!(post(addr, &page).await.status().is_success());
    assert_eq!(post(addr, &page).await.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unsigned_or_tampered_presentation_is_rejected() {
    let server_dir = TempDir::new().unwrap();
    let caller_dir = TempDir::new().unwrap();
    let server = LocalNode::new(server_dir.path());
    let caller = LocalNode::new(caller_dir.path());
    let addr = serve(&server).await;

    let unsigned = ApiResponse {
        address: Address::new("1.2.3.4", 9999),
        nonce: "n".into(),
        ..Default::default()
    };
    assert_eq!(post(addr, &unsigned).await.status(), reqwest::StatusCode::UNAUTHORIZED);

    let mut tampered = presentation_claiming(&caller, "1.2.3.4", 9999);
    tampered.address.port = 1;
    assert_eq!(post(addr, &tampered).await.status(), reqwest::StatusCode::UNAUTHORIZED);

    assert!(server.store.read_addresses(&AddressFilter::default()).unwrap().is_empty());
}

// =============================================================================
// Handshake between two nodes
// =============================================================================

#[tokio::test]
async fn test_sync_handshake_against_inbound_surface() {
    let server_dir = TempDir::new().unwrap();
    let caller_dir = TempDir::new().unwrap();
    let server = LocalNode::new(server_dir.path());
    let caller = LocalNode::new(caller_dir.path());
    let addr = serve(&server).await;

    let checked = caller
        .syncer
        .check(&Address::new("127.0.0.1", addr.port()))
        .await
        .unwrap();
    assert_eq!(checked.node_id, server.identity.node_id());
    assert!(!checked.is_static);
    assert_eq!(checked.address.port, addr.port());

    let known = server.store.read_addresses(&AddressFilter::default()).unwrap();
    assert_eq!(known.len(), 1);
    assert_eq!(known[0].port, caller.config.node.port);
}
