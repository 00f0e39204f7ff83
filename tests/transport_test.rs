//! Cache transport integration tests
//!
//! Runs the walkers against an in-process peer serving signed pages:
//! - page checks (signature, fingerprint tolerance, offline peers)
//! - cache walks with missing pages
//! - endpoint and live-reply walks

mod common;

use aether_node::api::{address_type, Address, Endpoint, Entity, EntityKind};
use aether_node::config::NetworkConfig;
use aether_node::error::SyncError;
use aether_node::transport::Transport;

use common::{board, cache_page, index_page, page_of, MockPeer};

fn transport(address_limit: usize) -> Transport {
    let network = NetworkConfig {
        connection_timeout_secs: 5,
        tcp_connect_timeout_secs: 1,
        tls_handshake_timeout_secs: 1,
        ..Default::default()
    };
    Transport::new(&network, address_limit).unwrap()
}

fn boards(prefix: &str, n: usize) -> Vec<Entity> {
    (0..n)
        .map(|i| board(&format!("{}-{}", prefix, i), 1_000 + i as i64))
        .collect()
}

fn broken(entity: &Entity) -> Entity {
    let mut e = entity.clone();
    if let Entity::Board(b) = &mut e {
        b.name.push_str(" (edited)");
    }
    e
}

// =============================================================================
// Page checks
// =============================================================================

#[tokio::test]
async fn test_fetch_page_derives_node_id_from_signature() {
    let peer = MockPeer::start(address_type::LIVE).await;
    let t = transport(100);

    let page = t
        .fetch_page(&peer.address().key(), "node", None)
        .await
        .unwrap();
    assert_eq!(page.node_id, peer.node_id());
    assert_eq!(page.address.port, peer.addr.port());
}

#[tokio::test]
async fn test_page_with_three_broken_fingerprints_is_malformed() {
    let peer = MockPeer::start(address_type::LIVE).await;
    let t = transport(100);
    let good = boards("ok", 3);

    let two_broken = vec![good[0].clone(), broken(&good[1]), broken(&good[2])];
    peer.serve("GET", "c0/boards/a/0.json", page_of(&two_broken, 10));
    let page = t
        .fetch_page(&peer.address().key(), "c0/boards/a/0.json", None)
        .await
        .unwrap();
    assert_eq!(page.response.boards.len(), 3);

    let three_broken: Vec<Entity> = good.iter().map(broken).collect();
    peer.serve("GET", "c0/boards/b/0.json", page_of(&three_broken, 10));
    let err = t
        .fetch_page(&peer.address().key(), "c0/boards/b/0.json", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MalformedResponse { .. }), "{:?}", err);
}

#[tokio::test]
async fn test_missing_page_is_http_error() {
    let peer = MockPeer::start(address_type::LIVE).await;
    let err = transport(100)
        .fetch_page(&peer.address().key(), "c0/posts/nope/0.json", None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Http { status: 404, .. }));
    assert!(err.is_miss());
}

#[tokio::test]
async fn test_closed_port_is_offline() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let remote = Address::new("127.0.0.1", port).key();
    let err = transport(100).ping(&remote).await.unwrap_err();
    assert!(err.is_offline(), "{:?}", err);
    assert!(err.aborts_sync());
}

// =============================================================================
// Cache walks
// =============================================================================

#[tokio::test]
async fn test_walk_cache_gives_up_after_three_missing_pages() {
    let peer = MockPeer::start(address_type::LIVE).await;
    let all = boards("p", 7);
    for n in [0u64, 1, 2, 6] {
        peer.serve(
            "GET",
            &format!("c0/boards/c1/{}.json", n),
            cache_page(&all[n as usize..n as usize + 1], n, 7, 100 + n as i64),
        );
    }

    let err = transport(100)
        .walk_cache(&peer.address().key(), "c0/boards/c1")
        .await
        .unwrap_err();

    match err {
        SyncError::ConsecutiveMissesExceeded { misses, partial, .. } => {
            assert_eq!(misses, 3);
            let names: Vec<String> = partial.body.boards.iter().map(|b| b.name.clone()).collect();
            assert_eq!(names, vec!["p-0", "p-1", "p-2"]);
        }
        other => panic!("expected ConsecutiveMissesExceeded, got {:?}", other),
    }
    assert!(peer.requested("GET", "c0/boards/c1/5.json"));
    assert!(!peer.requested("GET", "c0/boards/c1/6.json"));
}

#[tokio::test]
async fn test_walk_cache_skips_isolated_gaps() {
    let peer = MockPeer::start(address_type::LIVE).await;
    let all = boards("g", 5);
    for n in [0u64, 2, 4] {
        peer.serve(
            "GET",
            &format!("c0/boards/c2/{}.json", n),
            cache_page(&all[n as usize..n as usize + 1], n, 5, 100),
        );
    }

    let resp = transport(100)
        .walk_cache(&peer.address().key(), "c0/boards/c2")
        .await
        .unwrap();
    assert_eq!(resp.body.boards.len(), 3);
}

#[tokio::test]
async fn test_walk_is_repeatable() {
    let peer = MockPeer::start(address_type::LIVE).await;
    let all = boards("r", 4);
    for n in 0..2u64 {
        let chunk = &all[(n as usize) * 2..(n as usize) * 2 + 2];
        peer.serve("GET", &format!("c0/boards/c3/{}.json", n), cache_page(chunk, n, 2, 500));
    }

    let t = transport(100);
    let remote = peer.address().key();
    let first = t.walk_cache(&remote, "c0/boards/c3").await.unwrap();
    let second = t.walk_cache(&remote, "c0/boards/c3").await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.body.boards.len(), 4);
    assert_eq!(first.most_recent_source_timestamp, 500);
}

#[tokio::test]
async fn test_address_walk_stops_at_limit() {
    let peer = MockPeer::start(address_type::LIVE).await;
    for n in 0..3u64 {
        let mut page = cache_page(&[], n, 3, 100);
        page.response.addresses = (0..60)
            .map(|i| Address::new(format!("10.{}.0.{}", n, i), 4000))
            .collect();
        peer.serve("GET", &format!("addresses/c4/{}.json", n), page);
    }

    let resp = transport(100)
        .walk_cache(&peer.address().key(), "addresses/c4")
        .await
        .unwrap();
    assert_eq!(resp.body.addresses.len(), 120);
    assert!(!peer.requested("GET", "addresses/c4/2.json"));
}

// =============================================================================
// Endpoint and live walks
// =============================================================================

#[tokio::test]
async fn test_walk_endpoint_selects_caches_by_checkpoint() {
    let peer = MockPeer::start(address_type::LIVE).await;
    let old = boards("old", 1);
    let new = boards("new", 1);
    peer.serve(
        "GET",
        "c0/boards/index.json",
        index_page(&[("old", 0, 1_000), ("new", 1_000, 2_000)], 2_500),
    );
    peer.serve("GET", "c0/boards/old/0.json", cache_page(&old, 0, 1, 1_000));
    peer.serve("GET", "c0/boards/new/0.json", cache_page(&new, 0, 1, 2_000));

    let resp = transport(100)
        .walk_endpoint(&peer.address().key(), Endpoint::Content(EntityKind::Board), 1_500)
        .await
        .unwrap();
    assert_eq!(resp.body.boards.len(), 1);
    assert_eq!(resp.body.boards[0].name, "new-0");
    assert_eq!(resp.most_recent_source_timestamp, 2_500);
    assert!(!peer.requested("GET", "c0/boards/old/0.json"));
}

#[tokio::test]
async fn test_walk_live_follows_result_links() {
    let peer = MockPeer::start(address_type::LIVE).await;
    let inline = boards("inline", 1);
    let linked = boards("linked", 2);

    let mut reply = page_of(&inline, 3_000);
    reply.results = index_page(&[("stale", 0, 100), ("fresh", 100, 3_000)], 0).results;
    peer.serve("POST", "c0/boards", reply);
    peer.serve("GET", "responses/fresh/0.json", cache_page(&linked, 0, 1, 3_000));

    let local = tempfile::TempDir::new().unwrap();
    let node = common::LocalNode::new(local.path());
    let request = node.identity.delta_request("c0/boards", 100);

    let resp = transport(100)
        .walk_live(
            &peer.address().key(),
            Endpoint::Content(EntityKind::Board),
            &request,
            100,
        )
        .await
        .unwrap();
    assert_eq!(resp.body.boards.len(), 3);
    assert!(peer.requested("GET", "responses/fresh/0.json"));
    assert!(!peer.requested("GET", "responses/stale/0.json"));
}

// =============================================================================
// Queries by fingerprint
// =============================================================================

#[tokio::test]
async fn test_query_resolves_page_through_index() {
    let peer = MockPeer::start(address_type::LIVE).await;
    let target = board("target", 1_500);
    let other = board("other", 1_400);

    peer.serve(
        "GET",
        "c0/boards/index.json",
        index_page(&[("early", 0, 1_000), ("late", 1_000, 2_000)], 2_000),
    );
    let mut index = cache_page(&[], 0, 1, 2_000);
    index.response.boards_index = vec![aether_node::api::IndexEntry {
        fingerprint: target.fingerprint().to_string(),
        creation: 1_500,
        last_update: 0,
        page_number: 3,
    }];
    peer.serve("GET", "c0/boards/late/index/0.json", index);
    peer.serve("GET", "c0/boards/late/3.json", cache_page(&[other, target.clone()], 3, 4, 2_000));

    let resp = transport(100)
        .query(
            &peer.address().key(),
            EntityKind::Board,
            target.fingerprint(),
            1_500,
            0,
        )
        .await
        .unwrap();

    assert_eq!(resp.body.entities(), vec![target]);
    assert!(!peer.requested("GET", "c0/boards/early/index/0.json"));
    assert!(!peer.requested("GET", "c0/boards/late/0.json"));
}

#[tokio::test]
async fn test_query_scans_cache_without_index() {
    let peer = MockPeer::start(address_type::LIVE).await;
    let target = board("scanned", 500);
    peer.serve("GET", "c0/boards/index.json", index_page(&[("only", 0, 1_000)], 1_000));
    peer.serve("GET", "c0/boards/only/0.json", cache_page(&boards("filler", 2), 0, 2, 1_000));
    peer.serve("GET", "c0/boards/only/1.json", cache_page(&[target.clone()], 1, 2, 1_000));

    let resp = transport(100)
        .query(&peer.address().key(), EntityKind::Board, target.fingerprint(), 0, 0)
        .await
        .unwrap();
    assert_eq!(resp.body.boards.len(), 1);
    assert_eq!(resp.body.boards[0].name, "scanned");
}
