use std::sync::Arc;
use std::time::Duration;

use signal_core::endpoint::Tx;
use signal_core::registry::Registry;
use signal_core::router::SignalingRouter;

fn new_router() -> (Arc<SignalingRouter>, Arc<Registry>) {
    let registry = Arc::new(Registry::new());
    let router = Arc::new(SignalingRouter::new(registry.clone()));
    (router, registry)
}

async fn recv_text(rx: &mut signal_core::endpoint::Rx) -> String {
    match tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("expected a message before timeout")
        .expect("channel closed unexpectedly")
    {
        signal_core::endpoint::Signal::Body(body) => body,
        signal_core::endpoint::Signal::Close => panic!("unexpected close signal"),
    }
}

/// scenario 1: basic rendezvous — host creates, client joins, negotiation
/// payload flows client -> host with `fromId` stamped.
#[tokio::test]
async fn basic_rendezvous() {
    let (router, _registry) = new_router();

    let (host_tx, mut host_rx) = Tx::new_pair();
    router
        .on_text("A", &host_tx, r#"{"type":"create_session","sessionId":"S1"}"#)
        .await;
    assert!(recv_text(&mut host_rx).await.contains("session_created"));

    let (client_tx, mut client_rx) = Tx::new_pair();
    router
        .on_text("B", &client_tx, r#"{"type":"join","sessionId":"S1"}"#)
        .await;
    assert!(recv_text(&mut client_rx).await.contains("\"joined\""));

    let peer_joined = recv_text(&mut host_rx).await;
    assert!(peer_joined.contains("peer_joined"));
    assert!(peer_joined.contains("\"peerId\":\"B\""));

    router
        .on_text("B", &client_tx, r#"{"type":"offer","sessionId":"S1","sdp":"X"}"#)
        .await;
    let forwarded = recv_text(&mut host_rx).await;
    assert!(forwarded.contains("\"fromId\":\"B\""));
    assert!(forwarded.contains("\"sdp\":\"X\""));
}

/// scenario 2: host conflict — a second host attempt is rejected, the
/// original host keeps its seat.
#[tokio::test]
async fn host_conflict_rejects_second_host() {
    let (router, registry) = new_router();

    let (host_tx, mut host_rx) = Tx::new_pair();
    router.on_text("A", &host_tx, r#"{"type":"host","sessionId":"S1"}"#).await;
    recv_text(&mut host_rx).await;

    let (other_tx, mut other_rx) = Tx::new_pair();
    router.on_text("C", &other_tx, r#"{"type":"host","sessionId":"S1"}"#).await;
    let reply = recv_text(&mut other_rx).await;
    assert!(reply.contains("\"kind\":\"host_conflict\""));

    let (sid, role) = registry.attachment_of("A").await.unwrap();
    assert_eq!(sid, "s1");
    assert!(role.is_host());
}

/// scenario 3: host departure and return — the client is told the host
/// left, then that it (re)joined, and the session's age survives the gap.
#[tokio::test]
async fn host_departure_and_return_preserves_age() {
    let (router, registry) = new_router();

    let (host_tx, mut host_rx) = Tx::new_pair();
    router.on_text("A", &host_tx, r#"{"type":"host","sessionId":"S1"}"#).await;
    recv_text(&mut host_rx).await;

    let (client_tx, mut client_rx) = Tx::new_pair();
    router.on_text("B", &client_tx, r#"{"type":"join","sessionId":"S1"}"#).await;
    recv_text(&mut client_rx).await;

    router.depart("A").await;
    let disconnected = recv_text(&mut client_rx).await;
    assert!(disconnected.contains("host_disconnected"));

    let before = registry.lookup("S1").await.unwrap();
    assert!(!before.has_host);

    router.on_text("A", &host_tx, r#"{"type":"host","sessionId":"S1"}"#).await;
    recv_text(&mut host_rx).await;
    let rejoined = recv_text(&mut client_rx).await;
    assert!(rejoined.contains("peer_joined"));
    assert!(rejoined.contains("\"isHost\":true"));

    let after = registry.lookup("S1").await.unwrap();
    assert!(after.has_host);
}

/// scenario 4: a session with no participants is reclaimed once it ages
/// past the threshold, and disappears from `query_session`.
#[tokio::test]
async fn reap_removes_aged_empty_session() {
    let (router, registry) = new_router();

    let (host_tx, mut host_rx) = Tx::new_pair();
    router.on_text("A", &host_tx, r#"{"type":"host","sessionId":"S2"}"#).await;
    recv_text(&mut host_rx).await;
    router.depart("A").await;

    let reclaimed = registry.reap(Duration::from_secs(0)).await;
    assert_eq!(reclaimed, vec!["s2".to_string()]);

    let (probe_tx, mut probe_rx) = Tx::new_pair();
    router
        .on_text("D", &probe_tx, r#"{"type":"query_session","sessionId":"S2"}"#)
        .await;
    let response = recv_text(&mut probe_rx).await;
    assert!(response.contains("\"found\":false"));
}

/// scenario 6: broadcast fans out to every other participant and never
/// echoes back to its sender, whether the sender is host or a client.
#[tokio::test]
async fn broadcast_excludes_sender_only() {
    let (router, _registry) = new_router();

    let (host_tx, mut host_rx) = Tx::new_pair();
    router.on_text("A", &host_tx, r#"{"type":"host","sessionId":"S1"}"#).await;
    recv_text(&mut host_rx).await;

    let mut clients = Vec::new();
    for id in ["B", "C", "D"] {
        let (tx, mut rx) = Tx::new_pair();
        router.on_text(id, &tx, r#"{"type":"join","sessionId":"S1"}"#).await;
        recv_text(&mut rx).await;
        recv_text(&mut host_rx).await;
        clients.push((id, tx, rx));
    }

    router
        .on_text("A", &host_tx, r#"{"type":"broadcast","sessionId":"S1","data":"D"}"#)
        .await;

    for (id, _tx, rx) in clients.iter_mut() {
        let body = recv_text(rx).await;
        assert!(body.contains("\"fromId\":\"A\""), "client {id} should see broadcast");
    }

    assert!(
        tokio::time::timeout(Duration::from_millis(50), host_rx.recv())
            .await
            .is_err(),
        "host must not receive its own broadcast"
    );
}

/// update_password is host-only, forwarded to clients, and reflected back
/// through query_session.
#[tokio::test]
async fn password_update_is_host_only_and_propagates() {
    let (router, registry) = new_router();

    let (host_tx, mut host_rx) = Tx::new_pair();
    router.on_text("A", &host_tx, r#"{"type":"host","sessionId":"S1"}"#).await;
    recv_text(&mut host_rx).await;

    let (client_tx, mut client_rx) = Tx::new_pair();
    router.on_text("B", &client_tx, r#"{"type":"join","sessionId":"S1"}"#).await;
    recv_text(&mut client_rx).await;
    recv_text(&mut host_rx).await;

    router
        .on_text("B", &client_tx, r#"{"type":"update_password","sessionId":"S1","password":"hunter2"}"#)
        .await;
    let rejected = recv_text(&mut client_rx).await;
    assert!(rejected.contains("\"kind\":\"not_host\""));

    router
        .on_text("A", &host_tx, r#"{"type":"update_password","sessionId":"S1","password":"hunter2"}"#)
        .await;
    let notice = recv_text(&mut client_rx).await;
    assert!(notice.contains("password_updated"));
    let confirmed = recv_text(&mut host_rx).await;
    assert!(confirmed.contains("password_update_confirmed"));

    let summary = registry.lookup("S1").await.unwrap();
    assert!(summary.password_protected);
}

/// `settings` supplied at `create_session` is opaque to the core but still
/// echoed back through `query_session`'s summary.
#[tokio::test]
async fn query_session_echoes_settings() {
    let (router, _registry) = new_router();

    let (host_tx, mut host_rx) = Tx::new_pair();
    router
        .on_text(
            "A",
            &host_tx,
            r#"{"type":"create_session","sessionId":"S1","settings":{"resolution":"1080p"}}"#,
        )
        .await;
    recv_text(&mut host_rx).await;

    let (probe_tx, mut probe_rx) = Tx::new_pair();
    router
        .on_text("Z", &probe_tx, r#"{"type":"query_session","sessionId":"S1"}"#)
        .await;
    let response = recv_text(&mut probe_rx).await;
    assert!(response.contains("\"resolution\":\"1080p\""));
}

/// a message from an endpoint that never attached is rejected.
#[tokio::test]
async fn fresh_endpoint_cannot_route() {
    let (router, _registry) = new_router();

    let (tx, mut rx) = Tx::new_pair();
    router
        .on_text("Z", &tx, r#"{"type":"offer","sessionId":"S1","sdp":"X"}"#)
        .await;
    let reply = recv_text(&mut rx).await;
    assert!(reply.contains("\"kind\":\"not_in_session\""));
}
