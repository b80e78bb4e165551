//! Connection lifecycle behaviour of `ConnectionManager`, driven through a
//! scripted protocol engine on paused tokio time.

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::time::{timeout, Instant};

use ob_auth_store::{AuthValue, CredentialPatch, KeyUpdates};
use ob_bridge::{
    BridgeEvent, ConnectionPhase, DisconnectReason, ProtocolSession, RestoreSummary, SessionEvent,
};

use common::{harness, stored_credentials, wait_until, Harness, OpenCall};

async fn next_event(rx: &mut broadcast::Receiver<BridgeEvent>) -> BridgeEvent {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event within 5s")
        .expect("channel closed")
}

async fn expect_disconnected(rx: &mut broadcast::Receiver<BridgeEvent>) -> DisconnectReason {
    loop {
        if let BridgeEvent::Disconnected { reason, .. } = next_event(rx).await {
            return reason;
        }
    }
}

/// Initialize and drive the session to `open`.
async fn connect(h: &Harness, org: &str) -> OpenCall {
    let mut rx = h.manager.subscribe(org);
    assert!(h.manager.initialize_connection(org, "user-1").await);
    let call = h.engine.last(org);
    call.open(&format!("1555000{org}@s.whatsapp.net")).await;
    loop {
        if let BridgeEvent::Connected { .. } = next_event(&mut rx).await {
            return call;
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Initialize / pairing / open
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(start_paused = true)]
async fn first_initialize_creates_baseline_and_publishes_pairing_code() {
    let h = harness();
    let mut rx = h.manager.subscribe("org1");

    assert!(h.manager.initialize_connection("org1", "user-1").await);
    assert_eq!(h.engine.opens(), 1);
    let row = h.repo.fetch_now("org1").unwrap();
    assert!(!row.is_connected);

    let call = h.engine.last("org1");
    assert!(call.credentials.is_complete());
    call.emit(SessionEvent::Pairing {
        code: "2@pairing-token,abc,def".into(),
    })
    .await;

    match next_event(&mut rx).await {
        BridgeEvent::PairingCode { org_id, qr } => {
            assert_eq!(org_id, "org1");
            assert!(qr.starts_with("data:image/svg+xml;base64,"));
        }
        other => panic!("unexpected {other:?}"),
    }

    let info = h.manager.get_connection_info("org1").await;
    assert_eq!(info.phase, ConnectionPhase::Pairing);
    assert!(info.pairing_code.is_some());
    assert!(!info.is_connected);
    // Pairing tokens are never persisted.
    let row = h.repo.fetch_now("org1").unwrap();
    assert!(!row.auth_credentials.unwrap().contains("pairing-token"));
}

#[tokio::test(start_paused = true)]
async fn initialize_while_in_progress_does_not_open_twice() {
    let h = harness();
    let (a, b) = tokio::join!(
        h.manager.initialize_connection("org1", "user-1"),
        h.manager.initialize_connection("org1", "user-2"),
    );
    assert!(a && b);
    assert!(h.manager.initialize_connection("org1", "user-3").await);
    assert_eq!(h.engine.opens(), 1);
    assert_eq!(h.manager.registry().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn open_marks_connected_and_persists() {
    let h = harness();
    let call = connect(&h, "org1").await;

    assert!(h.manager.is_connected("org1").await);
    let row = h.repo.fetch_now("org1").unwrap();
    assert!(row.is_connected);
    assert_eq!(row.connected_identifier.as_deref(), Some("1555000org1@s.whatsapp.net"));
    assert!(row.last_connected_at.is_some());

    let info = h.manager.get_connection_info("org1").await;
    assert_eq!(info.phase, ConnectionPhase::Connected);
    assert!(info.pairing_code.is_none());
    assert_eq!(info.reconnect_attempts, 0);

    // Already connected: no second session.
    assert!(h.manager.initialize_connection("org1", "user-1").await);
    assert_eq!(h.engine.opens(), 1);
    assert!(!call.session.is_closed());
}

#[tokio::test(start_paused = true)]
async fn credential_updates_are_merged_in_order() {
    let h = harness();
    let call = connect(&h, "org1").await;

    let mut me = BTreeMap::new();
    me.insert("id".to_string(), AuthValue::from("15551234567:3@s.whatsapp.net"));
    let mut first = CredentialPatch::new();
    first.insert("me".into(), AuthValue::Object(me));
    let mut second = CredentialPatch::new();
    second.insert("platform".into(), AuthValue::from("web"));

    call.emit(SessionEvent::CredentialsUpdate(first)).await;
    call.emit(SessionEvent::CredentialsUpdate(second)).await;

    let mut merged = None;
    for _ in 0..100 {
        let creds = h.store.credentials("org1").await.unwrap().unwrap();
        if creds.get("platform").is_some() {
            merged = Some(creds);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let merged = merged.expect("credential updates not persisted");
    assert_eq!(merged.linked_identity(), Some("15551234567:3@s.whatsapp.net"));
    for field in ["noiseKey", "signedIdentityKey", "signedPreKey", "registrationId"] {
        assert_eq!(merged.get(field), call.credentials.get(field));
    }
}

#[tokio::test(start_paused = true)]
async fn failed_open_returns_false() {
    let h = harness();
    h.engine.fail_org("org1");
    assert!(!h.manager.initialize_connection("org1", "user-1").await);
    assert!(h.manager.registry().is_empty());
    assert_eq!(h.manager.pending_reconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn stale_entry_is_purged_and_its_events_dropped() {
    let h = harness();
    assert!(h.manager.initialize_connection("org1", "user-1").await);
    let first = h.engine.last("org1");
    first.session.kill();

    assert!(h.manager.initialize_connection("org1", "user-1").await);
    assert_eq!(h.engine.opens(), 2);
    assert!(wait_until(Duration::from_secs(1), || first.events.is_closed()).await);

    let second = h.engine.last("org1");
    second.open("15550001111@s.whatsapp.net").await;
    assert!(wait_until(Duration::from_secs(1), || h.manager.registry().get("org1").is_some_and(|s| s.is_connected)).await);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Close classification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(start_paused = true)]
async fn temporary_close_reconnects_and_keeps_auth_state() {
    let h = harness();
    let call = connect(&h, "org1").await;

    let mut updates = KeyUpdates::new();
    updates
        .entry("session".into())
        .or_default()
        .insert("peer.0".into(), Some(AuthValue::Bytes(vec![0, 255, 7, 42])));
    call.key_store.set(updates).await.unwrap();
    let before = stored_credentials(&h.repo, "org1").unwrap();

    call.close(Some(428), "connection lost").await;
    assert!(wait_until(Duration::from_secs(1), || !h.manager.registry().contains("org1")).await);
    assert!(call.session.is_closed());
    assert_eq!(h.manager.pending_reconnects(), 1);
    assert_eq!(
        h.manager.get_connection_info("org1").await.phase,
        ConnectionPhase::Reconnecting
    );

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(h.engine.opens(), 1);
    assert!(wait_until(Duration::from_secs(2), || h.engine.opens() == 2).await);

    let second = h.engine.last("org1");
    assert_eq!(second.credentials, call.credentials);
    assert_eq!(stored_credentials(&h.repo, "org1").unwrap(), before);
    let keys = second.key_store.get("session", &["peer.0".to_string()]).await;
    assert_eq!(keys["peer.0"].as_bytes(), Some(&[0u8, 255, 7, 42][..]));
    // The persisted flag survives the reconnect window.
    assert!(h.repo.fetch_now("org1").unwrap().is_connected);
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_and_stops_at_attempt_cap() {
    let h = harness();
    let mut rx = h.manager.subscribe("org1");
    let first = connect(&h, "org1").await;

    let mut closed_at = Instant::now();
    first.close(Some(515), "restart required").await;

    let mut gaps = Vec::new();
    for n in 2..=6 {
        assert!(
            wait_until(Duration::from_secs(60), || h.engine.opens() == n).await,
            "open #{n} never happened"
        );
        let call = h.engine.last("org1");
        gaps.push((call.at - closed_at).as_millis());
        closed_at = Instant::now();
        call.close(Some(515), "restart required").await;
    }

    let expected = [3000u128, 6000, 12000, 24000, 48000];
    for (gap, want) in gaps.iter().zip(expected) {
        assert!(*gap >= want && *gap <= want + 20, "gap {gap}ms, expected {want}ms");
    }

    assert_eq!(expect_disconnected(&mut rx).await, DisconnectReason::MaxReconnectAttempts);
    assert!(!h.repo.fetch_now("org1").unwrap().is_connected);
    assert_eq!(h.manager.pending_reconnects(), 0);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.engine.opens(), 6);
}

#[tokio::test(start_paused = true)]
async fn open_resets_reconnect_attempts() {
    let h = harness();
    let first = connect(&h, "org1").await;
    first.close(Some(428), "").await;
    assert!(wait_until(Duration::from_secs(5), || h.engine.opens() == 2).await);

    let second = h.engine.last("org1");
    second.close(Some(428), "").await;
    assert!(wait_until(Duration::from_secs(1), || h.manager.pending_reconnects() == 1).await);
    assert_eq!(h.manager.get_connection_info("org1").await.reconnect_attempts, 2);

    assert!(wait_until(Duration::from_secs(10), || h.engine.opens() == 3).await);
    let third = h.engine.last("org1");
    third.open("15550001111@s.whatsapp.net").await;
    assert!(wait_until(Duration::from_secs(1), || h.manager.registry().get("org1").is_some_and(|s| s.is_connected)).await);
    assert_eq!(h.manager.get_connection_info("org1").await.reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn credential_rejection_wipes_and_restarts_pairing() {
    let h = harness();
    let call = connect(&h, "org1").await;
    let mut rx = h.manager.subscribe("org1");
    let before = stored_credentials(&h.repo, "org1").unwrap();

    let closed_at = Instant::now();
    call.close(Some(401), "Connection Failure").await;
    assert_eq!(expect_disconnected(&mut rx).await, DisconnectReason::CredentialRejected);

    let row = h.repo.fetch_now("org1").unwrap();
    assert!(!row.is_connected);
    assert_ne!(row.auth_credentials.unwrap(), before);

    assert!(wait_until(Duration::from_secs(2), || h.engine.opens() == 2).await);
    let repair = h.engine.last("org1");
    assert!(repair.at - closed_at <= Duration::from_millis(1100));
    assert_ne!(repair.credentials, call.credentials);
    assert_eq!(
        h.store.credentials("org1").await.unwrap(),
        Some(repair.credentials.clone())
    );
    assert!(repair.key_store.is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn repeated_pairing_restarts_back_off_and_give_up() {
    let h = harness();
    let mut rx = h.manager.subscribe("org1");
    let first = connect(&h, "org1").await;

    let mut closed_at = Instant::now();
    first.close(Some(401), "Connection Failure").await;

    let mut gaps = Vec::new();
    for n in 2..=6 {
        assert!(
            wait_until(Duration::from_secs(60), || h.engine.opens() == n).await,
            "re-pair #{n} never happened"
        );
        let call = h.engine.last("org1");
        gaps.push((call.at - closed_at).as_millis());
        closed_at = Instant::now();
        call.close(Some(401), "Connection Failure").await;
    }

    let expected = [1000u128, 6000, 12000, 24000, 48000];
    for (gap, want) in gaps.iter().zip(expected) {
        assert!(*gap >= want && *gap <= want + 20, "gap {gap}ms, expected {want}ms");
    }

    loop {
        match expect_disconnected(&mut rx).await {
            DisconnectReason::CredentialRejected => continue,
            reason => {
                assert_eq!(reason, DisconnectReason::MaxReconnectAttempts);
                break;
            }
        }
    }
    assert_eq!(h.manager.pending_reconnects(), 0);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.engine.opens(), 6);
}

#[tokio::test(start_paused = true)]
async fn handshake_failure_is_reported_as_such() {
    let h = harness();
    let call = connect(&h, "org1").await;
    let mut rx = h.manager.subscribe("org1");

    call.close(None, "noise handshake failed").await;
    assert_eq!(expect_disconnected(&mut rx).await, DisconnectReason::HandshakeFailed);
    assert!(wait_until(Duration::from_secs(2), || h.engine.opens() == 2).await);
}

#[tokio::test(start_paused = true)]
async fn conflict_close_keeps_credentials_and_stops() {
    let h = harness();
    let call = connect(&h, "org1").await;
    let mut rx = h.manager.subscribe("org1");
    let before = stored_credentials(&h.repo, "org1").unwrap();

    call.close(Some(440), "Stream Errored (conflict)").await;
    assert_eq!(expect_disconnected(&mut rx).await, DisconnectReason::ConflictReplaced);

    let row = h.repo.fetch_now("org1").unwrap();
    assert!(!row.is_connected);
    assert_eq!(row.auth_credentials.unwrap(), before);
    assert_eq!(h.manager.pending_reconnects(), 0);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.engine.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn logged_out_and_bad_session_wipe_without_reconnect() {
    for (code, message, reason) in [
        (Some(401), "Connection Failure: logged out", DisconnectReason::LoggedOut),
        (Some(500), "bad session", DisconnectReason::InvalidSession),
    ] {
        let h = harness();
        let call = connect(&h, "org1").await;
        let mut rx = h.manager.subscribe("org1");
        let before = stored_credentials(&h.repo, "org1").unwrap();

        call.close(code, message).await;
        assert_eq!(expect_disconnected(&mut rx).await, reason);

        let row = h.repo.fetch_now("org1").unwrap();
        assert!(!row.is_connected);
        assert_ne!(row.auth_credentials.unwrap(), before);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(h.engine.opens(), 1, "{reason} must not reconnect");
    }
}

#[tokio::test(start_paused = true)]
async fn local_close_without_code_persists_disconnected_only() {
    let h = harness();
    let call = connect(&h, "org1").await;
    let mut rx = h.manager.subscribe("org1");
    let before = stored_credentials(&h.repo, "org1").unwrap();

    call.close(None, "").await;
    assert!(wait_until(Duration::from_secs(1), || !h.repo.fetch_now("org1").unwrap().is_connected).await);

    assert_eq!(stored_credentials(&h.repo, "org1").unwrap(), before);
    assert!(h.manager.registry().is_empty());
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.engine.opens(), 1);
    assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Explicit operations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test(start_paused = true)]
async fn disconnect_logs_out_wipes_and_publishes() {
    let h = harness();
    let call = connect(&h, "org1").await;
    let mut rx = h.manager.subscribe("org1");
    let before = stored_credentials(&h.repo, "org1").unwrap();

    assert!(h.manager.disconnect("org1").await);

    assert_eq!(call.session.logouts.load(Ordering::SeqCst), 1);
    assert!(call.session.is_closed());
    assert!(h.manager.registry().is_empty());
    assert_eq!(expect_disconnected(&mut rx).await, DisconnectReason::LoggedOut);

    let row = h.repo.fetch_now("org1").unwrap();
    assert!(!row.is_connected);
    assert_ne!(row.auth_credentials.unwrap(), before);
    assert!(!h.manager.is_connected("org1").await);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let h = harness();
    let call = connect(&h, "org1").await;
    call.close(Some(428), "connection lost").await;
    assert!(wait_until(Duration::from_secs(1), || h.manager.pending_reconnects() == 1).await);

    assert!(h.manager.disconnect("org1").await);
    assert_eq!(h.manager.pending_reconnects(), 0);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.engine.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_without_session_still_wipes() {
    let h = harness();
    let loaded = h.store.load("org1").await.unwrap();
    assert!(h.manager.disconnect("org1").await);
    let now = h.store.credentials("org1").await.unwrap().unwrap();
    assert_ne!(now, loaded.credentials);
}

#[tokio::test(start_paused = true)]
async fn clear_auth_state_closes_without_logout() {
    let h = harness();
    let call = connect(&h, "org1").await;
    let before = stored_credentials(&h.repo, "org1").unwrap();

    assert!(h.manager.clear_auth_state("org1").await);
    assert!(call.session.is_closed());
    assert_eq!(call.session.logouts.load(Ordering::SeqCst), 0);
    assert!(h.manager.registry().is_empty());
    assert_ne!(stored_credentials(&h.repo, "org1").unwrap(), before);
}

#[tokio::test(start_paused = true)]
async fn cleanup_organization_deletes_row() {
    let h = harness();
    let call = connect(&h, "org1").await;

    assert!(h.manager.cleanup_organization("org1").await);
    assert_eq!(call.session.logouts.load(Ordering::SeqCst), 1);
    assert!(h.repo.fetch_now("org1").is_none());
    assert!(h.manager.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn is_connected_clears_stale_persisted_flag() {
    let h = harness();
    h.store.mark_connected("org1", Some("15550001111")).await.unwrap();

    assert!(!h.manager.is_connected("org1").await);
    let row = h.repo.fetch_now("org1").unwrap();
    assert!(!row.is_connected);
    assert!(row.last_disconnected_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn restore_reopens_persisted_orgs_and_tolerates_failures() {
    let h = harness();
    h.store.load("a").await.unwrap();
    h.store.mark_connected("a", Some("15550000001")).await.unwrap();
    h.store.load("b").await.unwrap();
    h.store.mark_connected("b", Some("15550000002")).await.unwrap();
    h.store.load("c").await.unwrap();
    h.engine.fail_org("b");

    let summary = h.manager.restore_connections().await;
    assert_eq!(
        summary,
        RestoreSummary {
            attempted: 2,
            restored: 1,
            failed: 1
        }
    );
    assert_eq!(h.manager.registry().get("a").unwrap().initiating_user_id, "system");
    assert!(!h.manager.registry().contains("b"));
    assert!(!h.manager.registry().contains("c"));
}

#[tokio::test(start_paused = true)]
async fn shutdown_clears_everything_and_initialize_still_works() {
    let h = harness();
    let a = connect(&h, "a").await;
    let b = connect(&h, "b").await;
    b.close(Some(428), "connection lost").await;
    assert!(wait_until(Duration::from_secs(1), || h.manager.pending_reconnects() == 1).await);

    h.manager.shutdown().await;
    assert_eq!(h.manager.pending_reconnects(), 0);
    assert!(h.manager.registry().is_empty());
    assert!(a.session.is_closed());
    assert!(h.repo.fetch_now("a").unwrap().is_connected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.engine.opens(), 2);

    h.manager.shutdown().await;

    assert!(h.manager.initialize_connection("a", "user-1").await);
    assert_eq!(h.engine.opens(), 3);
    assert_eq!(h.manager.registry().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_close_handling_does_not_reopen() {
    let h = harness();
    let call = connect(&h, "org1").await;
    let gate = Arc::new(Notify::new());
    call.session.hold_close_until(gate.clone());

    call.close(Some(428), "connection lost").await;
    assert!(wait_until(Duration::from_secs(1), || !h.manager.registry().contains("org1")).await);

    let shutdown = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!shutdown.is_finished(), "shutdown must wait for the close in flight");

    gate.notify_one();
    shutdown.await.unwrap();

    assert_eq!(h.manager.pending_reconnects(), 0);
    assert!(h.manager.registry().is_empty());
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.engine.opens(), 1);
    assert!(h.manager.registry().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_pairing_restart_still_wipes_but_does_not_reopen() {
    let h = harness();
    let call = connect(&h, "org1").await;
    let before = stored_credentials(&h.repo, "org1").unwrap();
    let gate = Arc::new(Notify::new());
    call.session.hold_close_until(gate.clone());

    call.close(Some(401), "Connection Failure").await;
    assert!(wait_until(Duration::from_secs(1), || !h.manager.registry().contains("org1")).await);

    let shutdown = {
        let manager = h.manager.clone();
        tokio::spawn(async move { manager.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    gate.notify_one();
    shutdown.await.unwrap();

    assert_ne!(stored_credentials(&h.repo, "org1").unwrap(), before);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.engine.opens(), 1);
    assert_eq!(h.manager.pending_reconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn is_connected_keeps_flag_while_close_is_in_flight() {
    let h = harness();
    let call = connect(&h, "org1").await;
    let gate = Arc::new(Notify::new());
    call.session.hold_close_until(gate.clone());

    call.close(Some(428), "connection lost").await;
    assert!(wait_until(Duration::from_secs(1), || !h.manager.registry().contains("org1")).await);

    // No live session and no timer yet, but the close handler holds the lock.
    assert_eq!(h.manager.pending_reconnects(), 0);
    assert!(!h.manager.is_connected("org1").await);
    assert!(h.repo.fetch_now("org1").unwrap().is_connected);

    gate.notify_one();
    assert!(wait_until(Duration::from_secs(1), || h.manager.pending_reconnects() == 1).await);
    assert!(h.repo.fetch_now("org1").unwrap().is_connected);
}

#[tokio::test(start_paused = true)]
async fn cleanup_forgets_the_organization_lock() {
    let h = harness();
    connect(&h, "a").await;
    connect(&h, "b").await;

    assert!(h.manager.cleanup_organization("a").await);
    assert!(!h.manager.registry().contains("a"));
    assert!(h.manager.is_connected("b").await);

    // A fresh start for the same id behaves like a first initialize.
    assert!(h.manager.initialize_connection("a", "user-2").await);
    assert_eq!(h.manager.registry().get("a").unwrap().initiating_user_id, "user-2");
}

#[tokio::test(start_paused = true)]
async fn organizations_are_independent() {
    let h = harness();
    let a = connect(&h, "a").await;
    let b = connect(&h, "b").await;
    let mut rx_b = h.manager.subscribe("b");

    a.close(Some(440), "replaced").await;
    assert!(wait_until(Duration::from_secs(1), || !h.manager.registry().contains("a")).await);

    assert!(h.manager.is_connected("b").await);
    assert!(!b.session.is_closed());
    assert!(matches!(rx_b.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
}
