//! Session lifecycle tests driven directly against `SessionManager`
//!
//! Run with: cargo test -p roomcast-server --test session_tests

mod common;

use common::*;
use roomcast_protocol::{ConsumerType, ErrorKind, MediaKind, ProducerInfo, Role, ServerMessage};
use roomcast_server::engine::InProcessEngine;
use std::sync::atomic::Ordering;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_host_producer_is_replayed_to_late_viewer() {
    let (manager, notifier) = manager().await;

    let (_, producer_id) = host_with_video(&manager, "r1", "host").await;

    let joined = assert_ok!(manager.join("r1", "viewer", Role::Viewer).await);
    assert!(joined.send_transport_options.is_none());
    assert_eq!(joined.peer_ids, vec!["host"]);
    assert_eq!(joined.viewers, vec!["viewer"]);
    assert_eq!(
        joined.existing_producers,
        vec![ProducerInfo {
            producer_id: producer_id.clone(),
            peer_id: "host".to_string(),
            kind: MediaKind::Video,
        }]
    );

    let host_messages = notifier.messages_for("host");
    assert_eq!(
        host_messages,
        vec![
            ServerMessage::NewPeer {
                peer_id: "viewer".to_string()
            },
            ServerMessage::ViewersUpdated {
                viewers: vec!["viewer".to_string()]
            },
        ]
    );

    let recv = joined.recv_transport_options;
    assert_ok!(manager.connect_transport("r1", "viewer", &recv.id, dtls()).await);

    let consumer = assert_ok!(
        manager
            .consume("r1", "viewer", &producer_id, client_capabilities(), &recv.id)
            .await
    );
    assert_eq!(consumer.kind, MediaKind::Video);
    assert_eq!(consumer.producer_id, producer_id);
    // Video producers carry the three-layer ladder
    assert_eq!(consumer.consumer_type, ConsumerType::Simulcast);
    assert_eq!(consumer.rtp_parameters.encodings[0].max_bitrate, Some(900_000));
    assert!(!consumer.producer_paused);

    let summary = manager.room_summary("r1").await.unwrap();
    assert_eq!(summary.host_peer_id.as_deref(), Some("host"));
    assert_eq!(summary.peer_ids, vec!["host", "viewer"]);
    assert_eq!(summary.producer_count, 1);
}

#[tokio::test]
async fn test_new_producer_is_announced_to_other_members() {
    let (manager, notifier) = manager().await;

    let joined = manager.join("r1", "host", Role::Host).await.unwrap();
    manager.join("r1", "viewer", Role::Viewer).await.unwrap();
    notifier.clear();

    let send = joined.send_transport_options.unwrap();
    manager
        .connect_transport("r1", "host", &send.id, dtls())
        .await
        .unwrap();
    let producer_id = manager
        .produce("r1", "host", &send.id, MediaKind::Audio, opus_parameters())
        .await
        .unwrap();

    assert_eq!(
        notifier.messages_for("viewer"),
        vec![ServerMessage::NewProducer {
            producer_id,
            peer_id: "host".to_string(),
            kind: MediaKind::Audio,
        }]
    );
    assert!(notifier.messages_for("host").is_empty());
}

#[tokio::test]
async fn test_stop_camera_detaches_viewer_consumers() {
    let (manager, notifier) = manager().await;

    let (_, producer_id) = host_with_video(&manager, "r1", "host").await;
    let recv_id = connected_viewer(&manager, "r1", "viewer").await;
    manager
        .consume("r1", "viewer", &producer_id, client_capabilities(), &recv_id)
        .await
        .unwrap();
    notifier.clear();

    let closed = assert_ok!(manager.stop_camera("r1", "host").await);
    assert_eq!(closed, vec![producer_id.clone()]);

    assert_eq!(
        notifier.messages_for("viewer"),
        vec![ServerMessage::ProducerClosed {
            producer_id: producer_id.clone(),
            peer_id: "host".to_string(),
        }]
    );

    let room = manager.get_room("r1").await.unwrap();
    let state = room.read().await;
    assert_eq!(state.peer("viewer").unwrap().consumer_count(), 0);
    assert!(state.peer("host").unwrap().producer_ids().is_empty());
    assert!(state.producer_list().is_empty());
    drop(state);

    // The host stays in the room and can publish again
    assert_eq!(manager.room_summary("r1").await.unwrap().peer_ids.len(), 2);
    let err = manager
        .consume("r1", "viewer", &producer_id, client_capabilities(), &recv_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_host_leave_closes_producers_before_peer_left() {
    let (manager, notifier) = manager().await;

    let (_, producer_id) = host_with_video(&manager, "r1", "host").await;
    let recv_id = connected_viewer(&manager, "r1", "viewer").await;
    manager
        .consume("r1", "viewer", &producer_id, client_capabilities(), &recv_id)
        .await
        .unwrap();
    notifier.clear();

    assert_eq!(manager.leave("host").await.as_deref(), Some("r1"));

    assert_eq!(
        notifier.messages_for("viewer"),
        vec![
            ServerMessage::ProducerClosed {
                producer_id,
                peer_id: "host".to_string(),
            },
            ServerMessage::PeerLeft {
                peer_id: "host".to_string()
            },
            ServerMessage::ViewersUpdated {
                viewers: vec!["viewer".to_string()]
            },
        ]
    );

    let room = manager.get_room("r1").await.unwrap();
    let state = room.read().await;
    assert_eq!(state.host_peer_id(), None);
    assert_eq!(state.peer("viewer").unwrap().consumer_count(), 0);
    drop(state);

    // A new host may take over once the old one is gone
    assert_ok!(manager.join("r1", "host2", Role::Host).await);
}

#[tokio::test]
async fn test_last_leave_removes_room_and_releases_router() {
    let (manager, _notifier) = manager().await;

    manager.join("r1", "host", Role::Host).await.unwrap();
    manager.join("r1", "viewer", Role::Viewer).await.unwrap();
    let router = manager.get_room("r1").await.unwrap().router().clone();
    assert_eq!(manager.pool().loads(), vec![1]);

    manager.leave("viewer").await;
    assert_eq!(manager.room_count().await, 1);

    manager.leave("host").await;
    assert_eq!(manager.room_count().await, 0);
    assert!(manager.get_room("r1").await.is_none());
    assert!(router.closed());
    assert_eq!(manager.pool().loads(), vec![0]);
    assert_eq!(manager.peer_room("host").await, None);

    // Leaving twice is a no-op
    assert_eq!(manager.leave("host").await, None);
}

#[tokio::test]
async fn test_concurrent_first_joins_share_one_router() {
    let (manager, _notifier) = manager().await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            manager
                .join("busy", &format!("peer-{}", i), Role::Viewer)
                .await
        }));
    }

    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    assert_eq!(manager.room_count().await, 1);
    assert_eq!(manager.pool().loads(), vec![1]);
    assert_eq!(manager.room_summary("busy").await.unwrap().peer_ids.len(), 8);
}

#[tokio::test]
async fn test_concurrent_leaves_notify_once() {
    let (manager, notifier) = manager().await;

    manager.join("r1", "a", Role::Viewer).await.unwrap();
    manager.join("r1", "b", Role::Viewer).await.unwrap();
    notifier.clear();

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.leave("a").await }
    });
    let second = tokio::spawn({
        let manager = manager.clone();
        async move { manager.leave("a").await }
    });

    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);

    let peer_left = notifier
        .messages_for("b")
        .into_iter()
        .filter(|m| matches!(m, ServerMessage::PeerLeft { .. }))
        .count();
    assert_eq!(peer_left, 1);
}

#[tokio::test]
async fn test_slow_room_creation_does_not_block_other_rooms() {
    let engine = FaultyEngine::new();
    let (manager, _notifier) = manager_on(&engine, 1).await;

    engine.faults.hold_router.store(true, Ordering::SeqCst);
    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.join("r1", "a", Role::Host).await }
    });
    let second = tokio::spawn({
        let manager = manager.clone();
        async move { manager.join("r1", "b", Role::Viewer).await }
    });
    engine.faults.router_entered.notified().await;

    // r1 is still waiting on its router
    assert_ok!(manager.join("r2", "c", Role::Host).await);
    assert!(manager.get_room("r1").await.is_none());
    assert_eq!(manager.room_count().await, 1);

    engine.faults.router_release.notify_one();
    assert_ok!(first.await.unwrap());
    assert_ok!(second.await.unwrap());

    assert_eq!(manager.room_count().await, 2);
    assert_eq!(manager.pool().loads(), vec![2]);
    let summary = manager.room_summary("r1").await.unwrap();
    assert_eq!(summary.peer_ids.len(), 2);
}

#[tokio::test]
async fn test_second_host_is_rejected() {
    let (manager, _notifier) = manager().await;

    manager.join("r1", "host", Role::Host).await.unwrap();
    let err = manager.join("r1", "usurper", Role::Host).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    let summary = manager.room_summary("r1").await.unwrap();
    assert_eq!(summary.host_peer_id.as_deref(), Some("host"));
    assert_eq!(summary.peer_ids, vec!["host"]);

    // The rejected id holds no reservation
    assert_eq!(manager.peer_room("usurper").await, None);
    assert_ok!(manager.join("r1", "usurper", Role::Viewer).await);
}

#[tokio::test]
async fn test_peer_id_lives_in_one_room_only() {
    let (manager, _notifier) = manager().await;

    manager.join("r1", "alice", Role::Viewer).await.unwrap();
    let err = manager.join("r2", "alice", Role::Viewer).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    // The failed join must not leave an empty room behind
    assert!(manager.get_room("r2").await.is_none());
    assert_eq!(manager.peer_room("alice").await.as_deref(), Some("r1"));

    let err = manager.join("", "bob", Role::Viewer).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_incompatible_capabilities_create_nothing() {
    let (manager, _notifier) = manager().await;

    let (_, producer_id) = host_with_video(&manager, "r1", "host").await;
    let recv_id = connected_viewer(&manager, "r1", "viewer").await;

    let err = manager
        .consume("r1", "viewer", &producer_id, audio_only_capabilities(), &recv_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Incompatible);

    let room = manager.get_room("r1").await.unwrap();
    assert_eq!(room.read().await.peer("viewer").unwrap().consumer_count(), 0);
}

#[tokio::test]
async fn test_duplicate_consume_is_rejected() {
    let (manager, _notifier) = manager().await;

    let (_, producer_id) = host_with_video(&manager, "r1", "host").await;
    let recv_id = connected_viewer(&manager, "r1", "viewer").await;

    assert_ok!(
        manager
            .consume("r1", "viewer", &producer_id, client_capabilities(), &recv_id)
            .await
    );
    let err = manager
        .consume("r1", "viewer", &producer_id, client_capabilities(), &recv_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let (manager, _notifier) = manager().await;

    let err = manager
        .connect_transport("missing", "alice", "t1", dtls())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let joined = manager.join("r1", "alice", Role::Host).await.unwrap();
    let send = joined.send_transport_options.unwrap();

    let err = manager
        .connect_transport("r1", "alice", "no-such-transport", dtls())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = manager
        .connect_transport("r1", "bob", &send.id, dtls())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = manager
        .consume("r1", "alice", "no-such-producer", client_capabilities(), &send.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert_err!(manager.stop_camera("r1", "bob").await);
}

#[tokio::test]
async fn test_produce_requires_connected_send_transport() {
    let (manager, _notifier) = manager().await;

    let joined = manager.join("r1", "host", Role::Host).await.unwrap();
    let send = joined.send_transport_options.unwrap();
    let recv = joined.recv_transport_options;

    let err = manager
        .produce("r1", "host", &send.id, MediaKind::Video, vp8_parameters())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    manager
        .connect_transport("r1", "host", &recv.id, dtls())
        .await
        .unwrap();
    let err = manager
        .produce("r1", "host", &recv.id, MediaKind::Video, vp8_parameters())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);

    // Connecting twice is refused
    let err = manager
        .connect_transport("r1", "host", &recv.id, dtls())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
}

#[tokio::test]
async fn test_engine_rejection_surfaces_as_engine_failure() {
    let (manager, _notifier) = manager().await;

    let joined = manager.join("r1", "host", Role::Host).await.unwrap();
    let send = joined.send_transport_options.unwrap();
    manager
        .connect_transport("r1", "host", &send.id, dtls())
        .await
        .unwrap();

    // Audio kind with a video codec
    let err = manager
        .produce("r1", "host", &send.id, MediaKind::Audio, vp8_parameters())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineFailure);
    assert_eq!(manager.room_summary("r1").await.unwrap().producer_count, 0);
}

#[tokio::test]
async fn test_failed_transport_creation_rolls_back_join() {
    let engine = FaultyEngine::new();
    let (manager, notifier) = manager_on(&engine, 1).await;

    engine.faults.fail_recv_transport.store(true, Ordering::SeqCst);
    let err = manager.join("r1", "host", Role::Host).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineFailure);

    // The send transport created before the failure is closed again
    let transports = engine.faults.transports.lock().unwrap().clone();
    assert_eq!(transports.len(), 1);
    assert!(transports[0].closed());

    assert!(manager.get_room("r1").await.is_none());
    assert_eq!(manager.pool().loads(), vec![0]);
    assert_eq!(manager.peer_room("host").await, None);
    assert!(notifier.messages_for("host").is_empty());

    engine.faults.fail_recv_transport.store(false, Ordering::SeqCst);
    assert_ok!(manager.join("r1", "host", Role::Host).await);
}

#[tokio::test]
async fn test_leave_during_join_is_not_announced() {
    let engine = FaultyEngine::new();
    let (manager, notifier) = manager_on(&engine, 1).await;

    manager.join("r1", "host", Role::Host).await.unwrap();
    notifier.clear();

    engine.faults.hold_transport.store(true, Ordering::SeqCst);
    let pending = tokio::spawn({
        let manager = manager.clone();
        async move { manager.join("r1", "viewer", Role::Viewer).await }
    });

    engine.faults.transport_entered.notified().await;
    assert_eq!(manager.leave("viewer").await.as_deref(), Some("r1"));
    engine.faults.transport_release.notify_one();

    let err = assert_err!(pending.await.unwrap());
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // The host never heard of the viewer, in either direction
    assert!(notifier.messages_for("host").is_empty());

    let transports = engine.faults.transports.lock().unwrap().clone();
    assert_eq!(transports.len(), 3);
    assert!(transports[2].closed());
    assert_eq!(
        manager.room_summary("r1").await.unwrap().peer_ids,
        vec!["host".to_string()]
    );
    assert_eq!(manager.peer_room("viewer").await, None);
}

#[tokio::test]
async fn test_disconnect_during_produce_registers_nothing() {
    let engine = FaultyEngine::new();
    let (manager, notifier) = manager_on(&engine, 1).await;

    let joined = manager.join("r1", "host", Role::Host).await.unwrap();
    manager.join("r1", "viewer", Role::Viewer).await.unwrap();
    let send = joined.send_transport_options.unwrap();
    manager
        .connect_transport("r1", "host", &send.id, dtls())
        .await
        .unwrap();
    notifier.clear();

    engine.faults.hold_produce.store(true, Ordering::SeqCst);
    let pending = tokio::spawn({
        let manager = manager.clone();
        let transport_id = send.id.clone();
        async move {
            manager
                .produce("r1", "host", &transport_id, MediaKind::Video, vp8_parameters())
                .await
        }
    });

    engine.faults.produce_entered.notified().await;
    assert_eq!(manager.leave("host").await.as_deref(), Some("r1"));
    engine.faults.produce_release.notify_one();

    let err = pending.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let producers = engine.faults.producers.lock().unwrap().clone();
    assert_eq!(producers.len(), 1);
    assert!(producers[0].closed());

    assert_eq!(manager.room_summary("r1").await.unwrap().producer_count, 0);
    let announced = notifier
        .messages_for("viewer")
        .into_iter()
        .any(|m| matches!(m, ServerMessage::NewProducer { .. }));
    assert!(!announced);
}

#[tokio::test]
async fn test_rooms_spread_over_workers() {
    let engine = InProcessEngine::default();
    let (manager, _notifier) = manager_on(&engine, 2).await;

    manager.join("a", "p1", Role::Viewer).await.unwrap();
    manager.join("b", "p2", Role::Viewer).await.unwrap();
    assert_eq!(manager.pool().loads(), vec![1, 1]);

    let summaries = manager.room_summaries().await;
    let ids: Vec<_> = summaries.iter().map(|s| s.room_id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let (manager, _notifier) = manager().await;

    let (send, _) = host_with_video(&manager, "r1", "host").await;
    manager.join("r2", "other", Role::Viewer).await.unwrap();
    let router = manager.get_room("r1").await.unwrap().router().clone();

    manager.shutdown().await;

    assert_eq!(manager.room_count().await, 0);
    assert!(router.closed());
    assert_eq!(manager.pool().loads(), vec![0]);
    assert_eq!(manager.peer_room("host").await, None);

    let err = manager.join("r3", "late", Role::Viewer).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineUnavailable);
    let err = manager
        .produce("r1", "host", &send.id, MediaKind::Video, vp8_parameters())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
