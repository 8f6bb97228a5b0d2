//! Full meshes over the in-process room hub and loopback network.
//!
//! Every participant runs a real coordinator; signaling and transport are
//! the `RoomHub` and `LoopbackNetwork` actors. Assertions poll snapshots
//! until the mesh settles.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use peer_session::actors::{CoordinatorState, PresentationEvent, TerminationReason};
use peer_session::config::Config;
use peer_session::hub::{RoomHub, RoomHubHandle};
use peer_session::loopback::{LoopbackNetwork, LoopbackNetworkHandle, SimulatedDevices};
use peer_session::media::{SourceKind, TrackKind};
use peer_session::ports::Ports;
use peer_session::{CoordinatorActor, CoordinatorHandle};
use peer_session_test_utils::*;
use tokio_util::sync::CancellationToken;

struct Mesh {
    hub: RoomHubHandle,
    network: LoopbackNetworkHandle,
    cancel_token: CancellationToken,
}

impl Mesh {
    fn new() -> Self {
        let cancel_token = CancellationToken::new();
        let (hub, _) = RoomHub::spawn(cancel_token.child_token());
        let (network, _) = LoopbackNetwork::spawn(cancel_token.child_token());
        Self {
            hub,
            network,
            cancel_token,
        }
    }

    async fn join(&self, name: &str, devices: SimulatedDevices) -> CoordinatorHandle {
        let signaling = Arc::new(self.hub.open_channel());
        let transport = Arc::new(self.network.endpoint(pid(name)));
        let ports = Ports::new(signaling.clone(), transport.clone(), Arc::new(devices));
        let (handle, _) = CoordinatorActor::spawn(
            Config::default(),
            ports,
            SimulatedDevices::camera_stream(),
            self.cancel_token.child_token(),
        );

        self.hub.attach(&signaling, handle.clone()).await.unwrap();
        self.network
            .attach(&transport, handle.clone())
            .await
            .unwrap();
        handle.join(room("room1")).await.unwrap();
        handle
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Wait until `handle` renders exactly `expected`, in any order.
async fn wait_for_peers(handle: &CoordinatorHandle, expected: &[&str]) {
    let handle = handle.clone();
    let mut expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
    expected.sort();

    eventually("mesh settled", move || {
        let handle = handle.clone();
        let expected = expected.clone();
        async move {
            let Ok(snapshot) = handle.snapshot().await else {
                return false;
            };
            let mut rendered: Vec<String> = snapshot
                .participant_ids()
                .into_iter()
                .map(ToString::to_string)
                .collect();
            rendered.sort();
            rendered == expected && snapshot.sessions.len() == expected.len()
        }
    })
    .await;
}

#[tokio::test]
async fn test_three_party_mesh_connects() {
    let mesh = Mesh::new();
    let alice = mesh.join("alice", SimulatedDevices::new()).await;
    let bob = mesh.join("bob", SimulatedDevices::new()).await;
    let carol = mesh.join("carol", SimulatedDevices::new()).await;

    wait_for_peers(&alice, &["bob", "carol"]).await;
    wait_for_peers(&bob, &["alice", "carol"]).await;
    wait_for_peers(&carol, &["alice", "bob"]).await;

    let snapshot = alice.snapshot().await.unwrap();
    assert_eq!(snapshot.state, CoordinatorState::Joined);
    assert_eq!(snapshot.local_id, Some(pid("alice")));
    assert_eq!(
        mesh.hub.members(room("room1")).await.unwrap(),
        vec![pid("alice"), pid("bob"), pid("carol")]
    );
    // One call per pair
    assert_eq!(mesh.network.active_calls().await.unwrap(), 3);
}

#[tokio::test]
async fn test_chat_reaches_everyone_including_sender() {
    let mesh = Mesh::new();
    let alice = mesh.join("alice", SimulatedDevices::new()).await;
    let bob = mesh.join("bob", SimulatedDevices::new()).await;
    wait_for_peers(&alice, &["bob"]).await;

    assert!(alice.send_chat("hello").await.unwrap());
    assert!(!alice.send_chat("   ").await.unwrap());

    for handle in [&alice, &bob] {
        let handle = handle.clone();
        eventually("chat delivered", move || {
            let handle = handle.clone();
            async move {
                handle.chat_log().await.is_ok_and(|log| {
                    log.len() == 1 && log[0].text == "hello" && log[0].sender == pid("alice")
                })
            }
        })
        .await;
    }
}

#[tokio::test]
async fn test_screen_share_reconnects_every_peer() {
    let mesh = Mesh::new();
    let alice = mesh.join("alice", SimulatedDevices::new()).await;
    let bob = mesh.join("bob", SimulatedDevices::new()).await;
    let carol = mesh.join("carol", SimulatedDevices::new()).await;
    wait_for_peers(&alice, &["bob", "carol"]).await;
    wait_for_peers(&bob, &["alice", "carol"]).await;
    wait_for_peers(&carol, &["alice", "bob"]).await;

    alice.request_screen_share().await.unwrap();

    for viewer in [&bob, &carol] {
        let viewer = viewer.clone();
        eventually("screen rendered", move || {
            let viewer = viewer.clone();
            async move {
                viewer.snapshot().await.is_ok_and(|s| {
                    s.participant(&pid("alice"))
                        .is_some_and(|p| p.stream.track_kinds() == vec![TrackKind::Video])
                })
            }
        })
        .await;
    }
    wait_for_peers(&alice, &["bob", "carol"]).await;

    let snapshot = alice.snapshot().await.unwrap();
    assert_eq!(snapshot.local_media.source_kind, SourceKind::Screen);
    assert_eq!(mesh.network.active_calls().await.unwrap(), 3);
}

#[tokio::test]
async fn test_denied_screen_share_keeps_camera() {
    let mesh = Mesh::new();
    let alice = mesh
        .join("alice", SimulatedDevices::new().deny(SourceKind::Screen))
        .await;
    let mut events = alice.subscribe();

    alice.request_screen_share().await.unwrap();
    let event = loop {
        match events.recv().await.unwrap() {
            event @ PresentationEvent::MediaFailure(_) => break event,
            _ => continue,
        }
    };

    let PresentationEvent::MediaFailure(error) = event else {
        unreachable!()
    };
    assert_eq!(error.error_code(), 1);
    let snapshot = alice.snapshot().await.unwrap();
    assert_eq!(snapshot.local_media.source_kind, SourceKind::Camera);
}

#[tokio::test]
async fn test_leaver_removed_from_remaining_peers() {
    let mesh = Mesh::new();
    let alice = mesh.join("alice", SimulatedDevices::new()).await;
    let bob = mesh.join("bob", SimulatedDevices::new()).await;
    let carol = mesh.join("carol", SimulatedDevices::new()).await;
    wait_for_peers(&carol, &["alice", "bob"]).await;
    wait_for_peers(&alice, &["bob", "carol"]).await;
    wait_for_peers(&bob, &["alice", "carol"]).await;

    carol.leave().await.unwrap();

    wait_for_peers(&alice, &["bob"]).await;
    wait_for_peers(&bob, &["alice"]).await;
    assert_eq!(
        mesh.hub.members(room("room1")).await.unwrap(),
        vec![pid("alice"), pid("bob")]
    );
    assert_eq!(mesh.network.active_calls().await.unwrap(), 1);
}

#[tokio::test]
async fn test_hub_shutdown_terminates_everyone() {
    let mesh = Mesh::new();
    let alice = mesh.join("alice", SimulatedDevices::new()).await;
    let bob = mesh.join("bob", SimulatedDevices::new()).await;
    wait_for_peers(&alice, &["bob"]).await;
    let mut alice_events = alice.subscribe();

    mesh.hub.shutdown("maintenance").await.unwrap();

    let reason = loop {
        if let PresentationEvent::Terminated { reason } = alice_events.recv().await.unwrap() {
            break reason;
        }
    };
    assert_eq!(
        reason,
        TerminationReason::TransportDisconnected("maintenance".to_string())
    );
    let bob_handle = bob.clone();
    eventually("bob stopped", move || {
        let bob = bob_handle.clone();
        async move { bob.is_closed() }
    })
    .await;
}
