//! Peer-Session Demo
//!
//! Runs a three-party mesh call entirely in process.
//!
//! # Wiring
//!
//! - `RoomHub` plays the room signaling server
//! - `LoopbackNetwork` plays the peer transport
//! - One `CoordinatorActor` per participant, each with simulated devices
//!
//! # Script
//!
//! 1. Load configuration from environment
//! 2. alice, bob and carol join the configured room one after another
//! 3. alice chats, then switches to screen share (peers reconnect to her)
//! 4. bob mutes his microphone
//! 5. carol leaves
//! 6. Snapshots and alice's chat log are printed as JSON, then everyone leaves

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::config::ObservabilityConfig;
use common::types::ParticipantId;
use peer_session::actors::{CallSnapshot, CoordinatorState};
use peer_session::config::Config;
use peer_session::hub::{RoomHub, RoomHubHandle};
use peer_session::loopback::{LoopbackNetwork, LoopbackNetworkHandle, SimulatedDevices};
use peer_session::ports::Ports;
use peer_session::{CoordinatorActor, CoordinatorHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long the demo waits for the mesh to converge after each step.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay applied to every simulated capture.
const CAPTURE_DELAY: Duration = Duration::from_millis(50);

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_new(&observability.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

struct Participant {
    name: &'static str,
    handle: CoordinatorHandle,
    task: tokio::task::JoinHandle<()>,
}

async fn spawn_participant(
    name: &'static str,
    config: &Config,
    hub: &RoomHubHandle,
    network: &LoopbackNetworkHandle,
    cancel_token: &CancellationToken,
) -> anyhow::Result<Participant> {
    let signaling = Arc::new(hub.open_channel());
    let transport = Arc::new(network.endpoint(ParticipantId::from(name)));
    let devices = Arc::new(SimulatedDevices::new().with_delay(CAPTURE_DELAY));

    let ports = Ports::new(signaling.clone(), transport.clone(), devices);
    let (handle, task) = CoordinatorActor::spawn(
        config.clone(),
        ports,
        SimulatedDevices::camera_stream(),
        cancel_token.child_token(),
    );

    hub.attach(&signaling, handle.clone())
        .await
        .with_context(|| format!("attaching {name} to the room hub"))?;
    network
        .attach(&transport, handle.clone())
        .await
        .with_context(|| format!("attaching {name} to the loopback network"))?;

    let outcome = handle.join(config.room_id.clone()).await?;
    info!(participant = name, outcome = ?outcome, "Join requested");

    Ok(Participant { name, handle, task })
}

/// Poll `participant` until its snapshot satisfies `done` or the settle
/// timeout expires.
async fn settle(
    participant: &Participant,
    done: impl Fn(&CallSnapshot) -> bool,
) -> anyhow::Result<CallSnapshot> {
    let wait = async {
        loop {
            let snapshot = participant.handle.snapshot().await?;
            if done(&snapshot) {
                return Ok::<_, anyhow::Error>(snapshot);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };

    tokio::time::timeout(SETTLE_TIMEOUT, wait)
        .await
        .with_context(|| format!("{} did not settle in time", participant.name))?
}

async fn settle_mesh(participants: &[&Participant]) -> anyhow::Result<()> {
    let others = participants.len().saturating_sub(1);
    for participant in participants {
        settle(participant, |s| {
            s.participants.len() == others
                && s.sessions.len() == others
                && s.state == CoordinatorState::Joined
        })
        .await?;
    }
    Ok(())
}

fn print_snapshot(name: &str, snapshot: &CallSnapshot) -> anyhow::Result<()> {
    println!("--- {name} ---");
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(&ObservabilityConfig::from_env());

    let config = Config::from_env().context("loading configuration")?;
    info!(
        room_id = %config.room_id,
        mailbox_capacity = config.mailbox_capacity,
        pending_call_timeout_secs = config.pending_call_timeout.as_secs(),
        chat_max_len = config.chat_max_len,
        "Configuration loaded successfully"
    );

    let root_token = CancellationToken::new();
    let (hub, hub_task) = RoomHub::spawn(root_token.child_token());
    let (network, network_task) = LoopbackNetwork::spawn(root_token.child_token());

    let alice = spawn_participant("alice", &config, &hub, &network, &root_token).await?;
    let bob = spawn_participant("bob", &config, &hub, &network, &root_token).await?;
    settle_mesh(&[&alice, &bob]).await?;
    let carol = spawn_participant("carol", &config, &hub, &network, &root_token).await?;
    settle_mesh(&[&alice, &bob, &carol]).await?;
    info!(members = ?hub.members(config.room_id.clone()).await?, "Mesh established");

    alice.handle.send_chat("hello from alice").await?;
    bob.handle.send_chat("hi alice").await?;

    let request = alice.handle.request_screen_share().await?;
    info!(request = ?request, "alice requested screen share");
    settle(&alice, |s| {
        s.local_media.source_kind == peer_session::media::SourceKind::Screen
    })
    .await?;
    settle_mesh(&[&alice, &bob, &carol]).await?;

    if bob.handle.toggle_audio().await?.is_none() {
        warn!("bob has no audio track to mute");
    }

    carol.handle.leave().await?;
    settle_mesh(&[&alice, &bob]).await?;

    for participant in [&alice, &bob] {
        print_snapshot(participant.name, &participant.handle.snapshot().await?)?;
    }
    println!("--- alice chat log ---");
    println!(
        "{}",
        serde_json::to_string_pretty(&alice.handle.chat_log().await?)?
    );

    for participant in [&alice, &bob] {
        participant.handle.leave().await?;
    }
    for participant in [alice, bob, carol] {
        participant.task.await?;
    }

    root_token.cancel();
    hub_task.await?;
    network_task.await?;

    info!("Demo complete");
    Ok(())
}
