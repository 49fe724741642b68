//! Joins a room as a viewer and logs what happens in it

use anyhow::{Context, Result};
use roomcast_client::SignalingClient;
use roomcast_protocol::{Role, ServerMessage};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "roomcast_client=debug,roomcast_watch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let room_id = args
        .next()
        .context("usage: roomcast-watch <room-id> [peer-id]")?;
    let peer_id = args
        .next()
        .unwrap_or_else(|| format!("watch-{}", uuid::Uuid::new_v4()));
    let url = std::env::var("ROOMCAST_URL").unwrap_or_else(|_| "ws://127.0.0.1:4000/ws".into());

    let client = SignalingClient::connect(&url).await?;
    let mut events = client.subscribe();

    let joined = client.join(&room_id, &peer_id, Role::Viewer).await?;
    tracing::info!(
        "In room {} with {} other peer(s)",
        room_id,
        joined.peer_ids.len()
    );
    for producer in &joined.existing_producers {
        tracing::info!(
            "{} is publishing {} ({})",
            producer.peer_id,
            producer.kind.as_str(),
            producer.producer_id
        );
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ServerMessage::NewPeer { peer_id }) => tracing::info!("{} joined", peer_id),
                Ok(ServerMessage::PeerLeft { peer_id }) => tracing::info!("{} left", peer_id),
                Ok(ServerMessage::ViewersUpdated { viewers }) => {
                    tracing::info!("Viewers: {}", viewers.join(", "))
                }
                Ok(ServerMessage::NewProducer { producer_id, peer_id, kind }) => {
                    tracing::info!("{} is publishing {} ({})", peer_id, kind.as_str(), producer_id)
                }
                Ok(ServerMessage::ProducerClosed { producer_id, peer_id }) => {
                    tracing::info!("{} stopped {}", peer_id, producer_id)
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => tracing::warn!("Skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                client.leave().await?;
                break;
            }
        }

        if !client.is_connected() {
            tracing::warn!("Server closed the connection");
            break;
        }
    }

    Ok(())
}
