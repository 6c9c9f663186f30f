use anyhow::Result;
use huddle_client::negotiation::{LocalSource, RtcEngineFactory};
use huddle_client::{ClientEvent, ClientSettings, RoomClient};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,huddle_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Huddle client...");

    let settings = ClientSettings::load()?;
    if settings.room.trim().is_empty() || settings.key.trim().is_empty() {
        anyhow::bail!("Set a room and key (HUDDLE_ROOM / HUDDLE_KEY or huddle.toml)");
    }

    let factory = Arc::new(RtcEngineFactory::new(
        settings.ice_servers(),
        settings.turn_only,
    ));
    let (handle, mut events, task) = RoomClient::spawn(settings, factory);

    // Capture is fed from outside; the track only has to exist before offers go out
    handle.set_local_source(LocalSource::opus("microphone"));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.leave();
            }
            event = events.recv() => match event {
                Some(ClientEvent::Joined { client_id, room, peers }) => {
                    tracing::info!("In room {} as {} ({} others)", room, client_id, peers.len());
                }
                Some(ClientEvent::AuthFailed { reason }) => {
                    tracing::error!("Could not join: {}", reason);
                    break;
                }
                Some(ClientEvent::Left) | None => break,
                Some(other) => tracing::info!("{:?}", other),
            },
        }
    }

    task.await?;
    Ok(())
}
