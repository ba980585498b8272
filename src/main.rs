//! Archive Dashboard watcher
//!
//! Opens the real-time channel with a session token, subscribes to the
//! monitored groups and logs every pushed event until Ctrl-C.

use anyhow::Context;
use archive_client::ws::{ChannelStatus, CloseReason, ConnectionState};
use archive_client::{DesiredTopics, Handler, HandlerRegistry, RealtimeChannel};
use archive_shared::{event_types, ServerEvent};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::WatchSettings;

/// Status changes worth telling the operator about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notice {
    /// Ready again after a drop; the gap needs a backfill
    Resumed,
    Closed(CloseReason),
}

/// Turns the status stream into one notice per state transition. Status is
/// republished on every subscription change, so repeats of the same state
/// are ignored.
struct Transitions {
    previous: ConnectionState,
}

impl Transitions {
    fn new(initial: ConnectionState) -> Self {
        Self { previous: initial }
    }

    fn observe(&mut self, status: &ChannelStatus) -> Option<Notice> {
        let previous = std::mem::replace(&mut self.previous, status.state);
        if previous == status.state {
            return None;
        }
        match status.state {
            ConnectionState::Ready if status.resumed => Some(Notice::Resumed),
            ConnectionState::Closed(reason) => Some(Notice::Closed(reason)),
            _ => None,
        }
    }
}

fn register_handlers(channel: &RealtimeChannel) -> Vec<(&'static str, Handler)> {
    let handlers = vec![
        (
            event_types::MESSAGE_NEW,
            Handler::new(|event| {
                if let ServerEvent::MessageNew(message) = event {
                    tracing::info!(
                        group = %message.group_id,
                        id = %message.id,
                        sender = message.sender_name.as_deref().unwrap_or("unknown"),
                        kind = ?message.message_type,
                        content = message.content.as_deref().unwrap_or(""),
                        "new message"
                    );
                }
                Ok(())
            }),
        ),
        (
            event_types::BOT_QR,
            Handler::new(|event| {
                if let ServerEvent::BotQr { qr } = event {
                    tracing::info!(%qr, "bot pairing code issued");
                }
                Ok(())
            }),
        ),
        (
            event_types::BOT_STATUS,
            Handler::new(|event| {
                if let ServerEvent::BotStatus(status) = event {
                    match &status.error {
                        Some(error) => tracing::warn!(connected = status.is_connected, %error, "bot status"),
                        None => tracing::info!(connected = status.is_connected, "bot status"),
                    }
                }
                Ok(())
            }),
        ),
    ];

    for (kind, handler) in &handlers {
        channel.on(*kind, handler);
    }
    handlers
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "archive_dashboard=debug,archive_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = WatchSettings::from_env()?;
    tracing::info!(
        url = %settings.channel.url,
        groups = settings.monitored.len(),
        "starting archive watcher"
    );

    let desired: DesiredTopics = settings.monitored.iter().cloned().collect();
    let channel = RealtimeChannel::websocket(settings.channel, HandlerRegistry::new(), &desired);
    let handlers = register_handlers(&channel);

    channel
        .connect(settings.token)
        .await
        .context("failed to open the real-time channel")?;

    let mut status = channel.watch_status();
    let mut transitions = Transitions::new(status.borrow_and_update().state);
    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                match transitions.observe(&current) {
                    Some(Notice::Resumed) => {
                        tracing::warn!("channel resumed; events during the gap must be backfilled");
                    }
                    Some(Notice::Closed(reason)) => {
                        tracing::error!(?reason, last_error = ?current.last_error, "channel closed, reload required");
                        break;
                    }
                    None => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    for (kind, handler) in &handlers {
        channel.off(kind, handler);
    }
    channel.disconnect().await;
    Ok(())
}
