use std::{collections::HashSet, pin::Pin};

use anyhow::Context;
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::{
    sync::mpsc,
    time::{self, Duration, Instant},
};
use tokio_tungstenite::tungstenite::Message;

use crate::api::{AuthToken, ClientMessage, FeedMessage, Scope};
use crate::{SharedCache, StaleKey};

// Pings are sent every PING_INTERVAL
const PING_INTERVAL: Duration = Duration::from_secs(10);
// If the interval between two pongs is more than DISCONNECT_INTERVAL, reconnect
const DISCONNECT_INTERVAL: Duration = Duration::from_secs(20);
// Space each reconnect attempt by ATTEMPT_SPACING
const ATTEMPT_SPACING: Duration = Duration::from_secs(1);
// Give up after this many consecutive failed connection attempts; the caller
// may restart the feed at a slower cadence if it wants to keep trying
const MAX_CONNECT_ATTEMPTS: usize = 5;

pub type FeedTx = Pin<Box<dyn Sink<ClientMessage, Error = anyhow::Error> + Send>>;
pub type FeedRx = Pin<Box<dyn Stream<Item = anyhow::Result<FeedMessage>> + Send>>;

/// Dials one authenticated event-feed connection. Called again on every
/// reconnect attempt.
#[async_trait]
pub trait Connector: Send {
    async fn connect(&mut self) -> anyhow::Result<(FeedTx, FeedRx)>;
}

/// Websocket connector: sends the bearer token as the first frame and
/// expects the server to answer `ok` before any feed traffic.
pub struct WsConnector {
    url: String,
    token: AuthToken,
}

impl WsConnector {
    /// `url` is the full websocket endpoint, e.g. `ws://host/ws/event-feed`.
    pub fn new(url: String, token: AuthToken) -> WsConnector {
        WsConnector { url, token }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&mut self) -> anyhow::Result<(FeedTx, FeedRx)> {
        let (mut sock, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .context("connecting to event feed")?;

        let mut buf = uuid::Uuid::encode_buffer();
        let token = self.token.0.as_hyphenated().encode_lower(&mut buf);
        sock.send(Message::Text(token.to_string()))
            .await
            .context("sending auth token")?;
        match sock.next().await {
            Some(Ok(Message::Text(t))) if t == "ok" => (),
            other => anyhow::bail!("event feed refused authentication: {other:?}"),
        }

        let (sink, stream) = sock.split();
        let tx: FeedTx = Box::pin(sink.sink_map_err(anyhow::Error::from).with(
            |msg: ClientMessage| async move {
                Ok::<_, anyhow::Error>(Message::Text(serde_json::to_string(&msg)?))
            },
        ));
        let rx: FeedRx = Box::pin(stream.filter_map(|msg| async move {
            match msg {
                Ok(Message::Text(t)) => Some(
                    serde_json::from_str(&t).context("parsing feed message"),
                ),
                Ok(Message::Binary(b)) => Some(
                    serde_json::from_slice(&b).context("parsing feed message"),
                ),
                // ws-level control frames are the transport's business
                Ok(_) => None,
                Err(e) => Some(Err(anyhow::Error::from(e))),
            }
        }));
        Ok((tx, rx))
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Join(Scope),
    Leave(Scope),
    Shutdown,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Notification {
    Connected,
    Disconnected,
    /// Something went stale; the owner should refetch it
    /// (`Mutator::refresh_stale`).
    Stale(StaleKey),
}

/// Control handle for a running event feed.
#[derive(Clone, Debug)]
pub struct ChannelHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ChannelHandle {
    /// Idempotent; membership is remembered client-side and re-sent on every
    /// reconnect.
    pub fn join(&self, room: Scope) {
        let _ = self.commands.send(Command::Join(room));
    }

    pub fn leave(&self, room: Scope) {
        let _ = self.commands.send(Command::Leave(room));
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Spawns `run_event_feed` on the current runtime.
pub fn spawn_event_feed<C: Connector + 'static>(
    connector: C,
    cache: SharedCache,
) -> (
    ChannelHandle,
    mpsc::UnboundedReceiver<Notification>,
    tokio::task::JoinHandle<anyhow::Result<()>>,
) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (notif_tx, notif_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_event_feed(connector, cache, cmd_rx, notif_tx));
    (ChannelHandle { commands: cmd_tx }, notif_rx, task)
}

/// The long-lived feed loop: connect, authenticate, re-join every room held
/// by the session, then translate inbound events into cache operations until
/// the connection drops, and start over. Returns `Ok(())` on shutdown, `Err`
/// once `MAX_CONNECT_ATTEMPTS` consecutive connection attempts failed.
pub async fn run_event_feed<C: Connector>(
    mut connector: C,
    cache: SharedCache,
    mut commands: mpsc::UnboundedReceiver<Command>,
    notify: mpsc::UnboundedSender<Notification>,
) -> anyhow::Result<()> {
    let mut rooms: HashSet<Scope> = HashSet::new();
    let mut failed_attempts = 0usize;
    'reconnect: loop {
        if failed_attempts > 0 {
            time::sleep(ATTEMPT_SPACING).await;
        }
        let (mut tx, mut rx) = match connector.connect().await {
            Ok(conn) => conn,
            Err(err) => {
                failed_attempts += 1;
                tracing::warn!(?err, attempt = failed_attempts, "event feed connection failed");
                if failed_attempts >= MAX_CONNECT_ATTEMPTS {
                    let _ = notify.send(Notification::Disconnected);
                    return Err(err.context(format!(
                        "giving up on event feed after {failed_attempts} attempts"
                    )));
                }
                continue 'reconnect;
            }
        };
        failed_attempts = 0;

        // Room state does not survive on the transport across reconnects
        for room in &rooms {
            if let Err(err) = tx.send(ClientMessage::Join(room.clone())).await {
                tracing::warn!(?err, "lost event feed while re-joining rooms");
                failed_attempts = 1;
                continue 'reconnect;
            }
        }
        tracing::info!("connected to event feed");
        let _ = notify.send(Notification::Connected);

        let mut next_ping = Instant::now() + PING_INTERVAL;
        let mut last_pong = Instant::now();
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    None | Some(Command::Shutdown) => {
                        let _ = tx.close().await;
                        tracing::info!("disconnected from event feed");
                        return Ok(());
                    }
                    Some(Command::Join(room)) => {
                        if rooms.insert(room.clone()) {
                            if tx.send(ClientMessage::Join(room)).await.is_err() {
                                let _ = notify.send(Notification::Disconnected);
                                continue 'reconnect;
                            }
                        }
                    }
                    Some(Command::Leave(room)) => {
                        if rooms.remove(&room) {
                            // Best-effort: local filtering already stops
                            // event application for this room
                            let _ = tx.send(ClientMessage::Leave(room)).await;
                        }
                    }
                },
                _ = time::sleep_until(next_ping) => {
                    if tx.send(ClientMessage::Ping).await.is_err() {
                        let _ = notify.send(Notification::Disconnected);
                        continue 'reconnect;
                    }
                    next_ping += PING_INTERVAL;
                }
                _ = time::sleep_until(last_pong + DISCONNECT_INTERVAL) => {
                    tracing::warn!("no pong from event feed, reconnecting");
                    let _ = notify.send(Notification::Disconnected);
                    continue 'reconnect;
                }
                msg = rx.next() => match msg {
                    None => {
                        let _ = notify.send(Notification::Disconnected);
                        continue 'reconnect;
                    }
                    Some(Err(err)) => {
                        tracing::warn!(?err, "event feed errored, reconnecting");
                        let _ = notify.send(Notification::Disconnected);
                        continue 'reconnect;
                    }
                    Some(Ok(FeedMessage::Pong)) => last_pong = Instant::now(),
                    Some(Ok(FeedMessage::Event { room, event })) => {
                        if !rooms.contains(&room) {
                            tracing::debug!(?room, "event for a room we already left, dropping");
                            continue;
                        }
                        let stale = cache.write().await.apply_event(&event);
                        for key in stale {
                            let _ = notify.send(Notification::Stale(key));
                        }
                    }
                },
            }
        }
    }
}
