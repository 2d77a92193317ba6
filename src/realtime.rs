use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use url::Url;

use crate::api::events::{ClientEvent, ServerEvent};
use crate::api::models::{ConversationId, UserId};
use crate::error::ChannelError;
use crate::presence::PresenceSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_attempts: 5, delay: Duration::from_secs(1) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    /// Retries exhausted; stays here until [`ChannelClient::reconnect`].
    Down,
}

/// What the connection task reports back to the owning task.
#[derive(Debug)]
pub(crate) enum ChannelSignal {
    Connected,
    Disconnected,
    GaveUp,
    Event(ServerEvent),
}

/// One websocket per session. The socket lives in a spawned task that only
/// moves frames; presence and connection state change on the task that
/// drains [`ChannelClient::next_event`].
pub struct ChannelClient {
    url: Url,
    policy: ReconnectPolicy,
    state: ConnectionState,
    presence: PresenceSet,
    user_id: Option<UserId>,
    room: Option<ConversationId>,
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    inbound: Option<mpsc::UnboundedReceiver<ChannelSignal>>,
    task: Option<JoinHandle<()>>,
}

impl ChannelClient {
    pub fn new(url: Url, policy: ReconnectPolicy) -> Self {
        Self {
            url,
            policy,
            state: ConnectionState::Idle,
            presence: PresenceSet::new(),
            user_id: None,
            room: None,
            outbound: None,
            inbound: None,
            task: None,
        }
    }

    /// Starts the connection task. Failures surface as state changes, never
    /// as errors to the caller.
    pub fn connect(&mut self, user_id: &str) {
        self.shutdown();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_connection(
            self.url.clone(),
            self.policy,
            user_id.to_string(),
            self.room.clone(),
            out_rx,
            sig_tx,
        ));
        self.user_id = Some(user_id.to_string());
        self.outbound = Some(out_tx);
        self.inbound = Some(sig_rx);
        self.task = Some(task);
        self.state = ConnectionState::Connecting;
    }

    /// Manual retry after the policy gave up.
    pub fn reconnect(&mut self) -> bool {
        match self.user_id.clone() {
            Some(user) => {
                self.connect(&user);
                true
            }
            None => false,
        }
    }

    pub fn disconnect(&mut self) {
        self.shutdown();
        self.user_id = None;
        self.room = None;
        self.presence.clear();
        self.state = ConnectionState::Idle;
    }

    fn shutdown(&mut self) {
        self.outbound = None;
        self.inbound = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.presence.is_online(user_id)
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    fn emit(&self, event: ClientEvent) {
        let sent = self.outbound.as_ref().is_some_and(|tx| tx.send(event.clone()).is_ok());
        if !sent {
            warn!("channel not running, dropped {event:?}");
        }
    }

    pub fn join_room(&mut self, conversation_id: &str) {
        if self.room.as_deref() == Some(conversation_id) {
            return;
        }
        if let Some(current) = self.room.take() {
            self.emit(ClientEvent::ConversationLeave(current));
        }
        self.room = Some(conversation_id.to_string());
        self.emit(ClientEvent::ConversationJoin(conversation_id.to_string()));
    }

    pub fn leave_room(&mut self, conversation_id: &str) {
        if self.room.as_deref() == Some(conversation_id) {
            self.room = None;
        }
        self.emit(ClientEvent::ConversationLeave(conversation_id.to_string()));
    }

    pub fn emit_typing(&self, conversation_id: &str) {
        self.emit(ClientEvent::TypingStart { conversation_id: conversation_id.to_string() });
    }

    pub fn emit_stop_typing(&self, conversation_id: &str) {
        self.emit(ClientEvent::TypingStop { conversation_id: conversation_id.to_string() });
    }

    /// Next server event. Resolves to `None` once when the connection task
    /// ends, then stays pending until the next connect.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        loop {
            let Some(rx) = self.inbound.as_mut() else {
                return std::future::pending().await;
            };
            match rx.recv().await {
                Some(signal) => {
                    if let Some(event) = self.observe(signal) {
                        return Some(event);
                    }
                }
                None => {
                    self.inbound = None;
                    self.outbound = None;
                    self.task = None;
                    if self.state != ConnectionState::Idle {
                        self.state = ConnectionState::Down;
                    }
                    return None;
                }
            }
        }
    }

    pub(crate) fn observe(&mut self, signal: ChannelSignal) -> Option<ServerEvent> {
        match signal {
            ChannelSignal::Connected => {
                info!("realtime channel connected");
                self.state = ConnectionState::Connected;
                None
            }
            ChannelSignal::Disconnected => {
                warn!("realtime channel lost, reconnecting");
                self.state = ConnectionState::Connecting;
                None
            }
            ChannelSignal::GaveUp => {
                warn!("realtime channel down after {} attempts", self.policy.max_attempts);
                self.state = ConnectionState::Down;
                None
            }
            ChannelSignal::Event(event) => {
                if let ServerEvent::UserStatus { user_id, status } = &event {
                    self.presence.apply(user_id, *status);
                }
                Some(event)
            }
        }
    }
}

impl Drop for ChannelClient {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn encode(event: &ClientEvent) -> Result<WsMessage, ChannelError> {
    Ok(WsMessage::Text(serde_json::to_string(event)?))
}

fn track_room(room: &mut Option<ConversationId>, event: &ClientEvent) {
    match event {
        ClientEvent::ConversationJoin(id) => *room = Some(id.clone()),
        ClientEvent::ConversationLeave(id) if room.as_deref() == Some(id.as_str()) => *room = None,
        _ => {}
    }
}

enum SessionEnd {
    /// The socket dropped; try again.
    Lost,
    /// The client side went away; stop for good.
    Closed,
}

async fn run_connection(
    url: Url,
    policy: ReconnectPolicy,
    user_id: UserId,
    mut room: Option<ConversationId>,
    mut outbound: mpsc::UnboundedReceiver<ClientEvent>,
    signals: mpsc::UnboundedSender<ChannelSignal>,
) {
    let mut failures = 0u32;
    loop {
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                failures = 0;
                if signals.send(ChannelSignal::Connected).is_err() {
                    return;
                }
                // Typing frames queued while offline are stale now.
                while let Ok(event) = outbound.try_recv() {
                    track_room(&mut room, &event);
                }
                match run_session(ws, &user_id, &mut room, &mut outbound, &signals).await {
                    Ok(SessionEnd::Closed) => return,
                    Ok(SessionEnd::Lost) => {}
                    Err(e) => warn!("realtime channel error: {e}"),
                }
                if signals.send(ChannelSignal::Disconnected).is_err() {
                    return;
                }
            }
            Err(e) => {
                failures += 1;
                warn!("realtime connect attempt {failures} failed: {e}");
            }
        }

        if failures > policy.max_attempts {
            let _ = signals.send(ChannelSignal::GaveUp);
            return;
        }

        let retry = tokio::time::sleep(policy.delay);
        tokio::pin!(retry);
        loop {
            tokio::select! {
                _ = &mut retry => break,
                event = outbound.recv() => match event {
                    Some(event) => track_room(&mut room, &event),
                    None => return,
                },
            }
        }
    }
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn run_session(
    ws: Socket,
    user_id: &str,
    room: &mut Option<ConversationId>,
    outbound: &mut mpsc::UnboundedReceiver<ClientEvent>,
    signals: &mpsc::UnboundedSender<ChannelSignal>,
) -> Result<SessionEnd, ChannelError> {
    let (mut sink, mut stream) = ws.split();
    sink.send(encode(&ClientEvent::UserOnline(user_id.to_string()))?).await?;
    if let Some(id) = room.as_ref() {
        sink.send(encode(&ClientEvent::ConversationJoin(id.clone()))?).await?;
    }

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        debug!("received {}", event.name());
                        if signals.send(ChannelSignal::Event(event)).is_err() {
                            return Ok(SessionEnd::Closed);
                        }
                    }
                    Err(e) => debug!("ignoring frame: {e}"),
                },
                Some(Ok(WsMessage::Close(_))) | None => return Ok(SessionEnd::Lost),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            event = outbound.recv() => match event {
                Some(event) => {
                    track_room(room, &event);
                    sink.send(encode(&event)?).await?;
                }
                None => {
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Closed);
                }
            },
        }
    }
}
