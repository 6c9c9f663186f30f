//! Control-channel side of the client.
//!
//! A single controller task owns the relay connection, the roster, the peer
//! set and the reconnection policy, and handles relay messages, engine events
//! and user commands strictly in arrival order.

mod reconnect;
mod websocket;

pub use reconnect::Reconnector;

use huddle_protocol::{ClientMessage, PeerInfo, ServerMessage, SessionId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::negotiation::{EngineEvent, EngineEventSender, EngineFactory, LocalSource, PeerSet};
use crate::state::{ClientSettings, Roster};
use websocket::{Connection, TransportEvent, TransportSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Everything a UI needs to render the room
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Status(ConnectionStatus),
    Joined {
        client_id: SessionId,
        room: String,
        peers: Vec<PeerInfo>,
    },
    PeerJoined(PeerInfo),
    PeerLeft {
        client_id: SessionId,
        name: String,
    },
    MuteChanged {
        client_id: SessionId,
        muted: bool,
    },
    /// The relay rejected the room key; the client has stopped
    AuthFailed {
        reason: String,
    },
    /// Explicit leave completed; the client has stopped
    Left,
}

enum Command {
    Leave,
    SetMuted(bool),
    SetLocalSource(LocalSource),
    AddTargetGroup(String),
}

/// Cheap handle for driving a running [`RoomClient`]
#[derive(Clone)]
pub struct RoomHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl RoomHandle {
    pub fn leave(&self) {
        let _ = self.commands.send(Command::Leave);
    }

    pub fn set_muted(&self, muted: bool) {
        let _ = self.commands.send(Command::SetMuted(muted));
    }

    pub fn set_local_source(&self, source: LocalSource) {
        let _ = self.commands.send(Command::SetLocalSource(source));
    }

    /// Admins only: also negotiate with members of `group`
    pub fn add_target_group(&self, group: impl Into<String>) {
        let _ = self.commands.send(Command::AddTargetGroup(group.into()));
    }
}

pub struct RoomClient {
    settings: ClientSettings,
    factory: Arc<dyn EngineFactory>,
    events: mpsc::UnboundedSender<ClientEvent>,
    transport: TransportSender,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    engine_events: EngineEventSender,
    connection: Option<Connection>,
    epoch: u64,
    reconnector: Reconnector,
    roster: Roster,
    peers: Option<PeerSet>,
    muted: bool,
    local_source: Option<LocalSource>,
    target_groups: Vec<String>,
}

impl RoomClient {
    /// Connect to the relay and join the configured room in the background.
    pub fn spawn(
        settings: ClientSettings,
        factory: Arc<dyn EngineFactory>,
    ) -> (RoomHandle, mpsc::UnboundedReceiver<ClientEvent>, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();

        let client = RoomClient {
            reconnector: Reconnector::new(settings.reconnect_delay()),
            settings,
            factory,
            events: events_tx,
            transport: transport_tx,
            outbound: outbound_tx,
            engine_events: engine_tx,
            connection: None,
            epoch: 0,
            roster: Roster::default(),
            peers: None,
            muted: false,
            local_source: None,
            target_groups: Vec::new(),
        };

        let task = tokio::spawn(client.run(command_rx, transport_rx, outbound_rx, engine_rx));

        (
            RoomHandle {
                commands: command_tx,
            },
            events_rx,
            task,
        )
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
        mut outbound: mpsc::UnboundedReceiver<ClientMessage>,
        mut engine_events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        let period = self.settings.keepalive_interval();
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.emit(ClientEvent::Status(ConnectionStatus::Connecting));
        self.open();

        loop {
            let deadline = self.reconnector.deadline();

            tokio::select! {
                command = commands.recv() => {
                    // Every handle dropped counts as leaving
                    let command = command.unwrap_or(Command::Leave);
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                Some((epoch, event)) = transport.recv() => {
                    if epoch != self.epoch {
                        tracing::debug!("Ignoring event from abandoned connection {}", epoch);
                        continue;
                    }
                    if !self.handle_transport(event).await {
                        break;
                    }
                }
                Some(message) = outbound.recv() => self.send(message),
                Some(event) = engine_events.recv() => {
                    if let Some(peers) = self.peers.as_mut() {
                        if let Err(e) = peers.handle_engine_event(event).await {
                            tracing::warn!("Engine event handling failed: {}", e);
                        }
                    }
                }
                _ = sleep_until(deadline) => {
                    if self.reconnector.take_due(Instant::now()) {
                        self.open();
                    }
                }
                _ = keepalive.tick() => {
                    if self.connection.is_some() {
                        self.send(ClientMessage::Ping);
                    }
                }
            }
        }

        tracing::info!("Room client stopped");
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn send(&self, message: ClientMessage) {
        match &self.connection {
            Some(connection) => {
                if !connection.send(message) {
                    tracing::debug!("Control connection writer is gone");
                }
            }
            None => tracing::debug!("Not connected, dropping {:?}", message),
        }
    }

    fn open(&mut self) {
        self.epoch += 1;
        self.reconnector.attempt_started();
        tracing::info!("Connecting to {} (attempt {})", self.settings.ws_url(), self.epoch);
        websocket::open(self.settings.ws_url(), self.epoch, self.transport.clone());
    }

    /// Returns `false` when the client must stop.
    async fn handle_transport(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Opened(connection) => {
                self.reconnector.connected();
                self.connection = Some(connection);
                self.send(ClientMessage::Join {
                    name: self.settings.name.clone(),
                    room: self.settings.room.clone(),
                    key: self.settings.key.clone(),
                    group: self.settings.group.clone(),
                    role: self.settings.role,
                });
                self.emit(ClientEvent::Status(ConnectionStatus::Connected));
                true
            }
            TransportEvent::Failed(e) => {
                tracing::warn!("Connection attempt failed: {}", e);
                if self.reconnector.attempt_failed(Instant::now()) {
                    self.emit(ClientEvent::Status(ConnectionStatus::Reconnecting));
                }
                true
            }
            TransportEvent::Message(message) => self.handle_server_message(message).await,
            TransportEvent::Closed => {
                self.connection_lost().await;
                true
            }
        }
    }

    async fn connection_lost(&mut self) {
        self.connection = None;
        self.teardown().await;

        if self.reconnector.schedule(Instant::now()) {
            tracing::info!(
                "Control connection lost, reconnecting in {:?}",
                self.settings.reconnect_delay()
            );
            self.emit(ClientEvent::Status(ConnectionStatus::Reconnecting));
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut peers) = self.peers.take() {
            peers.close_all().await;
        }
        self.roster.clear();
    }

    async fn handle_server_message(&mut self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::Joined {
                client_id,
                room,
                peers,
            } => self.on_joined(client_id, room, peers).await,
            ServerMessage::AuthFailed { reason } => {
                tracing::warn!("Join rejected: {}", reason);
                self.reconnector.stop();
                self.connection = None;
                self.teardown().await;
                self.emit(ClientEvent::AuthFailed { reason });
                self.emit(ClientEvent::Status(ConnectionStatus::Disconnected));
                return false;
            }
            ServerMessage::PeerJoined {
                client_id,
                name,
                muted,
                group,
                role,
            } => {
                let info = PeerInfo {
                    client_id: client_id.clone(),
                    name,
                    muted,
                    group,
                    role,
                };
                tracing::info!("{} joined", info.name);
                self.roster.insert(info.clone());
                self.emit(ClientEvent::PeerJoined(info));

                if self.roster.accepts(&client_id) {
                    self.connect_to(&client_id).await;
                }
            }
            ServerMessage::PeerLeft { client_id, name } => {
                tracing::info!("{} left", name);
                self.roster.remove(&client_id);
                if let Some(peers) = self.peers.as_mut() {
                    peers.remove(&client_id).await;
                }
                self.emit(ClientEvent::PeerLeft { client_id, name });
            }
            ServerMessage::MuteChanged { client_id, muted } => {
                self.roster.set_muted(&client_id, muted);
                self.emit(ClientEvent::MuteChanged { client_id, muted });
            }
            ServerMessage::Signal { from_id, payload } => {
                if !self.roster.accepts(&from_id) {
                    tracing::debug!("Discarding signal from {} outside our groups", from_id);
                    return true;
                }
                if let Some(peers) = self.peers.as_mut() {
                    if let Err(e) = peers.handle_signal(&from_id, payload).await {
                        tracing::warn!("Signal from {} not applied: {}", from_id, e);
                    }
                }
            }
            ServerMessage::Pong => {
                tracing::trace!("Keepalive acknowledged");
            }
        }
        true
    }

    async fn on_joined(&mut self, client_id: SessionId, room: String, peers: Vec<PeerInfo>) {
        tracing::info!("Joined room {} as {} with {} peers", room, client_id, peers.len());

        // A rejoin after reconnection starts from a clean slate
        self.teardown().await;

        let me = PeerInfo {
            client_id: client_id.clone(),
            name: self.settings.name.clone(),
            muted: self.muted,
            group: self.settings.group.clone(),
            role: self.settings.role,
        };
        self.roster.reset(me, peers.clone());
        for group in &self.target_groups {
            self.roster.add_target_group(group.clone());
        }

        let mut peer_set = PeerSet::new(
            client_id.clone(),
            self.factory.clone(),
            self.outbound.clone(),
            self.engine_events.clone(),
        );
        if let Some(source) = self.local_source.clone() {
            peer_set.set_local_source(source).await;
        }
        self.peers = Some(peer_set);

        if self.muted {
            self.send(ClientMessage::MuteChanged { muted: true });
        }

        self.emit(ClientEvent::Joined {
            client_id,
            room,
            peers,
        });

        for peer in self.roster.accepted_peers() {
            self.connect_to(&peer).await;
        }
    }

    async fn connect_to(&mut self, peer: &SessionId) {
        if let Some(peers) = self.peers.as_mut() {
            if let Err(e) = peers.connect_to(peer).await {
                tracing::warn!("Could not start negotiation with {}: {}", peer, e);
            }
        }
    }

    /// Returns `false` once the client has left.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::SetMuted(muted) => {
                self.muted = muted;
                if let Some(me) = self.roster.me().map(|me| me.client_id.clone()) {
                    self.roster.set_muted(&me, muted);
                    self.send(ClientMessage::MuteChanged { muted });
                }
            }
            Command::SetLocalSource(source) => {
                self.local_source = Some(source.clone());
                if let Some(peers) = self.peers.as_mut() {
                    peers.set_local_source(source).await;
                }
            }
            Command::AddTargetGroup(group) => {
                self.target_groups.push(group.clone());
                if self.roster.add_target_group(group) {
                    for peer in self.roster.accepted_peers() {
                        let known = self.peers.as_ref().is_some_and(|p| p.contains(&peer));
                        if !known {
                            self.connect_to(&peer).await;
                        }
                    }
                }
            }
            Command::Leave => {
                self.leave().await;
                return false;
            }
        }
        true
    }

    async fn leave(&mut self) {
        tracing::info!("Leaving room");
        self.reconnector.stop();

        // Dropping the connection flushes the queued leave, then closes
        if let Some(connection) = self.connection.take() {
            connection.send(ClientMessage::Leave);
        }
        self.teardown().await;

        self.emit(ClientEvent::Left);
        self.emit(ClientEvent::Status(ConnectionStatus::Disconnected));
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
