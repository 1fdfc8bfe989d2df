//! Session Registry actor
//!
//! The process-wide owner of all live sessions and rooms. A single task
//! consumes [`RegistryCommand`]s one at a time, so every registry operation
//! is atomic with respect to every other and all mutations and broadcasts
//! are totally ordered by arrival on the command channel.
//!
//! Deliveries never block the actor: each session has a bounded outbound
//! queue and a full queue disconnects that session (see [`Session::deliver`]).

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::{Config, Departure, IdentityMode};
use crate::error::{LedgerError, RegistryError};
use crate::ledger::{find_or_create_room, Ledger, PendingAppend, RoomRecord, RoomWriter};
use crate::message::{MessageType, RoomRef, WireMessage};
use crate::room::Room;
use crate::session::Session;
use crate::types::{Frame, SessionId};

/// Channel buffer size for registry commands
const COMMAND_BUFFER_SIZE: usize = 256;

/// Registry behavior derived from configuration
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub identity_mode: IdentityMode,
    pub history_limit: usize,
    pub replay_history: bool,
    pub departure: Departure,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RegistrySettings {
    fn from(config: &Config) -> Self {
        Self {
            identity_mode: config.identity.mode,
            history_limit: config.rooms.history_limit,
            replay_history: config.rooms.replay_history,
            departure: config.rooms.departure,
        }
    }
}

/// Snapshot of a cached room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub room: RoomRef,
    pub members: usize,
    pub history_len: usize,
}

impl RoomInfo {
    fn of(room: &Room) -> Self {
        Self {
            room: room.to_ref(),
            members: room.member_count(),
            history_len: room.history_len(),
        }
    }
}

/// Commands sent from connections to the Registry actor
#[derive(Debug)]
pub enum RegistryCommand {
    AddClient {
        session: Session,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    RemoveClient {
        session_id: SessionId,
        reply: oneshot::Sender<bool>,
    },
    FindByIdentity {
        identity: String,
        reply: oneshot::Sender<Option<SessionId>>,
    },
    SendDirect {
        target: String,
        frame: Frame,
        reply: oneshot::Sender<bool>,
    },
    BroadcastAll {
        frame: Frame,
        reply: oneshot::Sender<usize>,
    },
    GetOrCreateRoom {
        name: String,
        reply: oneshot::Sender<RoomInfo>,
    },
    RoomInfo {
        name: String,
        reply: oneshot::Sender<Option<RoomInfo>>,
    },
    /// Serialized half of the join protocol; the ledger has already been consulted
    JoinRoom {
        session_id: SessionId,
        record: RoomRecord,
        seed: Vec<Frame>,
        reply: oneshot::Sender<Result<RoomRef, RegistryError>>,
    },
    /// Room broadcast; `append` is queued on the room's ledger writer
    /// in the same step that records history
    BroadcastToRoom {
        room: String,
        frame: Frame,
        append: Option<PendingAppend>,
        reply: oneshot::Sender<usize>,
    },
    UpdateTyping {
        session_id: SessionId,
        is_typing: bool,
        reply: oneshot::Sender<bool>,
    },
    SessionRoom {
        session_id: SessionId,
        reply: oneshot::Sender<Option<RoomRef>>,
    },
    ListIdentities {
        reply: oneshot::Sender<Vec<String>>,
    },
    /// Send a final notice to every session, then close them all
    Shutdown {
        notice: Frame,
        reply: oneshot::Sender<usize>,
    },
}

/// The Registry actor
///
/// Sessions and rooms refer to each other only by id/name lookups through
/// these maps.
pub struct Registry {
    /// All live sessions: SessionId -> Session
    sessions: HashMap<SessionId, Session>,
    /// All cached rooms: name -> Room
    rooms: HashMap<String, Room>,
    /// Handles held by live sessions (handle mode only)
    reserved: HashSet<String>,
    /// Process-wide broadcast log
    history: VecDeque<Frame>,
    /// Next registration sequence number
    next_seq: u64,
    settings: RegistrySettings,
    ledger: Arc<dyn Ledger>,
    /// Per-room append writers: room id -> writer
    writers: HashMap<i64, RoomWriter>,
    /// Command receiver channel
    receiver: mpsc::Receiver<RegistryCommand>,
}

impl Registry {
    /// Create a new Registry with the given command receiver
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        settings: RegistrySettings,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            rooms: HashMap::new(),
            reserved: HashSet::new(),
            history: VecDeque::new(),
            next_seq: 0,
            settings,
            ledger,
            writers: HashMap::new(),
            receiver,
        }
    }

    /// Start the actor on the current runtime and return a handle to it
    pub fn spawn(settings: RegistrySettings, ledger: Arc<dyn Ledger>) -> RegistryHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let history_limit = settings.history_limit;
        tokio::spawn(Registry::new(cmd_rx, settings, ledger.clone()).run());
        RegistryHandle::new(cmd_tx, ledger, history_limit)
    }

    /// Run the Registry event loop
    ///
    /// Continuously receives and processes commands until all handles are dropped.
    pub async fn run(mut self) {
        info!("Registry started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("Registry shutting down");
    }

    /// Process a single command
    ///
    /// A dropped reply receiver only means the caller went away.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::AddClient { session, reply } => {
                let _ = reply.send(self.add_client(session));
            }
            RegistryCommand::RemoveClient { session_id, reply } => {
                let _ = reply.send(self.remove_client(session_id));
            }
            RegistryCommand::FindByIdentity { identity, reply } => {
                let _ = reply.send(self.find_by_identity(&identity));
            }
            RegistryCommand::SendDirect {
                target,
                frame,
                reply,
            } => {
                let _ = reply.send(self.send_direct(&target, &frame));
            }
            RegistryCommand::BroadcastAll { frame, reply } => {
                let _ = reply.send(self.broadcast_all(frame));
            }
            RegistryCommand::GetOrCreateRoom { name, reply } => {
                let _ = reply.send(RoomInfo::of(self.get_or_create_room(&name)));
            }
            RegistryCommand::RoomInfo { name, reply } => {
                let _ = reply.send(self.rooms.get(&name).map(RoomInfo::of));
            }
            RegistryCommand::JoinRoom {
                session_id,
                record,
                seed,
                reply,
            } => {
                let _ = reply.send(self.join_room(session_id, record, seed));
            }
            RegistryCommand::BroadcastToRoom {
                room,
                frame,
                append,
                reply,
            } => {
                let _ = reply.send(self.broadcast_to_room(&room, frame, append));
            }
            RegistryCommand::UpdateTyping {
                session_id,
                is_typing,
                reply,
            } => {
                let _ = reply.send(self.update_typing(session_id, is_typing));
            }
            RegistryCommand::SessionRoom { session_id, reply } => {
                let _ = reply.send(self.session_room(session_id));
            }
            RegistryCommand::ListIdentities { reply } => {
                let identities: BTreeSet<String> =
                    self.sessions.values().map(|s| s.identity.clone()).collect();
                let _ = reply.send(identities.into_iter().collect());
            }
            RegistryCommand::Shutdown { notice, reply } => {
                let _ = reply.send(self.shutdown(notice));
            }
        }
    }

    /// Register a session
    ///
    /// An id collision replaces the previous session.
    fn add_client(&mut self, mut session: Session) -> Result<(), RegistryError> {
        if self.settings.identity_mode == IdentityMode::Handle {
            if self.reserved.contains(&session.identity) {
                info!("Handle '{}' rejected: already taken", session.identity);
                return Err(RegistryError::IdentityTaken(session.identity));
            }
            self.reserved.insert(session.identity.clone());
        }

        session.seq = self.next_seq;
        self.next_seq += 1;

        let id = session.id;
        info!("Session {} ({}) added", id, session.identity);
        if let Some(replaced) = self.sessions.insert(id, session) {
            warn!("Session {} replaced", id);
            self.reserved.remove(&replaced.identity);
            if let Some(room) = replaced.room {
                self.detach(id, &room);
            }
        }

        debug!(
            "Total sessions: {}, Total rooms: {}",
            self.sessions.len(),
            self.rooms.len()
        );
        Ok(())
    }

    /// Remove a session, its room membership and its reserved handle
    fn remove_client(&mut self, session_id: SessionId) -> bool {
        let Some(session) = self.sessions.remove(&session_id) else {
            return false;
        };
        self.reserved.remove(&session.identity);

        let left = session
            .room
            .as_deref()
            .and_then(|room| self.detach(session_id, room));

        match self.settings.departure {
            Departure::Room => {
                if let Some(room) = left {
                    let notice = format!("{} has left the room.", session.identity);
                    if let Some(frame) = encode(&WireMessage::system(notice, Some(room.clone()))) {
                        self.deliver_to_room(&room.name, &frame, None);
                    }
                }
            }
            Departure::Server => {
                let notice = format!("{} has left the chat.", session.identity);
                if let Some(frame) = encode(&WireMessage::system(notice, None)) {
                    self.broadcast_all(frame);
                }
            }
        }

        info!("Session {} ({}) removed", session_id, session.identity);
        debug!(
            "Total sessions: {}, Total rooms: {}",
            self.sessions.len(),
            self.rooms.len()
        );
        true
    }

    /// The earliest-registered live session with this identity
    fn find_by_identity(&self, identity: &str) -> Option<SessionId> {
        self.sessions
            .values()
            .filter(|s| s.identity == identity)
            .min_by_key(|s| s.seq)
            .map(|s| s.id)
    }

    fn send_direct(&self, target: &str, frame: &Frame) -> bool {
        let Some(session) = self
            .find_by_identity(target)
            .and_then(|id| self.sessions.get(&id))
        else {
            return false;
        };
        if let Err(e) = session.deliver(frame) {
            warn!("Error delivering direct message to {}: {}", session.id, e);
        }
        true
    }

    /// Record a frame in the process-wide log and deliver it to every session
    fn broadcast_all(&mut self, frame: Frame) -> usize {
        self.history.push_back(frame.clone());
        if self.settings.history_limit > 0 {
            while self.history.len() > self.settings.history_limit {
                self.history.pop_front();
            }
        }

        let mut delivered = 0;
        for session in self.sessions.values() {
            match session.deliver(&frame) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Error writing message to session {}: {}", session.id, e),
            }
        }
        delivered
    }

    /// Queue the notice ahead of the close signal so writers flush it first
    fn shutdown(&mut self, notice: Frame) -> usize {
        self.broadcast_all(notice);
        for session in self.sessions.values() {
            session.close();
        }
        info!("Closing {} sessions", self.sessions.len());
        self.sessions.len()
    }

    fn get_or_create_room(&mut self, name: &str) -> &mut Room {
        let history_limit = self.settings.history_limit;
        self.rooms.entry(name.to_string()).or_insert_with(|| {
            debug!("Room {} cached", name);
            Room::new(name, history_limit)
        })
    }

    /// Membership half of the join protocol
    fn join_room(
        &mut self,
        session_id: SessionId,
        record: RoomRecord,
        seed: Vec<Frame>,
    ) -> Result<RoomRef, RegistryError> {
        let Some(session) = self.sessions.get(&session_id) else {
            return Err(RegistryError::UnknownSession);
        };
        let identity = session.identity.clone();
        let previous = session.room.clone();

        let room = self.get_or_create_room(&record.name);
        if !room.sync(record.id, seed) && room.id != record.id {
            error!(
                "Room {} cached with id {} but ledger has {}",
                room.name, room.id, record.id
            );
        }
        let room_ref = room.to_ref();

        if previous.as_deref() != Some(record.name.as_str()) {
            if let Some(previous) = previous {
                if let Some(left) = self.detach(session_id, &previous) {
                    let notice = format!("{identity} has left the room.");
                    if let Some(frame) = encode(&WireMessage::system(notice, Some(left))) {
                        self.deliver_to_room(&previous, &frame, None);
                    }
                }
            }

            if let Some(room) = self.rooms.get_mut(&record.name) {
                room.add_member(session_id);
            }
            if let Some(session) = self.sessions.get_mut(&session_id) {
                session.room = Some(record.name.clone());
            }

            let notice = format!("{identity} has joined the room.");
            if let Some(frame) = encode(&WireMessage::system(notice, Some(room_ref.clone()))) {
                self.deliver_to_room(&record.name, &frame, Some(session_id));
            }
            info!("Session {} ({}) joined room {}", session_id, identity, record.name);
        }

        self.welcome(session_id, &room_ref);
        Ok(room_ref)
    }

    /// Confirm a join to the joiner and replay room history
    ///
    /// Replay stops quietly when the joiner's queue is full.
    fn welcome(&self, session_id: SessionId, room_ref: &RoomRef) {
        let Some(session) = self.sessions.get(&session_id) else {
            return;
        };

        let text = format!("You have joined the room: {}", room_ref.name);
        if let Some(frame) = encode(&WireMessage::system(text, Some(room_ref.clone()))) {
            if let Err(e) = session.deliver(&frame) {
                warn!("Error confirming join to {}: {}", session_id, e);
            }
        }

        if !self.settings.replay_history {
            return;
        }
        let Some(room) = self.rooms.get(&room_ref.name) else {
            return;
        };
        for frame in room.history() {
            if let Err(e) = session.offer(frame) {
                debug!("History replay to {} truncated: {}", session_id, e);
                break;
            }
        }
    }

    /// Append to room history, queue the ledger append, then fan out
    ///
    /// History and ledger appends for a room happen in the same order.
    fn broadcast_to_room(
        &mut self,
        name: &str,
        frame: Frame,
        append: Option<PendingAppend>,
    ) -> usize {
        let Some(room) = self.rooms.get_mut(name) else {
            warn!("Room {} does not exist, dropping broadcast", name);
            if let Some(append) = append {
                append.fail(LedgerError::Unavailable(format!("room {name} does not exist")));
            }
            return 0;
        };
        room.push_history(frame.clone());
        let room_id = room.id;

        if let Some(append) = append {
            if room_id == 0 {
                append.fail(LedgerError::Unavailable(format!("room {name} is not recorded")));
            } else {
                let ledger = &self.ledger;
                self.writers
                    .entry(room_id)
                    .or_insert_with(|| RoomWriter::spawn(ledger.clone(), room_id))
                    .submit(append);
            }
        }

        self.deliver_to_room(name, &frame, None)
    }

    /// Change typing state and tell the rest of the room
    ///
    /// Returns false when nothing changed (no room, or same state).
    fn update_typing(&mut self, session_id: SessionId, is_typing: bool) -> bool {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return false;
        };
        let Some(room_name) = session.room.clone() else {
            return false;
        };
        if !session.set_typing(is_typing) {
            return false;
        }
        let identity = session.identity.clone();

        let room_ref = self.rooms.get(&room_name).map(Room::to_ref);
        let content = if is_typing {
            "is typing..."
        } else {
            "stopped typing"
        };
        let message = WireMessage::outbound(MessageType::Typing, content, identity, room_ref);
        if let Some(frame) = encode(&message) {
            self.deliver_to_room(&room_name, &frame, Some(session_id));
        }
        true
    }

    fn session_room(&self, session_id: SessionId) -> Option<RoomRef> {
        let room = self.sessions.get(&session_id)?.room.as_ref()?;
        self.rooms.get(room).map(Room::to_ref)
    }

    /// Remove a session from a room's members and clear its room reference
    fn detach(&mut self, session_id: SessionId, room_name: &str) -> Option<RoomRef> {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.room = None;
            session.is_typing = false;
        }
        let room = self.rooms.get_mut(room_name)?;
        if !room.remove_member(session_id) {
            return None;
        }
        debug!("Session {} left room {}", session_id, room_name);
        Some(room.to_ref())
    }

    /// Deliver a frame to room members, isolating per-recipient failures
    fn deliver_to_room(&self, name: &str, frame: &Frame, skip: Option<SessionId>) -> usize {
        let Some(room) = self.rooms.get(name) else {
            return 0;
        };

        let mut delivered = 0;
        for member_id in room.members() {
            if Some(member_id) == skip {
                continue;
            }
            let Some(member) = self.sessions.get(&member_id) else {
                continue;
            };
            match member.deliver(frame) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Error sending to {} in room {}: {}", member_id, name, e),
            }
        }
        delivered
    }
}

fn encode(message: &WireMessage) -> Option<Frame> {
    match message.to_frame() {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!("Failed to serialize message: {}", e);
            None
        }
    }
}

/// Cloneable front door to the Registry actor
///
/// Every method is safe to call from any number of connection tasks.
#[derive(Clone)]
pub struct RegistryHandle {
    sender: mpsc::Sender<RegistryCommand>,
    ledger: Arc<dyn Ledger>,
    history_limit: usize,
}

impl RegistryHandle {
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        ledger: Arc<dyn Ledger>,
        history_limit: usize,
    ) -> Self {
        Self {
            sender,
            ledger,
            history_limit,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryCommand,
    ) -> Result<T, RegistryError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(build(reply))
            .await
            .map_err(|_| RegistryError::Closed)?;
        response.await.map_err(|_| RegistryError::Closed)
    }

    pub async fn add_client(&self, session: Session) -> Result<(), RegistryError> {
        self.request(|reply| RegistryCommand::AddClient { session, reply })
            .await?
    }

    /// Returns false if the session was not registered
    pub async fn remove_client(&self, session_id: SessionId) -> Result<bool, RegistryError> {
        self.request(|reply| RegistryCommand::RemoveClient { session_id, reply })
            .await
    }

    pub async fn find_by_identity(
        &self,
        identity: &str,
    ) -> Result<Option<SessionId>, RegistryError> {
        let identity = identity.to_string();
        self.request(|reply| RegistryCommand::FindByIdentity { identity, reply })
            .await
    }

    /// Deliver to the first live session holding `target`; false if none
    pub async fn send_direct(&self, target: &str, frame: Frame) -> Result<bool, RegistryError> {
        let target = target.to_string();
        self.request(|reply| RegistryCommand::SendDirect {
            target,
            frame,
            reply,
        })
        .await
    }

    /// Returns the number of sessions the frame was queued for
    pub async fn broadcast_all(&self, frame: Frame) -> Result<usize, RegistryError> {
        self.request(|reply| RegistryCommand::BroadcastAll { frame, reply })
            .await
    }

    pub async fn get_or_create_room(&self, name: &str) -> Result<RoomInfo, RegistryError> {
        let name = name.to_string();
        self.request(|reply| RegistryCommand::GetOrCreateRoom { name, reply })
            .await
    }

    pub async fn room_info(&self, name: &str) -> Result<Option<RoomInfo>, RegistryError> {
        let name = name.to_string();
        self.request(|reply| RegistryCommand::RoomInfo { name, reply })
            .await
    }

    /// Join (creating if needed) a room
    ///
    /// The ledger is consulted first; if it fails, nothing changes.
    pub async fn join_room(
        &self,
        name: &str,
        session_id: SessionId,
    ) -> Result<RoomRef, RegistryError> {
        let record = find_or_create_room(self.ledger.as_ref(), name).await?;

        let cached = self
            .room_info(name)
            .await?
            .is_some_and(|info| info.room.id != 0);
        let seed = if cached {
            Vec::new()
        } else {
            self.load_seed(&record).await
        };

        self.request(|reply| RegistryCommand::JoinRoom {
            session_id,
            record,
            seed,
            reply,
        })
        .await?
    }

    /// Recent ledger messages as frames, for a room's first cache fill
    async fn load_seed(&self, record: &RoomRecord) -> Vec<Frame> {
        let stored = match self
            .ledger
            .recent_messages(record.id, self.history_limit)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                warn!("Could not load history for room {}: {}", record.name, e);
                return Vec::new();
            }
        };

        let room_ref = RoomRef::new(record.id, record.name.clone());
        stored
            .into_iter()
            .filter_map(|msg| {
                let message = WireMessage::outbound(
                    MessageType::Regular,
                    msg.content,
                    msg.sender,
                    Some(room_ref.clone()),
                )
                .with_timestamp(msg.created_at);
                encode(&message)
            })
            .collect()
    }

    /// Returns the number of members the frame was queued for
    pub async fn broadcast_to_room(&self, room: &str, frame: Frame) -> Result<usize, RegistryError> {
        let room = room.to_string();
        self.request(|reply| RegistryCommand::BroadcastToRoom {
            room,
            frame,
            append: None,
            reply,
        })
        .await
    }

    /// Broadcast a member's message, then wait for its ledger append
    ///
    /// Appends commit in history order. Delivery stands whatever the
    /// append outcome.
    pub async fn post_to_room(
        &self,
        room: &str,
        frame: Frame,
        sender: &str,
        content: &str,
    ) -> Result<Result<(), LedgerError>, RegistryError> {
        let (done, committed) = oneshot::channel();
        let append = PendingAppend {
            sender: sender.to_string(),
            content: content.to_string(),
            done,
        };
        let room = room.to_string();
        self.request(|reply| RegistryCommand::BroadcastToRoom {
            room,
            frame,
            append: Some(append),
            reply,
        })
        .await?;

        Ok(committed
            .await
            .unwrap_or_else(|_| Err(LedgerError::Unavailable("append dropped".to_string()))))
    }

    /// Returns true if the state changed and the room was notified
    pub async fn update_typing(
        &self,
        session_id: SessionId,
        is_typing: bool,
    ) -> Result<bool, RegistryError> {
        self.request(|reply| RegistryCommand::UpdateTyping {
            session_id,
            is_typing,
            reply,
        })
        .await
    }

    pub async fn session_room(&self, session_id: SessionId) -> Result<Option<RoomRef>, RegistryError> {
        self.request(|reply| RegistryCommand::SessionRoom { session_id, reply })
            .await
    }

    /// Returns the number of sessions asked to close
    pub async fn shutdown(&self, notice: Frame) -> Result<usize, RegistryError> {
        self.request(|reply| RegistryCommand::Shutdown { notice, reply })
            .await
    }

    /// Distinct identities of live sessions, sorted
    pub async fn list_identities(&self) -> Result<Vec<String>, RegistryError> {
        self.request(|reply| RegistryCommand::ListIdentities { reply })
            .await
    }
}
