//! Room and room session
//!
//! A `Room` is a named chat session with an optional password and a
//! bounded member list. Joined members are driven by a session actor
//! that starts with the first member and relays every message a member
//! sends to all other members. Messages are opaque to the server:
//! clients encrypt them end to end using the room's key listing.
//!
//! The session never waits on a member: a member whose outbox is full is
//! disconnected, and membership events travel on their own unbounded
//! channel so joining never queues behind relayed traffic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::AppError;
use crate::message::join_listing;
use crate::registry::RoomRegistry;
use crate::types::{ClientId, PasswordHash};

/// Channel buffer size for relayed messages
const RELAY_BUFFER_SIZE: usize = 256;

/// Channel buffer size for each member's outbound messages
const OUTBOX_BUFFER_SIZE: usize = 32;

/// A joined participant
#[derive(Debug, Clone)]
pub struct Member {
    pub id: ClientId,
    pub username: String,
    /// Public key in wire form, shared with the other members
    pub public_key: String,
}

/// Member list plus the closed flag, guarded together
#[derive(Debug, Default)]
struct Members {
    list: Vec<Member>,
    /// Set once the room has been emptied and unregistered
    closed: bool,
}

/// Membership events consumed by the room session
#[derive(Debug)]
enum RoomEvent {
    /// Member registered; outbound messages go through `outbox`
    Joined {
        member_id: ClientId,
        outbox: mpsc::Sender<String>,
        kick: CancellationToken,
    },
    /// Member's connection ended
    Left { member_id: ClientId },
}

/// A message from one member for the rest of the room
#[derive(Debug)]
struct Relay {
    from: ClientId,
    text: String,
}

/// Session-side handle on a member's connection task
struct MemberLink {
    outbox: mpsc::Sender<String>,
    /// Cancelling ends the member's connection task
    kick: CancellationToken,
}

/// Receiving ends of the room channels, taken when the session starts
struct Inbox {
    events: mpsc::UnboundedReceiver<RoomEvent>,
    relays: mpsc::Receiver<Relay>,
}

/// Named chat room
pub struct Room {
    name: String,
    password: PasswordHash,
    capacity: usize,
    members: RwLock<Members>,
    /// True until the session loop has been started
    is_new: AtomicBool,
    events: mpsc::UnboundedSender<RoomEvent>,
    relays: mpsc::Sender<Relay>,
    inbox: Mutex<Option<Inbox>>,
    registry: Weak<RoomRegistry>,
}

impl Room {
    /// Create an empty room; the session loop is not running yet
    pub fn new(
        name: String,
        password: PasswordHash,
        capacity: usize,
        registry: Weak<RoomRegistry>,
    ) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (relays, relays_rx) = mpsc::channel(RELAY_BUFFER_SIZE);
        Self {
            name,
            password,
            capacity,
            members: RwLock::new(Members::default()),
            is_new: AtomicBool::new(true),
            events,
            relays,
            inbox: Mutex::new(Some(Inbox {
                events: events_rx,
                relays: relays_rx,
            })),
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_password(&self) -> bool {
        self.password.is_set()
    }

    /// Check a password hash offered by a joining client
    pub fn password_matches(&self, offered: &str) -> bool {
        self.password.matches(offered)
    }

    /// Whether the session loop has not been started yet
    pub fn is_new(&self) -> bool {
        self.is_new.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of members
    pub async fn population(&self) -> usize {
        self.members.read().await.list.len()
    }

    pub async fn is_closed(&self) -> bool {
        self.members.read().await.closed
    }

    /// Usernames in join order, `;`-separated
    pub async fn user_listing(&self) -> String {
        let members = self.members.read().await;
        join_listing(members.list.iter().map(|m| m.username.as_str()))
    }

    /// Member public keys in join order, `;`-separated
    pub async fn key_listing(&self) -> String {
        let members = self.members.read().await;
        join_listing(members.list.iter().map(|m| m.public_key.as_str()))
    }

    /// Hand a connection over to the room
    ///
    /// The capacity check and the insert happen under one lock. A full or
    /// closed room closes the connection without sending anything.
    /// Returns the population after the join.
    pub async fn add_user(
        &self,
        member_id: ClientId,
        username: String,
        conn: Connection,
        public_key: String,
    ) -> Result<usize, AppError> {
        let refusal = {
            let mut members = self.members.write().await;
            if members.closed {
                Some(AppError::RoomClosed(self.name.clone()))
            } else if members.list.len() >= self.capacity {
                Some(AppError::RoomFull)
            } else {
                members.list.push(Member {
                    id: member_id,
                    username: username.clone(),
                    public_key,
                });
                None
            }
        };
        if let Some(err) = refusal {
            conn.close().await;
            return Err(err);
        }

        let (outbox, outbox_rx) = mpsc::channel(OUTBOX_BUFFER_SIZE);
        let kick = CancellationToken::new();
        let joined = RoomEvent::Joined {
            member_id,
            outbox,
            kick: kick.clone(),
        };
        if self.events.send(joined).is_err() {
            warn!("Room '{}' session is gone, dropping {}", self.name, username);
        }
        spawn_member(
            member_id,
            conn,
            outbox_rx,
            kick,
            self.events.clone(),
            self.relays.clone(),
        );

        let population = self.population().await;
        info!(
            "'{}' ({}) joined room '{}' ({}/{})",
            username, member_id, self.name, population, self.capacity
        );
        Ok(population)
    }

    /// Start the session loop
    ///
    /// Only the first call starts anything; returns whether this call did.
    pub fn start(self: &Arc<Self>) -> bool {
        if self
            .is_new
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let inbox = self.inbox.lock().ok().and_then(|mut inbox| inbox.take());
        let Some(inbox) = inbox else {
            warn!("Room '{}' has no event inbox, session not started", self.name);
            return false;
        };

        tokio::spawn(RoomSession::new(Arc::clone(self), inbox).run());
        true
    }

    /// Remove a member, returning how many remain
    async fn remove_member(&self, member_id: ClientId) -> usize {
        let mut members = self.members.write().await;
        members.list.retain(|m| m.id != member_id);
        members.list.len()
    }

    /// Mark the room closed if nobody is in it
    pub(crate) async fn close_if_empty(&self) -> bool {
        let mut members = self.members.write().await;
        if members.list.is_empty() {
            members.closed = true;
        }
        members.closed
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("name", &self.name)
            .field("password", &self.password)
            .field("capacity", &self.capacity)
            .field("is_new", &self.is_new())
            .finish()
    }
}

/// Pump one member's connection: inbound frames are relayed to the room,
/// outbox messages are written to the socket.
fn spawn_member(
    member_id: ClientId,
    conn: Connection,
    mut outbox: mpsc::Receiver<String>,
    kick: CancellationToken,
    events: mpsc::UnboundedSender<RoomEvent>,
    relays: mpsc::Sender<Relay>,
) {
    tokio::spawn(async move {
        let (mut sink, mut stream) = conn.into_split();

        let read = async {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(text) => {
                        let relay = Relay {
                            from: member_id,
                            text,
                        };
                        if relays.send(relay).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Read error for member {}: {}", member_id, e);
                        break;
                    }
                }
            }
        };

        let write = async {
            while let Some(text) = outbox.recv().await {
                if sink.send(text).await.is_err() {
                    debug!("Send failed for member {}", member_id);
                    break;
                }
            }
        };

        let kicked = tokio::select! {
            _ = read => false,
            _ = write => false,
            _ = kick.cancelled() => true,
        };

        // A kicked member stopped reading; flushing to it could hang
        if !kicked {
            let _ = sink.close().await;
        }
        let _ = events.send(RoomEvent::Left { member_id });
    });
}

/// Session actor for one room
///
/// Owns the outbound channel of every member and relays messages.
struct RoomSession {
    room: Arc<Room>,
    members: HashMap<ClientId, MemberLink>,
    inbox: Inbox,
}

impl RoomSession {
    fn new(room: Arc<Room>, inbox: Inbox) -> Self {
        Self {
            room,
            members: HashMap::new(),
            inbox,
        }
    }

    /// Process events until the room empties and is unregistered
    async fn run(mut self) {
        info!("Room '{}' session started", self.room.name());

        loop {
            tokio::select! {
                biased;
                Some(event) = self.inbox.events.recv() => {
                    if !self.handle_event(event).await {
                        break;
                    }
                }
                Some(relay) = self.inbox.relays.recv() => self.relay(relay),
                else => break,
            }
        }

        info!("Room '{}' session ended", self.room.name());
    }

    /// Returns false once the session should stop
    async fn handle_event(&mut self, event: RoomEvent) -> bool {
        match event {
            RoomEvent::Joined {
                member_id,
                outbox,
                kick,
            } => {
                self.members.insert(member_id, MemberLink { outbox, kick });
                debug!(
                    "Room '{}' relaying for {} members",
                    self.room.name(),
                    self.members.len()
                );
                true
            }
            RoomEvent::Left { member_id } => self.handle_left(member_id).await,
        }
    }

    /// Fan a message out without waiting on any member
    fn relay(&mut self, relay: Relay) {
        let mut lagging = Vec::new();
        for (member_id, link) in &self.members {
            if *member_id == relay.from {
                continue;
            }
            if let Err(TrySendError::Full(_)) = link.outbox.try_send(relay.text.clone()) {
                lagging.push(*member_id);
            }
        }

        for member_id in lagging {
            if let Some(link) = self.members.remove(&member_id) {
                warn!(
                    "Member {} in room '{}' is not reading, disconnecting",
                    member_id,
                    self.room.name()
                );
                link.kick.cancel();
            }
        }
    }

    async fn handle_left(&mut self, member_id: ClientId) -> bool {
        self.members.remove(&member_id);
        let remaining = self.room.remove_member(member_id).await;
        info!(
            "Member {} left room '{}' ({} remaining)",
            member_id,
            self.room.name(),
            remaining
        );

        if remaining > 0 {
            return true;
        }

        match self.room.registry.upgrade() {
            Some(registry) => !registry.remove_if_empty(&self.room).await,
            None => false,
        }
    }
}
