//! Connection onboarding handler
//!
//! Drives one client through the onboarding handshake, in strict lockstep:
//!
//! 1. key exchange (plaintext public keys)
//! 2. popular-rooms advert
//! 3. room selection or creation, repeated until settled
//! 4. password check for protected rooms, retried until it matches
//! 5. username and listings, then handoff of the connection to the room
//!
//! Everything after the key exchange is encrypted: outbound messages to
//! the client's key, inbound messages with the server's own key.
//!
//! Steps 1 to 5 share one deadline. A client that created a room and then
//! fails or times out before joining it takes the empty room down with it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::crypto::{CryptoProvider, PublicKey};
use crate::error::AppError;
use crate::message::{format_popular_rooms, is_ack, Reply, MAX_ROOM_NAME_LEN, MAX_USERNAME_LEN};
use crate::registry::RoomRegistry;
use crate::room::Room;
use crate::types::{ClientId, PasswordHash};

/// Shared state every connection handler works against
pub struct ServerContext {
    pub registry: Arc<RoomRegistry>,
    pub crypto: Arc<dyn CryptoProvider>,
    /// Number of rooms advertised after the key exchange
    pub popular_rooms: usize,
    /// Deadline for a connection to get from accept to handoff
    pub handshake_timeout: Duration,
}

/// Onboard a new connection and hand it off to a room
///
/// Returns `Ok` once the connection belongs to a room, or was refused
/// because the room was full or closed. Any other error means the
/// handshake broke off.
pub async fn handle_connection(conn: Connection, ctx: Arc<ServerContext>) -> Result<(), AppError> {
    let client_id = ClientId::new();
    info!("Client {} connected from {}", client_id, conn.peer());

    let mut created = None;
    let negotiated = time::timeout(
        ctx.handshake_timeout,
        negotiate(conn, &ctx, client_id, &mut created),
    )
    .await;

    let err = match negotiated {
        Ok(Ok((session, room, username))) => return session.join(room, username).await,
        Ok(Err(e)) => e,
        Err(_) => {
            warn!("Client {} handshake timed out", client_id);
            AppError::HandshakeTimeout
        }
    };

    if let Some(room) = created {
        if ctx.registry.remove_if_empty(&room).await {
            info!(
                "Client {} abandoned new room '{}', removed",
                client_id,
                room.name()
            );
        }
    }
    Err(err)
}

/// Run the handshake up to the point where the room is settled and the
/// client has named itself
///
/// A room created along the way is reported through `created` so the
/// caller can clean it up if the handshake does not finish.
async fn negotiate(
    conn: Connection,
    ctx: &ServerContext,
    client_id: ClientId,
    created: &mut Option<Arc<Room>>,
) -> Result<(EncryptedSession, Arc<Room>, String), AppError> {
    let mut session = exchange_keys(conn, ctx, client_id).await?;
    session.advertise_popular_rooms(&ctx.registry, ctx.popular_rooms).await?;

    let room = match session.select_room(&ctx.registry).await? {
        Selection::Existing(room) => room,
        Selection::Created(room) => {
            *created = Some(Arc::clone(&room));
            room
        }
    };

    let username = session.exchange_listings(&room).await?;
    Ok((session, room, username))
}

/// Perform the plaintext key exchange
async fn exchange_keys(
    mut conn: Connection,
    ctx: &ServerContext,
    client_id: ClientId,
) -> Result<EncryptedSession, AppError> {
    conn.send(ctx.crypto.public_key()).await?;
    let client_key = ctx.crypto.parse_public_key(&conn.recv().await?)?;
    debug!("Client {} key exchange complete", client_id);

    Ok(EncryptedSession {
        conn,
        crypto: Arc::clone(&ctx.crypto),
        client_id,
        client_key,
    })
}

/// Reject names longer than `limit` bytes
fn check_len(field: &'static str, value: &str, limit: usize) -> Result<(), AppError> {
    if value.len() > limit {
        return Err(AppError::NameTooLong {
            field,
            len: value.len(),
            limit,
        });
    }
    Ok(())
}

/// Outcome of room selection
enum Selection {
    Existing(Arc<Room>),
    Created(Arc<Room>),
}

/// A connection past the key exchange
struct EncryptedSession {
    conn: Connection,
    crypto: Arc<dyn CryptoProvider>,
    client_id: ClientId,
    client_key: PublicKey,
}

impl EncryptedSession {
    async fn send(&mut self, text: &str) -> Result<(), AppError> {
        let sealed = self.crypto.encrypt(text, &self.client_key)?;
        self.conn.send(sealed).await
    }

    async fn reply(&mut self, reply: Reply) -> Result<(), AppError> {
        self.send(reply.as_str()).await
    }

    async fn recv(&mut self) -> Result<String, AppError> {
        let sealed = self.conn.recv().await?;
        Ok(self.crypto.decrypt(&sealed)?)
    }

    async fn advertise_popular_rooms(
        &mut self,
        registry: &RoomRegistry,
        limit: usize,
    ) -> Result<(), AppError> {
        let rooms = registry.snapshot_ordered_by_population(limit).await;
        self.send(&format_popular_rooms(&rooms)).await
    }

    /// Loop until the client has picked an existing room (and passed its
    /// password check) or created a new one
    async fn select_room(&mut self, registry: &Arc<RoomRegistry>) -> Result<Selection, AppError> {
        loop {
            let name = self.recv().await?;
            check_len("room name", &name, MAX_ROOM_NAME_LEN)?;

            if let Some(room) = registry.lookup(&name).await {
                self.reply(Reply::Ack).await?;
                if room.has_password() {
                    self.reply(Reply::Password).await?;
                    self.verify_password(&room).await?;
                } else {
                    self.reply(Reply::NoPass).await?;
                }
                debug!("Client {} selected room '{}'", self.client_id, name);
                return Ok(Selection::Existing(room));
            }

            self.reply(Reply::New).await?;
            if !is_ack(&self.recv().await?) {
                debug!("Client {} declined to create '{}'", self.client_id, name);
                continue;
            }

            let password = PasswordHash::new(self.recv().await?);
            // Losing a creation race is fatal for this connection; the
            // client never learns the room existed.
            let room = registry.create(name, password).await?;
            debug!("Client {} created room '{}'", self.client_id, room.name());
            return Ok(Selection::Created(room));
        }
    }

    /// Retry until the offered hash matches; no limit, no backoff
    async fn verify_password(&mut self, room: &Room) -> Result<(), AppError> {
        let mut failures = 0u64;
        loop {
            let offered = self.recv().await?;
            if room.password_matches(&offered) {
                return self.reply(Reply::Ack).await;
            }

            failures += 1;
            warn!(
                "Client {} wrong password for room '{}' (attempt {})",
                self.client_id,
                room.name(),
                failures
            );
            self.reply(Reply::Nack).await?;
        }
    }

    /// Send the user listing, take the username, then send both listings
    async fn exchange_listings(&mut self, room: &Room) -> Result<String, AppError> {
        let users = room.user_listing().await;
        self.send(&users).await?;
        let username = self.recv().await?;
        check_len("username", &username, MAX_USERNAME_LEN)?;

        let users = room.user_listing().await;
        self.send(&users).await?;
        let keys = room.key_listing().await;
        self.send(&keys).await?;
        Ok(username)
    }

    /// Give the connection to the room, starting its session if needed
    async fn join(self, room: Arc<Room>, username: String) -> Result<(), AppError> {
        let client_id = self.client_id;
        // Forward the canonical encoding, never the raw text the client sent
        let public_key = self.client_key.to_base64();
        match room.add_user(client_id, username, self.conn, public_key).await {
            Ok(_) => {
                if room.start() {
                    debug!("Client {} started room '{}'", client_id, room.name());
                }
                Ok(())
            }
            Err(e) if e.is_refusal() => {
                info!("Client {} dropped from room '{}': {}", client_id, room.name(), e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
