//! Connection listener
//!
//! Accepts client connections and spawns one onboarding task per
//! connection. A failing connection is logged by its own task and never
//! affects the accept loop or any other connection. The number of
//! connections in onboarding at once is bounded by a semaphore; when it is
//! exhausted new connections are closed right after accept, so the
//! listener itself never waits on a client.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time;
use tracing::{error, info, warn};

use crate::config::{Config, Transport};
use crate::connection::Connection;
use crate::crypto::CryptoProvider;
use crate::error::AppError;
use crate::handler::{handle_connection, ServerContext};
use crate::registry::RoomRegistry;

/// The chat server: listener plus shared onboarding state
pub struct Server {
    config: Config,
    ctx: Arc<ServerContext>,
    /// Permits for connections currently in onboarding
    handshakes: Arc<Semaphore>,
}

impl Server {
    /// Create a server with an empty registry around the given keypair
    pub fn new(config: Config, crypto: Arc<dyn CryptoProvider>) -> Self {
        let ctx = Arc::new(ServerContext {
            registry: RoomRegistry::new(config.room_capacity),
            crypto,
            popular_rooms: config.popular_rooms,
            handshake_timeout: config.handshake_timeout,
        });
        let handshakes = Arc::new(Semaphore::new(config.max_handshakes));
        Self {
            config,
            ctx,
            handshakes,
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.ctx.registry
    }

    /// Bind the configured address and serve forever
    pub async fn run(self) -> Result<(), AppError> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!(
            "Chat server listening on {} ({:?})",
            listener.local_addr()?,
            self.config.transport
        );
        self.serve(listener).await;
        Ok(())
    }

    /// Accept connections from an already bound listener
    pub async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let Ok(permit) = Arc::clone(&self.handshakes).try_acquire_owned() else {
                        warn!("Handshake limit reached, closing connection from {}", addr);
                        drop(stream);
                        continue;
                    };

                    info!("New connection from {}", addr);
                    let ctx = Arc::clone(&self.ctx);
                    let transport = self.config.transport;

                    // Spawn handler task for each connection
                    tokio::spawn(async move {
                        if let Err(e) = onboard(stream, addr, transport, ctx).await {
                            error!("Connection handler error for {}: {}", addr, e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Wrap the socket for the configured transport and run onboarding
async fn onboard(
    stream: TcpStream,
    addr: SocketAddr,
    transport: Transport,
    ctx: Arc<ServerContext>,
) -> Result<(), AppError> {
    let conn = match transport {
        Transport::Tcp => Connection::from_stream(stream, addr.to_string()),
        Transport::WebSocket => {
            let upgrade = tokio_tungstenite::accept_async(stream);
            let ws = time::timeout(ctx.handshake_timeout, upgrade)
                .await
                .map_err(|_| AppError::HandshakeTimeout)??;
            Connection::from_websocket(ws, addr.to_string())
        }
    };
    handle_connection(conn, ctx).await
}
