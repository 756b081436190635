//! Framed text connection
//!
//! Hides the transport behind a pair of boxed sink/stream halves carrying
//! one UTF-8 string per logical message:
//! - raw byte streams use a 2-byte big-endian length prefix
//! - WebSocket streams carry each message as one text frame

use std::pin::Pin;

use bytes::Bytes;
use futures_util::future;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::AppError;

/// Largest payload a 2-byte length prefix can describe
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Outbound half of a connection
pub type FrameSink = Pin<Box<dyn Sink<String, Error = AppError> + Send>>;

/// Inbound half of a connection
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;

/// A client connection exchanging whole text messages
pub struct Connection {
    peer: String,
    sink: FrameSink,
    stream: FrameStream,
}

impl Connection {
    /// Wrap a byte stream with length-prefixed framing
    pub fn from_stream<T>(io: T, peer: impl Into<String>) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let codec = LengthDelimitedCodec::builder()
            .length_field_length(2)
            .max_frame_length(MAX_FRAME_LEN)
            .new_codec();
        let (sink, stream) = Framed::new(io, codec).split::<Bytes>();

        let sink = sink.with(|text: String| future::ready(Ok::<_, AppError>(Bytes::from(text))));
        let stream = stream.map(|frame| -> Result<String, AppError> {
            let frame = frame?;
            Ok(String::from_utf8(frame.to_vec())?)
        });

        Self {
            peer: peer.into(),
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Wrap an accepted WebSocket stream, one text frame per message
    ///
    /// Ping, pong and binary frames are skipped. A close frame ends the
    /// connection.
    pub fn from_websocket<T>(ws: WebSocketStream<T>, peer: impl Into<String>) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split::<Message>();

        let sink = sink.with(|text: String| future::ready(Ok::<_, AppError>(Message::Text(text.into()))));
        let stream = stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    Ok(_) => None,
                    Err(e) => Some(Err(AppError::from(e))),
                })
            });

        Self {
            peer: peer.into(),
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    /// Remote address, for logging
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Send one message
    pub async fn send(&mut self, text: impl Into<String>) -> Result<(), AppError> {
        self.sink.send(text.into()).await
    }

    /// Receive the next message
    ///
    /// Returns `AppError::ConnectionClosed` once the peer has gone away.
    pub async fn recv(&mut self) -> Result<String, AppError> {
        self.stream
            .next()
            .await
            .unwrap_or(Err(AppError::ConnectionClosed))
    }

    /// Flush and close the outbound half, then drop the connection
    pub async fn close(mut self) {
        let _ = self.sink.close().await;
    }

    /// Split into independent halves for a room session
    pub fn into_split(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_messages_cross_a_pipe() {
        let (a, b) = duplex(1024);
        let mut left = Connection::from_stream(a, "left");
        let mut right = Connection::from_stream(b, "right");

        left.send("hello").await.unwrap();
        left.send("").await.unwrap();
        assert_eq!(right.recv().await.unwrap(), "hello");
        assert_eq!(right.recv().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_wire_format_is_two_byte_big_endian_prefix() {
        let (a, mut raw) = duplex(1024);
        let mut conn = Connection::from_stream(a, "peer");

        conn.send("NEW").await.unwrap();
        let mut buf = [0u8; 5];
        raw.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, &[0x00, 0x03, b'N', b'E', b'W']);

        raw.write_all(&[0x00, 0x03, b'A', b'C', b'K']).await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), "ACK");
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_an_error() {
        let (a, mut raw) = duplex(1024);
        let mut conn = Connection::from_stream(a, "peer");

        raw.write_all(&[0x00, 0x02, 0xff, 0xfe]).await.unwrap();
        assert!(matches!(conn.recv().await, Err(AppError::Utf8(_))));
    }

    #[tokio::test]
    async fn test_recv_after_peer_closes() {
        let (a, b) = duplex(1024);
        let mut conn = Connection::from_stream(a, "peer");
        let other = Connection::from_stream(b, "other");

        other.close().await;
        assert!(matches!(conn.recv().await, Err(AppError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_websocket_text_frames() {
        let (a, b) = duplex(4096);
        let server_ws =
            WebSocketStream::from_raw_socket(a, tokio_tungstenite::tungstenite::protocol::Role::Server, None);
        let client_ws =
            WebSocketStream::from_raw_socket(b, tokio_tungstenite::tungstenite::protocol::Role::Client, None);
        let (server_ws, client_ws) = tokio::join!(server_ws, client_ws);

        let mut server = Connection::from_websocket(server_ws, "server");
        let mut client = Connection::from_websocket(client_ws, "client");

        client.send("lobby").await.unwrap();
        assert_eq!(server.recv().await.unwrap(), "lobby");

        server.send("NEW").await.unwrap();
        assert_eq!(client.recv().await.unwrap(), "NEW");
    }
}
