//! Connection-facing seams of a session.
//!
//! A session only sees two halves of its connection: a [`ControlSource`]
//! the control receiver reads from, and a [`FrameSink`] the frame
//! scheduler writes to. The WebSocket binding lives in [`websocket`].

pub mod websocket;

use std::io;

use thiserror::Error;

pub use websocket::{accept, SplitStream, WsConnection, WsControlSource, WsFrameSink};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// True when the peer simply went away rather than something breaking
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Closed => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
            ),
            TransportError::Protocol(_) => false,
        }
    }
}

/// One inbound message as the control receiver sees it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Binary payloads carry no control data; only the length is kept
    Binary(usize),
    /// The peer finished the closing handshake or hung up
    Closed,
}

/// Read half of a connection
pub trait ControlSource: Send {
    /// Block until the next message arrives
    fn recv(&mut self) -> Result<Inbound, TransportError>;
}

/// Write half of a connection
pub trait FrameSink {
    fn send_frame(&mut self, frame: &[i16]) -> Result<(), TransportError>;

    /// Tear the connection down, optionally telling the peer why.
    /// Must unblock a pending [`ControlSource::recv`] on the same connection.
    fn close(&mut self, reason: Option<&str>);
}

/// Encode a frame as little-endian int16 mono, no header
pub fn encode_frame(frame: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for sample in frame {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Inverse of [`encode_frame`]; a trailing odd byte is ignored
pub fn decode_frame(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
