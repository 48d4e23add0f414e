use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tungstenite::protocol::frame::coding::CloseCode;
use tungstenite::protocol::{CloseFrame, Role};
use tungstenite::{Message, WebSocket};

use super::{encode_frame, ControlSource, FrameSink, Inbound, TransportError};

/// Longest wait for the peer to hang up after a close frame
const CLOSE_LINGER: Duration = Duration::from_millis(250);

/// One half of a TCP stream.
///
/// Reads go straight to the socket. Writes from every half of the same
/// stream share one lock and are written whole, so a pong queued by the
/// read half never lands in the middle of an audio frame.
pub struct SplitStream {
    reader: TcpStream,
    writer: Arc<Mutex<TcpStream>>,
}

impl SplitStream {
    /// Split a stream into a read-side half and a write-side half
    pub fn pair(stream: TcpStream) -> io::Result<(SplitStream, SplitStream)> {
        let writer = Arc::new(Mutex::new(stream.try_clone()?));
        let read_half = SplitStream {
            reader: stream.try_clone()?,
            writer: writer.clone(),
        };
        let write_half = SplitStream {
            reader: stream,
            writer,
        };
        Ok((read_half, write_half))
    }
}

impl Read for SplitStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Write for SplitStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut writer = self.writer.lock();
        writer.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.lock().flush()
    }
}

impl From<tungstenite::Error> for TransportError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                TransportError::Closed
            }
            tungstenite::Error::Io(io) => TransportError::Io(io),
            other => TransportError::Protocol(other.to_string()),
        }
    }
}

/// An accepted WebSocket connection, split for the two session loops
pub struct WsConnection {
    pub peer: SocketAddr,
    pub source: WsControlSource,
    pub sink: WsFrameSink,
}

/// Run the server side of the WebSocket handshake on a fresh TCP stream
pub fn accept(stream: TcpStream) -> Result<WsConnection, TransportError> {
    let peer = stream.peer_addr()?;
    stream.set_nodelay(true)?;
    let control = stream.try_clone()?;
    let (read_half, write_half) = SplitStream::pair(stream)?;

    // Handshake on the read half so any bytes read past the request stay buffered there
    let ws = tungstenite::accept(read_half)
        .map_err(|e| TransportError::Protocol(format!("handshake failed: {}", e)))?;
    let writer = WebSocket::from_raw_socket(write_half, Role::Server, None);

    Ok(WsConnection {
        peer,
        source: WsControlSource { ws },
        sink: WsFrameSink {
            ws: writer,
            control,
            closed: false,
        },
    })
}

impl WsConnection {
    /// Refuse the session with a close reason, before any audio is sent
    pub fn reject(mut self, reason: &str) {
        self.sink.close(Some(reason));
    }
}

/// Read half: text and binary messages, with ping/pong handled underneath
pub struct WsControlSource {
    ws: WebSocket<SplitStream>,
}

impl ControlSource for WsControlSource {
    fn recv(&mut self) -> Result<Inbound, TransportError> {
        loop {
            match self.ws.read() {
                Ok(Message::Text(text)) => return Ok(Inbound::Text(text)),
                Ok(Message::Binary(data)) => return Ok(Inbound::Binary(data.len())),
                Ok(Message::Close(_)) => return Ok(Inbound::Closed),
                // Pings are answered by tungstenite on the next read/write
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Err(tungstenite::Error::ConnectionClosed) => return Ok(Inbound::Closed),
                // The frame is consumed; the connection stays usable
                Err(tungstenite::Error::Utf8) => {
                    tracing::warn!("dropping text message with invalid UTF-8");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Write half: one binary message per audio frame
pub struct WsFrameSink {
    ws: WebSocket<SplitStream>,
    /// Extra handle used to shut the socket down under a blocked reader
    control: TcpStream,
    closed: bool,
}

impl FrameSink for WsFrameSink {
    fn send_frame(&mut self, frame: &[i16]) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.ws.send(Message::Binary(encode_frame(frame)))?;
        Ok(())
    }

    fn close(&mut self, reason: Option<&str>) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(reason) = reason {
            let frame = CloseFrame {
                code: CloseCode::Error,
                reason: reason.to_owned().into(),
            };
            match self.ws.close(Some(frame)).and_then(|_| self.ws.flush()) {
                Ok(()) => linger(&self.control),
                Err(e) => tracing::debug!(error = %e, "close frame not delivered"),
            }
        }
        let _ = self.control.shutdown(Shutdown::Both);
    }
}

/// Send FIN after the close frame, then drain until the peer hangs up or
/// `CLOSE_LINGER` passes. Unread input at shutdown can make the kernel
/// answer with RST, and the peer may then lose the close reason.
fn linger(stream: &TcpStream) {
    if stream.shutdown(Shutdown::Write).is_err() {
        return;
    }
    let deadline = Instant::now() + CLOSE_LINGER;
    let mut scratch = [0u8; 1024];
    let mut reader = stream;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() || stream.set_read_timeout(Some(left)).is_err() {
            return;
        }
        match reader.read(&mut scratch) {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

impl Drop for WsFrameSink {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.control.shutdown(Shutdown::Both);
        }
    }
}
