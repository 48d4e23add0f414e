//! Accept loop: one thread per WebSocket client, each running its own session.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::config::{AudioConfig, ServerConfig};
use crate::control::hello_secret;
use crate::session::{Session, SessionError, SessionState, SessionSummary};
use crate::synth::SynthBackend;
use crate::transport::{self, ControlSource, Inbound, WsConnection};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct Server {
    listener: TcpListener,
    audio: AudioConfig,
    secret: Option<String>,
    backend: Arc<dyn SynthBackend>,
}

impl Server {
    pub fn bind(config: &ServerConfig, backend: Arc<dyn SynthBackend>) -> Result<Self> {
        config.audio.validate()?;
        let addr = config.bind_addr()?;
        let listener =
            TcpListener::bind(addr).with_context(|| format!("Failed to bind {}", addr))?;
        // Non-blocking so we can check the shutdown flag periodically
        listener
            .set_nonblocking(true)
            .context("Failed to make listener non-blocking")?;

        Ok(Self {
            listener,
            audio: config.audio,
            secret: config.secret.clone(),
            backend,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` is set. Open sessions keep running on their
    /// own threads until their clients leave.
    pub fn run(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        tracing::info!(
            addr = %self.local_addr()?,
            backend = self.backend.name(),
            sample_rate = self.audio.sample_rate,
            frame_ms = self.audio.frame_ms,
            auth = self.secret.is_some(),
            "listening"
        );

        while !shutdown.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, peer)) => self.spawn_connection(stream, peer),
                Err(e) => {
                    let delay = accept_retry_delay(e.kind());
                    if !matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) {
                        tracing::warn!(error = %e, "accept failed, still listening");
                    }
                    thread::sleep(delay);
                }
            }
        }

        tracing::info!("shutting down");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(false) {
            tracing::warn!(peer = %peer, error = %e, "dropping connection");
            return;
        }
        let handler = ConnectionHandler {
            audio: self.audio,
            secret: self.secret.clone(),
            backend: self.backend.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("session-{}", peer))
            .spawn(move || {
                let span = tracing::info_span!("session", peer = %peer);
                let _enter = span.enter();
                handler.handle(stream);
            });
        if let Err(e) = spawned {
            tracing::error!(peer = %peer, error = %e, "failed to spawn session thread");
        }
    }
}

/// Pause before the next accept. Accept errors never stop the listener.
fn accept_retry_delay(kind: ErrorKind) -> Duration {
    match kind {
        ErrorKind::Interrupted | ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset => {
            Duration::ZERO
        }
        _ => ACCEPT_BACKOFF,
    }
}

/// Everything one connection thread needs, detached from the listener
struct ConnectionHandler {
    audio: AudioConfig,
    secret: Option<String>,
    backend: Arc<dyn SynthBackend>,
}

impl ConnectionHandler {
    fn handle(self, stream: TcpStream) {
        let conn = match transport::accept(stream) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "handshake failed");
                return;
            }
        };
        tracing::info!("client connected");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.serve(conn)));
        match outcome {
            Ok(Ok(summary)) => match summary.state {
                SessionState::Failed => {
                    tracing::error!(frames = summary.frames_sent, "session failed")
                }
                _ => tracing::info!(frames = summary.frames_sent, "client disconnected"),
            },
            Ok(Err(SessionError::Transport(e))) if e.is_disconnect() => {
                tracing::info!("client left before streaming");
            }
            Ok(Err(e)) => tracing::warn!(error = %e, "session refused"),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(panic = %message, state = ?SessionState::Failed, "session panicked");
            }
        }
    }

    fn serve(&self, mut conn: WsConnection) -> Result<SessionSummary, SessionError> {
        if let Some(secret) = &self.secret {
            if let Err(e) = authenticate(&mut conn.source, secret) {
                if matches!(e, SessionError::Unauthorized) {
                    conn.reject(&e.close_reason());
                }
                return Err(e);
            }
            tracing::debug!("client authenticated");
        }

        let session = match Session::open(self.backend.as_ref(), self.audio) {
            Ok(session) => session,
            Err(e) => {
                let e = SessionError::from(e);
                tracing::error!(error = %e, "engine initialization failed");
                conn.reject(&e.close_reason());
                return Err(e);
            }
        };

        Ok(session.run(conn.source, conn.sink))
    }
}

/// First text message must be a hello carrying `secret`. Binary frames before it are skipped.
fn authenticate<S: ControlSource>(source: &mut S, secret: &str) -> Result<(), SessionError> {
    loop {
        match source.recv()? {
            Inbound::Text(text) => {
                return match hello_secret(&text) {
                    Some(given) if given == secret => Ok(()),
                    _ => Err(SessionError::Unauthorized),
                };
            }
            Inbound::Binary(_) => continue,
            Inbound::Closed => return Err(crate::transport::TransportError::Closed.into()),
        }
    }
}
