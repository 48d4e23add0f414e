//! One client connection: a control receiver thread feeding a shared
//! control cell, and a paced streaming loop rendering and sending frames.

pub mod clock;
pub mod mixer;
pub mod scheduler;

use std::sync::Arc;

use crossbeam_channel::{bounded, Sender};

use crate::config::AudioConfig;
use crate::control::{ControlCell, ControlReceiver, ControlState};
use crate::synth::{EngineError, SynthBackend, VoiceBank};
use crate::transport::{ControlSource, FrameSink, TransportError};

pub use clock::{Clock, SystemClock};
pub use mixer::{average_frames, mix_voices, silence};
pub use scheduler::FrameScheduler;

/// Close reason sent when a session dies of an internal error
pub const INTERNAL_ERROR_REASON: &str = "Internal error";

/// Session lifecycle: `Init -> Streaming -> {Closed, Failed}`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Streaming,
    /// Peer went away or the transport refused a write
    Closed,
    /// Synthesis or another internal step failed
    Failed,
}

/// Why a session never reached `Streaming`
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("DDSP init failed: {0}")]
    Engine(#[from] EngineError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Unauthorized")]
    Unauthorized,
}

impl SessionError {
    /// Reason sent to the client in the close frame
    pub fn close_reason(&self) -> String {
        match self {
            SessionError::Engine(EngineError::ModelNotFound(_)) => "Model not found".to_string(),
            other => other.to_string(),
        }
    }
}

/// What a finished session reports back to the server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub state: SessionState,
    pub frames_sent: u64,
}

/// Per-connection session owning the voice bank and control cell
pub struct Session {
    audio: AudioConfig,
    voices: VoiceBank,
    control: Arc<ControlCell>,
    state: SessionState,
    frames_sent: u64,
}

impl Session {
    /// Allocate all voices up front. Failure means the session must not start.
    pub fn open(backend: &dyn SynthBackend, audio: AudioConfig) -> Result<Self, EngineError> {
        let voices = VoiceBank::new(backend, &audio)?;
        Ok(Self::new(voices, audio))
    }

    pub fn new(voices: VoiceBank, audio: AudioConfig) -> Self {
        Self {
            audio,
            voices,
            control: Arc::new(ControlCell::new()),
            state: SessionState::Init,
            frames_sent: 0,
        }
    }

    pub fn control(&self) -> Arc<ControlCell> {
        self.control.clone()
    }

    /// Render the output frame for one control snapshot
    pub fn render_frame(&mut self, state: &ControlState) -> Result<Vec<i16>, EngineError> {
        let frame_len = self.audio.frame_samples();
        let pitches = state.pitches.as_slice();
        if pitches.is_empty() {
            return Ok(silence(frame_len));
        }

        let mut frames = Vec::with_capacity(pitches.len());
        for (slot, &pitch) in pitches.iter().enumerate() {
            frames.push(self.voices.process(slot, pitch, state.loudness)?);
        }
        Ok(mix_voices(frames, frame_len))
    }

    /// Run the session on the wall clock until the connection ends
    pub fn run<S, F>(self, source: S, sink: F) -> SessionSummary
    where
        S: ControlSource + 'static,
        F: FrameSink,
    {
        let (exited_tx, exited_rx) = bounded(1);
        self.run_with_clock(source, sink, SystemClock::cancellable(exited_rx), exited_tx)
    }

    /// Run with an explicit clock. `exited` is signalled by the control
    /// receiver when it stops; wire its other end into the clock to stop
    /// streaming as soon as the peer hangs up.
    pub fn run_with_clock<S, F, C>(
        mut self,
        source: S,
        mut sink: F,
        clock: C,
        exited: Sender<()>,
    ) -> SessionSummary
    where
        S: ControlSource + 'static,
        F: FrameSink,
        C: Clock,
    {
        let receiver = match ControlReceiver::spawn(source, self.control.clone(), exited) {
            Ok(receiver) => receiver,
            Err(e) => {
                tracing::error!(error = %e, "failed to start control receiver");
                sink.close(Some(INTERNAL_ERROR_REASON));
                self.state = SessionState::Failed;
                return self.summary();
            }
        };

        self.state = SessionState::Streaming;
        tracing::info!(
            frame_samples = self.audio.frame_samples(),
            frame_bytes = self.audio.frame_bytes(),
            frame_ms = self.audio.frame_ms,
            "starting audio stream"
        );

        let mut scheduler = FrameScheduler::new(clock, self.audio.frame_duration());
        self.state = self.stream(&mut scheduler, &mut sink);

        // Stop the receiver before it can outlive the session
        receiver.cancel();
        let reason = match self.state {
            SessionState::Failed => Some(INTERNAL_ERROR_REASON),
            _ => None,
        };
        sink.close(reason);
        let exit = receiver.join();

        tracing::info!(
            state = ?self.state,
            frames = self.frames_sent,
            receiver = ?exit,
            "session ended"
        );
        self.summary()
    }

    fn stream<C: Clock, F: FrameSink>(
        &mut self,
        scheduler: &mut FrameScheduler<C>,
        sink: &mut F,
    ) -> SessionState {
        loop {
            let Some(index) = scheduler.wait_for_tick() else {
                tracing::debug!("control channel ended, stopping stream");
                return SessionState::Closed;
            };
            let lag = scheduler.lag();
            if lag > self.audio.frame_duration() {
                tracing::debug!(
                    frame_index = index,
                    lag_ms = lag.as_millis() as u64,
                    "behind schedule"
                );
            }

            let snapshot = self.control.snapshot();
            let frame = match self.render_frame(&snapshot) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(frame_index = index, error = %e, "synthesis failed");
                    return SessionState::Failed;
                }
            };

            if let Err(e) = sink.send_frame(&frame) {
                if e.is_disconnect() {
                    tracing::info!("client disconnected");
                } else {
                    tracing::warn!(frame_index = index, error = %e, "frame write failed");
                }
                return SessionState::Closed;
            }

            self.frames_sent += 1;
            scheduler.advance();
        }
    }

    fn summary(&self) -> SessionSummary {
        SessionSummary {
            state: self.state,
            frames_sent: self.frames_sent,
        }
    }
}
