use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use super::message::parse_control;
use super::state::ControlCell;
use crate::transport::{ControlSource, Inbound};

/// How the receive loop ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiverExit {
    /// Peer closed the connection
    Closed,
    /// Stopped by the session
    Cancelled,
    /// Transport failed underneath
    Failed,
}

/// Handle to a running control receiver thread
pub struct ControlReceiver {
    cancelled: Arc<AtomicBool>,
    thread: JoinHandle<ReceiverExit>,
}

impl ControlReceiver {
    /// Start consuming control messages on a dedicated thread.
    ///
    /// `exited` is signalled when the loop ends for any reason, so the
    /// streaming loop can stop waiting on its timer.
    pub fn spawn<S>(source: S, cell: Arc<ControlCell>, exited: Sender<()>) -> io::Result<Self>
    where
        S: ControlSource + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let span = tracing::Span::current();

        let thread = thread::Builder::new()
            .name("control-rx".into())
            .spawn(move || {
                let _enter = span.enter();
                let mut source = source;
                let exit = run_control_loop(&mut source, &cell, &flag);
                let _ = exited.send(());
                exit
            })?;

        Ok(Self { cancelled, thread })
    }

    /// Mark the receiver as cancelled. The caller must also close the
    /// connection so a blocked read returns.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn join(self) -> ReceiverExit {
        self.thread.join().unwrap_or_else(|_| {
            tracing::error!("control receiver panicked");
            ReceiverExit::Failed
        })
    }
}

/// Consume messages until the transport closes, fails, or the loop is cancelled
pub fn run_control_loop<S>(source: &mut S, cell: &ControlCell, cancelled: &AtomicBool) -> ReceiverExit
where
    S: ControlSource + ?Sized,
{
    loop {
        let inbound = source.recv();
        if cancelled.load(Ordering::SeqCst) {
            return ReceiverExit::Cancelled;
        }
        match inbound {
            Ok(Inbound::Text(text)) => apply_message(cell, &text),
            Ok(Inbound::Binary(len)) => {
                tracing::trace!(bytes = len, "ignoring binary message");
            }
            Ok(Inbound::Closed) => {
                tracing::debug!("control channel closed by peer");
                return ReceiverExit::Closed;
            }
            Err(e) if e.is_disconnect() => {
                tracing::debug!(error = %e, "control channel disconnected");
                return ReceiverExit::Closed;
            }
            Err(e) => {
                tracing::warn!(error = %e, "control channel error");
                return ReceiverExit::Failed;
            }
        }
    }
}

/// Parse one text payload and apply it. Malformed payloads are logged and dropped.
pub fn apply_message(cell: &ControlCell, text: &str) {
    match parse_control(text) {
        Ok(update) => {
            if cell.update(&update) {
                tracing::trace!(update = %update.description(), "control update");
            } else {
                tracing::debug!("control message had no recognized fields");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "dropping malformed control message");
        }
    }
}
