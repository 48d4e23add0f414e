pub mod message;
pub mod receiver;
pub mod state;

pub use message::{control_from_value, hello_secret, parse_control, ControlUpdate, MessageError};
pub use receiver::{apply_message, run_control_loop, ControlReceiver, ReceiverExit};
pub use state::{ControlCell, ControlState, Pitches, MAX_VOICES};
