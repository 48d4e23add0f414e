//! Real-time DDSP voice streaming: each WebSocket client steers up to three
//! synthesis voices with JSON control messages and receives paced int16
//! audio frames in return.

pub mod config;
pub mod control;
pub mod render;
pub mod server;
pub mod session;
pub mod synth;
pub mod transport;
