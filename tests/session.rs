//! End-to-end sessions over loopback WebSocket

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tungstenite::protocol::frame::coding::{Data, OpCode};
use tungstenite::protocol::frame::Frame;
use tungstenite::{Message, WebSocket};

use ddsp_stream::config::{AudioConfig, ServerConfig};
use ddsp_stream::server::Server;
use ddsp_stream::synth::{DdspBackend, EngineError, SynthBackend, SynthEngine};
use ddsp_stream::transport::decode_frame;

const FRAME_BYTES: usize = 1920;

/// Voice `n` outputs a constant `1000 * (n + 1)`
struct LevelEngine {
    level: i16,
    len: usize,
}

impl SynthEngine for LevelEngine {
    fn process(&mut self, _f0_hz: f32, _loudness: f32) -> Result<Vec<i16>, EngineError> {
        Ok(vec![self.level; self.len])
    }
}

struct LevelBackend;

impl SynthBackend for LevelBackend {
    fn name(&self) -> &str {
        "level"
    }

    fn create_voices(
        &self,
        audio: &AudioConfig,
        count: usize,
    ) -> Result<Vec<Box<dyn SynthEngine>>, EngineError> {
        Ok((0..count)
            .map(|slot| {
                Box::new(LevelEngine {
                    level: 1000 * (slot as i16 + 1),
                    len: audio.frame_samples(),
                }) as Box<dyn SynthEngine>
            })
            .collect())
    }
}

struct TestServer {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

fn start(backend: Arc<dyn SynthBackend>, secret: Option<&str>) -> TestServer {
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        secret: secret.map(str::to_string),
        ..ServerConfig::default()
    };
    let server = Server::bind(&config, backend).unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    thread::spawn(move || server.run(flag));
    TestServer { addr, shutdown }
}

fn connect(addr: SocketAddr) -> WebSocket<TcpStream> {
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let (ws, _) = tungstenite::client(format!("ws://{}/", addr), stream).unwrap();
    ws
}

fn send(ws: &mut WebSocket<TcpStream>, text: &str) {
    ws.send(Message::Text(text.to_string())).unwrap();
}

fn next_frame(ws: &mut WebSocket<TcpStream>) -> Vec<u8> {
    loop {
        match ws.read().unwrap() {
            Message::Binary(data) => return data,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected audio, got {:?}", other),
        }
    }
}

/// Read frames until one satisfies `pred`; control updates land within a frame or two
fn frame_where(ws: &mut WebSocket<TcpStream>, pred: impl Fn(&[i16]) -> bool) -> Vec<i16> {
    for _ in 0..100 {
        let samples = decode_frame(&next_frame(ws));
        if pred(&samples) {
            return samples;
        }
    }
    panic!("no matching frame within 100 frames");
}

fn close_reason(ws: &mut WebSocket<TcpStream>) -> String {
    loop {
        match ws.read() {
            Ok(Message::Close(Some(frame))) => return frame.reason.to_string(),
            Ok(Message::Close(None)) => return String::new(),
            Ok(_) => continue,
            Err(e) => panic!("connection dropped without close frame: {}", e),
        }
    }
}

#[test]
fn default_state_streams_voice_zero_verbatim() {
    let server = start(Arc::new(LevelBackend), None);
    let mut ws = connect(server.addr);

    let frame = next_frame(&mut ws);
    assert_eq!(frame.len(), FRAME_BYTES);
    assert!(decode_frame(&frame).iter().all(|s| *s == 1000));
}

#[test]
fn empty_pitch_list_streams_silence() {
    let server = start(Arc::new(LevelBackend), None);
    let mut ws = connect(server.addr);
    send(&mut ws, r#"{"f0s": []}"#);

    frame_where(&mut ws, |f| f.iter().all(|s| *s == 0));
    for _ in 0..3 {
        let frame = next_frame(&mut ws);
        assert_eq!(frame, vec![0u8; FRAME_BYTES]);
    }
}

#[test]
fn chord_is_mixed_and_latest_message_wins() {
    let server = start(Arc::new(LevelBackend), None);
    let mut ws = connect(server.addr);

    send(&mut ws, r#"{"f0s": [220, 330, 440, 550]}"#);
    // (1000 + 2000 + 3000) / 3; the fourth pitch is dropped
    frame_where(&mut ws, |f| f.iter().all(|s| *s == 2000));

    send(&mut ws, "not json");
    send(&mut ws, r#"{"f0s": [220, 330]}"#);
    let frame = frame_where(&mut ws, |f| f[0] != 2000);
    assert!(frame.iter().all(|s| *s == 1500));
}

#[test]
fn invalid_utf8_text_is_dropped_without_ending_the_session() {
    let server = start(Arc::new(LevelBackend), None);
    let mut ws = connect(server.addr);

    let garbage = Frame::message(vec![0xff, 0xfe, 0x7b], OpCode::Data(Data::Text), true);
    ws.send(Message::Frame(garbage)).unwrap();
    send(&mut ws, r#"{"f0s": [220, 330]}"#);

    frame_where(&mut ws, |f| f.iter().all(|s| *s == 1500));
}

#[test]
fn missing_model_closes_with_reason() {
    let backend = Arc::new(DdspBackend::new("/no/such/model.json"));
    let server = start(backend, None);
    let mut ws = connect(server.addr);
    assert_eq!(close_reason(&mut ws), "Model not found");
}

#[test]
fn invalid_model_reports_init_failure() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut file, br#"{"harmonics": []}"#).unwrap();
    let server = start(Arc::new(DdspBackend::new(file.path())), None);
    let mut ws = connect(server.addr);
    assert!(close_reason(&mut ws).starts_with("DDSP init failed: "));
}

#[test]
fn secret_gate_rejects_wrong_hello() {
    let server = start(Arc::new(LevelBackend), Some("s3cret"));
    let mut ws = connect(server.addr);
    send(&mut ws, r#"{"type": "hello", "secret": "guess"}"#);
    assert_eq!(close_reason(&mut ws), "Unauthorized");
}

#[test]
fn rejection_reason_survives_unread_client_input() {
    let server = start(Arc::new(LevelBackend), Some("s3cret"));
    let mut ws = connect(server.addr);
    send(&mut ws, r#"{"type": "hello", "secret": "guess"}"#);
    // Left unread by the server when it refuses the session
    for _ in 0..64 {
        send(&mut ws, r#"{"f0": 440}"#);
    }
    assert_eq!(close_reason(&mut ws), "Unauthorized");
}

#[test]
fn secret_gate_admits_matching_hello() {
    let server = start(Arc::new(LevelBackend), Some("s3cret"));
    let mut ws = connect(server.addr);
    send(&mut ws, r#"{"type": "hello", "secret": "s3cret"}"#);
    send(&mut ws, r#"{"f0": 440}"#);
    let frame = next_frame(&mut ws);
    assert_eq!(frame.len(), FRAME_BYTES);
}

#[test]
fn ddsp_model_streams_audio() {
    let model = concat!(env!("CARGO_MANIFEST_DIR"), "/models/violin.json");
    let server = start(Arc::new(DdspBackend::new(model)), None);
    let mut ws = connect(server.addr);
    send(&mut ws, r#"{"f0": 220, "loudness": 0.9}"#);
    let frame = frame_where(&mut ws, |f| f.iter().any(|s| *s != 0));
    assert_eq!(frame.len(), FRAME_BYTES / 2);
}
