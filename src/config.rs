use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_FRAME_MS: u32 = 20;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_MODEL_PATH: &str = "models/violin.json";

/// Fixed audio configuration shared by every voice of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_ms: u32,
}

impl AudioConfig {
    pub fn new(sample_rate: u32, frame_ms: u32) -> Result<Self> {
        let config = Self {
            sample_rate,
            frame_ms,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            bail!("Sample rate must be positive");
        }
        if self.frame_ms == 0 {
            bail!("Frame duration must be positive");
        }
        if self.frame_samples() == 0 {
            bail!(
                "Frame of {} ms at {} Hz holds no samples",
                self.frame_ms,
                self.sample_rate
            );
        }
        Ok(())
    }

    /// Samples per output frame (960 at 48 kHz / 20 ms)
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as u64 * self.frame_ms as u64 / 1000) as usize
    }

    /// Bytes per encoded output frame (int16 mono)
    pub fn frame_bytes(&self) -> usize {
        self.frame_samples() * 2
    }

    /// Wall-clock period of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_ms: DEFAULT_FRAME_MS,
        }
    }
}

/// Everything the listening service needs at startup
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub audio: AudioConfig,
    pub model_path: PathBuf,
    /// Pre-shared secret for the hello handshake; `None` disables the gate
    pub secret: Option<String>,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .with_context(|| format!("Invalid listen address: {}", addr))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            audio: AudioConfig::default(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            secret: None,
        }
    }
}
