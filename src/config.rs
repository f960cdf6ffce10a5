//! Application configuration
//!
//! Loaded from TOML. Every field has a default, so a partial file (or no
//! file at all) is valid.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Initial gain in percent
    pub gain_percent: f32,
    pub stream: StreamConfig,
    pub network: NetworkConfig,
}

/// Frame geometry and buffering, agreed between both ends out of band
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Samples per frame (and per datagram)
    pub frame_size: usize,
    pub sample_rate: u32,
    pub channels: u16,
    /// Receive ring capacity in frames, rounded up to a power of two
    pub ring_capacity: usize,
    /// Playback starts once the backlog exceeds this many frames
    pub ready_threshold: usize,
    /// Address pattern tagging this stream's datagrams
    pub address: String,
}

/// Network endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Sender target host
    pub host: String,
    /// Sender target port and receiver listen port
    pub port: u16,
    /// Local address the receiver binds
    pub bind_address: IpAddr,
    /// SO_RCVBUF in bytes, 0 keeps the OS default
    pub recv_buffer_size: usize,
    /// SO_SNDBUF in bytes, 0 keeps the OS default
    pub send_buffer_size: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gain_percent: 100.0,
            stream: StreamConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            ring_capacity: RING_BUFFER_CAPACITY,
            ready_threshold: DEFAULT_READY_THRESHOLD,
            address: AUDIO_STREAM_ADDRESS.to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_UDP_PORT,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            recv_buffer_size: 1 << 20,
            send_buffer_size: 0,
        }
    }
}

impl StreamConfig {
    /// Duration of one frame in milliseconds
    pub fn frame_duration_ms(&self) -> f32 {
        self.frame_size as f32 * 1000.0 / self.sample_rate as f32
    }
}

impl AppConfig {
    /// Default config file location, e.g. `~/.config/lan-audio-link/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "lan-audio-link")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Parse and validate a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    /// Load from `path` if given, else from the default location if it
    /// exists, else use defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let stream = &self.stream;
        if stream.frame_size == 0 {
            return Err(Error::Config("frame_size must be non-zero".into()));
        }
        if crate::protocol::datagram_len(&stream.address, stream.frame_size) > MAX_DATAGRAM_SIZE {
            return Err(Error::Config(format!(
                "frame_size {} does not fit in one datagram",
                stream.frame_size
            )));
        }
        if stream.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be non-zero".into()));
        }
        if stream.channels == 0 {
            return Err(Error::Config("channels must be non-zero".into()));
        }
        if stream.ring_capacity <= stream.ready_threshold {
            return Err(Error::Config(format!(
                "ring_capacity {} must exceed ready_threshold {}",
                stream.ring_capacity, stream.ready_threshold
            )));
        }
        if !stream.address.starts_with('/') || stream.address.contains('\0') {
            return Err(Error::Config(format!(
                "address {:?} must start with '/' and contain no NUL",
                stream.address
            )));
        }
        if !(0.0..=100.0).contains(&self.gain_percent) {
            return Err(Error::Config(format!(
                "gain_percent {} outside 0..=100",
                self.gain_percent
            )));
        }
        Ok(())
    }
}
