//! Runtime configuration
//!
//! All settings have working defaults; a TOML file only needs to name the
//! values it overrides.
//!
//! ```toml
//! [transport]
//! url = "wss://example.com/device"
//!
//! [audio]
//! codec = "pcm16"
//! start_latency_ms = 150
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::Codec;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub transport: TransportConfig,
    pub audio: AudioConfig,
    pub liveness: LivenessConfig,
    pub mic: MicConfig,
    pub device: DeviceInfo,
}

impl AppConfig {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the platform config directory, falling back to defaults
    /// when no file exists there.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// `<config dir>/audio-link/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "audio-link")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.transport.url)
            .map_err(|e| Error::Config(format!("transport.url: {}", e)))?;

        let audio = &self.audio;
        if audio.buffer_count == 0 || audio.buffer_size < 4 {
            return Err(Error::Config(
                "audio.buffer_count must be > 0 and audio.buffer_size >= 4".into(),
            ));
        }
        if audio.sample_rate == 0 {
            return Err(Error::Config("audio.sample_rate must be > 0".into()));
        }
        if audio.start_threshold_bytes() > audio.jitter_capacity {
            return Err(Error::Config(format!(
                "audio.jitter_capacity ({}) is smaller than the start threshold ({})",
                audio.jitter_capacity,
                audio.start_threshold_bytes()
            )));
        }
        if audio.max_evictions == 0 {
            return Err(Error::Config(
                "audio.max_evictions must be > 0 or a full jitter buffer rejects every send".into(),
            ));
        }
        if audio.poll_interval_ms == 0 {
            return Err(Error::Config("audio.poll_interval_ms must be > 0".into()));
        }
        if self.mic.enabled && self.mic.chunk_samples == 0 {
            return Err(Error::Config("mic.chunk_samples must be > 0".into()));
        }
        if self.liveness.check_interval_ms == 0 {
            return Err(Error::Config("liveness.check_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub url: String,
    /// Pause between a forced disconnect and the reconnect attempt
    pub reconnect_delay_ms: u64,
    /// Upper bound of the connect retry backoff
    pub max_backoff_ms: u64,
    /// Outbound frames queued before sends start failing
    pub outbound_queue: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8765/device".to_string(),
            reconnect_delay_ms: 1000,
            max_backoff_ms: 60_000,
            outbound_queue: 64,
        }
    }
}

impl TransportConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Playback pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Codec of inbound `0x02` payloads
    pub codec: Codec,
    /// Playback sample rate in Hz
    pub sample_rate: u32,
    /// Duplicate mono samples into interleaved stereo for the sink
    pub stereo_output: bool,
    /// Number of buffers in the output pool
    pub buffer_count: usize,
    /// Size of each output buffer in bytes
    pub buffer_size: usize,
    /// Jitter buffer capacity in bytes
    pub jitter_capacity: usize,
    /// Buffered audio required before playback (re)starts
    pub start_latency_ms: u32,
    /// Time without a successful sink write before an empty buffer counts as underrun
    pub stall_timeout_ms: u64,
    /// Bounded wait of the network path when writing the jitter buffer
    pub send_wait_ms: u64,
    /// Oldest items evicted per send before giving up
    pub max_evictions: usize,
    /// Wake-up interval of the audio threads (also bounds shutdown latency)
    pub poll_interval_ms: u64,
    /// Bounded wait of one hardware write
    pub sink_write_timeout_ms: u64,
    /// Interval of the jitter buffer statistics log
    pub monitor_interval_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            codec: Codec::ImaAdpcm,
            sample_rate: 24_000,
            stereo_output: true,
            buffer_count: 16,
            buffer_size: 2048,
            jitter_capacity: 16 * 1024,
            start_latency_ms: 125,
            stall_timeout_ms: 300,
            send_wait_ms: 50,
            max_evictions: 64,
            poll_interval_ms: 20,
            sink_write_timeout_ms: 100,
            monitor_interval_ms: 2000,
        }
    }
}

impl AudioConfig {
    /// START_THRESHOLD: payload bytes covering `start_latency_ms` of audio
    pub fn start_threshold_bytes(&self) -> usize {
        let samples = self.sample_rate as u64 * self.start_latency_ms as u64 / 1000;
        self.codec.payload_bytes_for(samples as usize).max(1)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn send_wait(&self) -> Duration {
        Duration::from_millis(self.send_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sink_write_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_write_timeout_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn output_channels(&self) -> u16 {
        if self.stereo_output {
            2
        } else {
            1
        }
    }
}

/// Keepalive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub ping_timeout_ms: u64,
    pub check_interval_ms: u64,
    /// Checks are suppressed this long after a fresh connection
    pub grace_ms: u64,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_timeout_ms: 10_000,
            check_interval_ms: 1000,
            grace_ms: 1000,
        }
    }
}

impl LivenessConfig {
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

/// Microphone uplink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MicConfig {
    pub enabled: bool,
    pub sample_rate: u32,
    /// Samples per outbound frame
    pub chunk_samples: usize,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 16_000,
            chunk_samples: 256,
        }
    }
}

/// Identity announced to the peer after connecting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub hardware_version: String,
    pub software_version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            hardware_version: "HW_v2.0".to_string(),
            software_version: "FW_v2.0.1".to_string(),
        }
    }
}
