//! Configuration types for streaming, recording, playback and baking.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::layout::{LayoutError, LayoutParams, StreamLayout};

/// Allowed capture send interval, in milliseconds.
pub const SEND_INTERVAL_RANGE_MS: std::ops::RangeInclusive<u64> = 4..=30;

/// Sample rates the baker can resample to.
pub const BAKE_RATES: [u32; 5] = [24, 25, 30, 50, 60];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FacelinkConfig {
    /// Wire layout parameters. Both ends must use the same values.
    #[serde(default)]
    pub layout: LayoutParams,
    /// Capture/transmit side.
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Receive/decode side.
    #[serde(default)]
    pub receive: ReceiveConfig,
    /// Buffer pool and recording.
    #[serde(default)]
    pub recorder: RecorderConfig,
    /// Playback scheduling.
    #[serde(default)]
    pub playback: PlaybackConfig,
    /// Resampling to fixed-rate keyframes.
    #[serde(default)]
    pub bake: BakeConfig,
}

/// Capture/transmit loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Address of the receiving peer.
    pub peer: String,
    /// Sleep between ticks (4-30 ms).
    pub send_interval_ms: u64,
    /// Give up after this long without a connection.
    pub timeout_secs: f32,
    /// Per-attempt connect timeout while reconnecting.
    pub connect_timeout_ms: u64,
    /// Socket write timeout.
    pub write_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            peer: "127.0.0.1:9000".to_string(),
            send_interval_ms: 16,
            timeout_secs: 5.0,
            connect_timeout_ms: 250,
            write_timeout_ms: 1000,
        }
    }
}

impl CaptureConfig {
    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f32(self.timeout_secs.max(0.0))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

/// Receive/decode loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveConfig {
    /// Listen address.
    pub bind: String,
    /// Socket read timeout; bounds how long the loop blocks between
    /// running-flag checks.
    pub read_timeout_ms: u64,
    /// Tracking is reported lost when no frame arrives for this long.
    pub tracking_timeout_ms: u64,
    /// Sleep between accept polls while no peer is connected.
    pub accept_poll_ms: u64,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:9000".to_string(),
            read_timeout_ms: 50,
            tracking_timeout_ms: 500,
            accept_poll_ms: 20,
        }
    }
}

impl ReceiveConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn tracking_timeout(&self) -> Duration {
        Duration::from_millis(self.tracking_timeout_ms)
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms.max(1))
    }
}

/// Buffer pool and recording settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Top-up starts when fewer buffers than this are pooled.
    pub low_water_mark: usize,
    /// Buffers allocated per top-up round.
    pub batch_size: usize,
    /// Sleep between top-up rounds.
    pub top_up_interval_ms: u64,
    /// Where finished takes are saved (none = keep in memory only).
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            low_water_mark: 32,
            batch_size: 6,
            top_up_interval_ms: 2,
            output_dir: None,
        }
    }
}

impl RecorderConfig {
    pub fn top_up_interval(&self) -> Duration {
        Duration::from_millis(self.top_up_interval_ms.max(1))
    }
}

/// How playback behaves when the host ticks slower than the recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CatchUp {
    /// Advance at most one frame per tick. Playback slows down instead of
    /// dropping frames when ticks are slower than the source rate.
    #[default]
    SingleStep,
    /// Advance up to `max_frames` due frames per tick, applying each in order.
    Bounded { max_frames: usize },
}

impl CatchUp {
    /// Frames the scheduler may advance in one tick.
    pub fn frames_per_tick(&self) -> usize {
        match *self {
            CatchUp::SingleStep => 1,
            CatchUp::Bounded { max_frames } => max_frames.max(1),
        }
    }
}

/// Playback settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default)]
    pub catch_up: CatchUp,
}

/// Baking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BakeConfig {
    /// Target keyframe rate; one of 24, 25, 30, 50, 60.
    pub rate_hz: u32,
    /// Curve names for blend shapes, in wire order. Empty means generic names.
    #[serde(default)]
    pub blend_shape_names: Vec<String>,
}

impl Default for BakeConfig {
    fn default() -> Self {
        Self {
            rate_hz: 30,
            blend_shape_names: Vec::new(),
        }
    }
}

impl FacelinkConfig {
    /// Build the stream layout described by this configuration.
    pub fn stream_layout(&self) -> Result<StreamLayout, LayoutError> {
        StreamLayout::new(&self.layout)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let layout = self.stream_layout()?;
        if !SEND_INTERVAL_RANGE_MS.contains(&self.capture.send_interval_ms) {
            return Err(ConfigError::InvalidSendInterval(
                self.capture.send_interval_ms,
            ));
        }
        if !(self.capture.timeout_secs > 0.0) {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.recorder.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if !BAKE_RATES.contains(&self.bake.rate_hz) {
            return Err(ConfigError::UnsupportedSampleRate(self.bake.rate_hz));
        }
        if !self.bake.blend_shape_names.is_empty()
            && self.bake.blend_shape_names.len() != layout.blend_shape_count
        {
            return Err(ConfigError::BlendShapeNameCount {
                expected: layout.blend_shape_count,
                actual: self.bake.blend_shape_names.len(),
            });
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("Send interval {0} ms is outside 4-30 ms")]
    InvalidSendInterval(u64),
    #[error("Capture timeout must be positive")]
    InvalidTimeout,
    #[error("Pool batch size must be non-zero")]
    InvalidBatchSize,
    #[error("Unsupported bake rate {0} Hz (expected 24, 25, 30, 50 or 60)")]
    UnsupportedSampleRate(u32),
    #[error("Expected {expected} blend-shape names, got {actual}")]
    BlendShapeNameCount { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        FacelinkConfig::default().validate().unwrap();
    }

    #[test]
    fn test_json_roundtrip_with_defaults() {
        let json = r#"{ "layout": { "blend_shape_count": 4, "include_frame_number": false,
            "include_frame_time": true, "include_active_flag": true },
            "playback": { "catch_up": { "type": "Bounded", "max_frames": 3 } } }"#;
        let config: FacelinkConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.layout.blend_shape_count, 4);
        assert_eq!(config.layout.error_check_byte, 42);
        assert_eq!(config.capture.timeout_secs, 5.0);
        assert_eq!(config.playback.catch_up.frames_per_tick(), 3);
        config.validate().unwrap();

        let text = serde_json::to_string(&config).unwrap();
        let parsed: FacelinkConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.layout, config.layout);
    }

    #[test]
    fn test_rejects_bad_interval() {
        let mut config = FacelinkConfig::default();
        config.capture.send_interval_ms = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSendInterval(100))
        ));
    }

    #[test]
    fn test_rejects_unsupported_rate() {
        let mut config = FacelinkConfig::default();
        config.bake.rate_hz = 48;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedSampleRate(48))
        ));
    }

    #[test]
    fn test_rejects_name_count_mismatch() {
        let mut config = FacelinkConfig::default();
        config.bake.blend_shape_names = vec!["jawOpen".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BlendShapeNameCount { .. })
        ));
    }
}
