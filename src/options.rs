use serde::{Deserialize, Serialize};

use crate::error::{ExportError, ExportResult};

pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 360;
pub const DEFAULT_FRAMERATE: f64 = 62.5;
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_CHANNELS: u16 = 2;
pub const DEFAULT_CHUNK_FRAMES: u32 = 1024;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Immutable render configuration, validated once before production starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    /// Object and project name written into the descriptor.
    pub name: String,
    /// Seconds.
    pub duration: f64,
    pub video: VideoOptions,
    pub audio: AudioOptions,
    /// Selects the legacy operator node family for the generated script.
    pub use_dummy_code: bool,
    /// Cap on concurrently running per-frame capture tasks.
    pub max_in_flight: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            name: "export".to_string(),
            duration: 1.0,
            video: VideoOptions::default(),
            audio: AudioOptions::default(),
            use_dummy_code: true,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoOptions {
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            framerate: DEFAULT_FRAMERATE,
        }
    }
}

/// Layout of the samples an audio source hands back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SampleFormat {
    #[default]
    F32Interleaved,
    F32Planar,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioOptions {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    /// Nominal chunk size when the encoder has no preferred frame size.
    pub frames_per_chunk: u32,
}

impl Default for AudioOptions {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            format: SampleFormat::default(),
            frames_per_chunk: DEFAULT_CHUNK_FRAMES,
        }
    }
}

impl RenderOptions {
    pub fn validate(&self) -> ExportResult<()> {
        if self.name.trim().is_empty() {
            return Err(ExportError::configuration("name must not be empty"));
        }
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(ExportError::configuration(format!(
                "duration must be a positive number of seconds, got {}",
                self.duration
            )));
        }
        let video = &self.video;
        if !video.framerate.is_finite() || video.framerate <= 0.0 {
            return Err(ExportError::configuration(format!(
                "frame rate must be positive, got {}",
                video.framerate
            )));
        }
        if video.width == 0 || video.height == 0 {
            return Err(ExportError::configuration(format!(
                "surface size must be non-zero, got {}x{}",
                video.width, video.height
            )));
        }
        // yuv420p subsamples chroma by two in both directions
        if video.width % 2 != 0 || video.height % 2 != 0 {
            return Err(ExportError::configuration(format!(
                "surface size must be even, got {}x{}",
                video.width, video.height
            )));
        }
        let audio = &self.audio;
        if audio.sample_rate == 0 {
            return Err(ExportError::configuration("sample rate must be non-zero"));
        }
        if audio.channels == 0 {
            return Err(ExportError::configuration("channel count must be non-zero"));
        }
        if audio.frames_per_chunk == 0 {
            return Err(ExportError::configuration("audio chunk size must be non-zero"));
        }
        if self.max_in_flight == 0 {
            return Err(ExportError::configuration("in-flight task cap must be non-zero"));
        }
        Ok(())
    }

    /// Number of video frames: the smallest `n` with `n / fps >= duration`.
    pub fn frame_count(&self) -> u64 {
        step_count(self.duration, self.video.framerate)
    }

    /// Number of audio sample frames covering the duration.
    pub fn audio_frame_count(&self) -> u64 {
        step_count(self.duration, self.audio.sample_rate as f64)
    }
}

/// Count of `i = 0, 1, ..` with `i / rate < duration`.
pub fn step_count(duration: f64, rate: f64) -> u64 {
    if !(duration > 0.0) || !(rate > 0.0) {
        return 0;
    }
    let mut n = (duration * rate).ceil().max(0.0) as u64;
    // correct float error at the boundary in both directions
    while n > 0 && ((n - 1) as f64) / rate >= duration {
        n -= 1;
    }
    while (n as f64) / rate < duration {
        n += 1;
    }
    n
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoCodecOptions {
    /// Encoder name as known to FFmpeg.
    pub codec: String,
    pub bitrate: Option<u64>,
    pub keyframe_interval: u32,
    pub preset: Option<String>,
    /// Clockwise display rotation in degrees.
    pub rotation: Option<u32>,
}

impl Default for VideoCodecOptions {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            bitrate: None,
            keyframe_interval: 60,
            preset: Some("ultrafast".to_string()),
            rotation: None,
        }
    }
}

impl VideoCodecOptions {
    pub fn validate(&self) -> ExportResult<()> {
        if self.codec.is_empty() {
            return Err(ExportError::configuration("video codec must be set"));
        }
        if self.keyframe_interval == 0 {
            return Err(ExportError::configuration("keyframe interval must be non-zero"));
        }
        match self.rotation {
            None | Some(0 | 90 | 180 | 270) => Ok(()),
            Some(other) => Err(ExportError::configuration(format!(
                "rotation must be 0, 90, 180 or 270, got {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioCodecOptions {
    pub codec: String,
    pub bitrate: Option<u64>,
}

impl AudioCodecOptions {
    pub fn aac() -> Self {
        Self {
            codec: "aac".to_string(),
            bitrate: Some(128_000),
        }
    }

    pub fn mp3() -> Self {
        Self {
            codec: "libmp3lame".to_string(),
            bitrate: Some(128_000),
        }
    }

    pub fn validate(&self) -> ExportResult<()> {
        if self.codec.is_empty() {
            return Err(ExportError::configuration("audio codec must be set"));
        }
        Ok(())
    }
}

impl Default for AudioCodecOptions {
    fn default() -> Self {
        Self::aac()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ContainerLayout {
    #[default]
    Progressive,
    Fragmented,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FirstTimestampPolicy {
    #[default]
    ZeroOrigin,
    PreserveOffset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerOptions {
    pub layout: ContainerLayout,
    pub fast_start: bool,
    pub min_fragment_duration_ms: u64,
    pub first_timestamp: FirstTimestampPolicy,
}

impl Default for ContainerOptions {
    fn default() -> Self {
        Self {
            layout: ContainerLayout::Progressive,
            fast_start: true,
            min_fragment_duration_ms: 1000,
            first_timestamp: FirstTimestampPolicy::ZeroOrigin,
        }
    }
}

#[cfg(test)]
#[path = "options_test.rs"]
mod options_test;
