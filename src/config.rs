use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::{ExportError, ExportResult},
    options::{AudioCodecOptions, ContainerOptions, RenderOptions, VideoCodecOptions},
};

/// On-disk export configuration. Every section is optional; missing fields
/// fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportConfig {
    pub render: RenderOptions,
    pub video_codec: VideoCodecOptions,
    /// Audio codec of the MP4 target.
    pub audio_codec: AudioCodecOptions,
    /// Audio codec of the project sound asset.
    pub project_audio_codec: AudioCodecOptions,
    pub container: ContainerOptions,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            render: RenderOptions::default(),
            video_codec: VideoCodecOptions::default(),
            audio_codec: AudioCodecOptions::aac(),
            project_audio_codec: AudioCodecOptions::mp3(),
            container: ContainerOptions::default(),
        }
    }
}

/// Command-line values that replace configured ones when present.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub name: Option<String>,
    pub duration: Option<f64>,
    pub framerate: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub use_dummy_code: Option<bool>,
}

impl ExportConfig {
    pub fn load(path: impl AsRef<Path>) -> ExportResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            ExportError::configuration(format!("{}: {}", path.display(), e))
        })?;
        log::debug!("loaded export config from {}", path.display());
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        let render = &mut self.render;
        if let Some(name) = &overrides.name {
            render.name = name.clone();
        }
        if let Some(duration) = overrides.duration {
            render.duration = duration;
        }
        if let Some(framerate) = overrides.framerate {
            render.video.framerate = framerate;
        }
        if let Some(width) = overrides.width {
            render.video.width = width;
        }
        if let Some(height) = overrides.height {
            render.video.height = height;
        }
        if let Some(use_dummy_code) = overrides.use_dummy_code {
            render.use_dummy_code = use_dummy_code;
        }
    }

    /// Takes the export duration from an audio file's container.
    pub fn duration_from_audio(&mut self, path: impl AsRef<Path>) -> ExportResult<f64> {
        let path = path.as_ref();
        let duration = ffmpeg_export::probe_duration(path).map_err(ExportError::from_probe)?;
        log::info!("{}: probed duration {:.3}s", path.display(), duration);
        self.render.duration = duration;
        Ok(duration)
    }

    pub fn validate(&self) -> ExportResult<()> {
        self.render.validate()?;
        self.video_codec.validate()?;
        self.audio_codec.validate()?;
        self.project_audio_codec.validate()
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
