//! Producer capabilities the pipeline pulls from. Implementations own their
//! drawing/audio state; the pipeline only calls them sequentially.

use bytes::Bytes;

use crate::{
    error::{ExportError, ExportResult},
    options::SampleFormat,
};

/// Snapshot of a drawing surface, tightly packed RGBA8.
#[derive(Clone, Debug)]
pub struct Surface {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl Surface {
    pub fn new(width: u32, height: u32, data: impl Into<Bytes>) -> ExportResult<Self> {
        let data = data.into();
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(ExportError::capture(format!(
                "surface {}x{} holds {} bytes, expected {}",
                width,
                height,
                data.len(),
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }
}

/// A captured frame keyed by its index in production order.
#[derive(Clone, Debug)]
pub struct VideoFrame {
    pub index: u64,
    /// Seconds, `index / framerate`.
    pub timestamp: f64,
    pub surface: Surface,
}

impl VideoFrame {
    pub fn timestamp_micros(&self) -> i64 {
        (self.timestamp * 1_000_000.0).round() as i64
    }
}

/// Samples for `[offset, offset + frames)` on the audio timeline.
#[derive(Clone, Debug)]
pub struct AudioChunk {
    /// First sample frame of the chunk.
    pub offset: u64,
    /// Sample frames actually delivered.
    pub frames: usize,
    pub channels: u16,
    pub sample_rate: u32,
    pub format: SampleFormat,
    pub samples: Vec<f32>,
}

impl AudioChunk {
    pub fn silent(offset: u64, frames: usize, channels: u16, sample_rate: u32) -> Self {
        Self {
            offset,
            frames,
            channels,
            sample_rate,
            format: SampleFormat::F32Interleaved,
            samples: vec![0.0; frames * channels as usize],
        }
    }

    /// Samples reordered to `L R L R ..` regardless of the delivered layout.
    pub fn interleaved(&self) -> Vec<f32> {
        match self.format {
            SampleFormat::F32Interleaved => self.samples.clone(),
            SampleFormat::F32Planar => {
                let channels = self.channels as usize;
                let mut out = vec![0.0; self.samples.len()];
                for (ch, plane) in self.samples.chunks(self.frames.max(1)).enumerate() {
                    for (i, s) in plane.iter().enumerate() {
                        out[i * channels + ch] = *s;
                    }
                }
                out
            }
        }
    }

    pub fn check(&self) -> ExportResult<()> {
        let expected = self.frames * self.channels as usize;
        if self.samples.len() != expected {
            return Err(ExportError::capture(format!(
                "audio chunk at {} holds {} samples, expected {}",
                self.offset,
                self.samples.len(),
                expected
            )));
        }
        Ok(())
    }
}

pub trait FrameSource: Send {
    /// Renders the scene at `time` seconds and snapshots the surface.
    fn render_frame(&mut self, time: f64) -> ExportResult<Surface>;
}

pub trait AudioSource: Send {
    /// Renders at most `max_frames` sample frames starting at `time` seconds.
    fn render_audio(&mut self, time: f64, max_frames: usize) -> ExportResult<AudioChunk>;
}
