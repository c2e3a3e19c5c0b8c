//! In-memory codecs, sinks and sources for exercising the pipeline without
//! FFmpeg.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use ffmpeg_export::{EncodedChunk, MICROS, TrackKind};

use crate::{
    encode::ChunkEncoder,
    error::{ExportError, ExportResult},
    mux::ContainerSink,
    source::{AudioChunk, AudioSource, FrameSource, Surface, VideoFrame},
};

/// Keeps every chunk it receives; finalize returns the concatenated payloads.
#[derive(Clone, Default)]
pub struct RecordingSink {
    pub chunks: Arc<Mutex<Vec<EncodedChunk>>>,
    pub fail_on_chunk: Option<usize>,
}

impl RecordingSink {
    pub fn chunks(&self) -> Vec<EncodedChunk> {
        self.chunks.lock().unwrap().clone()
    }

    pub fn track(&self, track: TrackKind) -> Vec<EncodedChunk> {
        self.chunks()
            .into_iter()
            .filter(|c| c.track == track)
            .collect()
    }
}

impl ContainerSink for RecordingSink {
    fn add_chunk(&mut self, chunk: EncodedChunk) -> ExportResult<()> {
        let mut chunks = self.chunks.lock().unwrap();
        if self.fail_on_chunk == Some(chunks.len()) {
            return Err(ExportError::container("sink rejected chunk"));
        }
        chunks.push(chunk);
        Ok(())
    }

    fn finalize(self) -> ExportResult<Bytes> {
        let chunks = self.chunks.lock().unwrap();
        let mut out = Vec::new();
        for chunk in chunks.iter() {
            out.extend_from_slice(&chunk.data);
        }
        Ok(Bytes::from(out))
    }
}

/// Wraps a codec or sink and raises a flag once it has been dropped.
pub struct Tracked<T> {
    pub inner: T,
    released: Arc<AtomicBool>,
}

impl<T> Tracked<T> {
    pub fn new(inner: T) -> (Self, Arc<AtomicBool>) {
        let released = Arc::new(AtomicBool::new(false));
        let tracked = Self {
            inner,
            released: Arc::clone(&released),
        };
        (tracked, released)
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

impl<S: ContainerSink + Default> ContainerSink for Tracked<S> {
    fn add_chunk(&mut self, chunk: EncodedChunk) -> ExportResult<()> {
        self.inner.add_chunk(chunk)
    }

    fn finalize(mut self) -> ExportResult<Bytes> {
        std::mem::take(&mut self.inner).finalize()
    }
}

impl<E: ChunkEncoder> ChunkEncoder for Tracked<E> {
    type Unit = E::Unit;

    fn track(&self) -> TrackKind {
        self.inner.track()
    }

    fn preferred_frames(&self) -> Option<usize> {
        self.inner.preferred_frames()
    }

    fn encode(&mut self, unit: Self::Unit) -> ExportResult<Vec<EncodedChunk>> {
        self.inner.encode(unit)
    }

    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        self.inner.flush()
    }
}

/// Holds one frame back like a codec with one frame of delay; `flush` emits it.
pub struct DelayedVideoEncoder {
    pub held: Option<VideoFrame>,
    pub work: Duration,
    pub fail_at: Option<u64>,
}

impl DelayedVideoEncoder {
    pub fn new() -> Self {
        Self {
            held: None,
            work: Duration::ZERO,
            fail_at: None,
        }
    }

    fn emit(frame: VideoFrame) -> EncodedChunk {
        EncodedChunk::new(
            TrackKind::Video,
            frame.index.to_le_bytes().to_vec(),
            frame.timestamp_micros(),
            0,
            frame.index == 0,
        )
    }
}

impl ChunkEncoder for DelayedVideoEncoder {
    type Unit = VideoFrame;

    fn track(&self) -> TrackKind {
        TrackKind::Video
    }

    fn encode(&mut self, frame: VideoFrame) -> ExportResult<Vec<EncodedChunk>> {
        if self.fail_at == Some(frame.index) {
            return Err(ExportError::codec(format!("frame {} rejected", frame.index)));
        }
        if !self.work.is_zero() {
            std::thread::sleep(self.work);
        }
        Ok(self.held.replace(frame).map(Self::emit).into_iter().collect())
    }

    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        Ok(self.held.take().map(Self::emit).into_iter().collect())
    }
}

/// Emits one chunk per audio unit whose payload is the frame count.
pub struct FixedFrameAudioEncoder {
    pub frame_size: usize,
}

impl ChunkEncoder for FixedFrameAudioEncoder {
    type Unit = AudioChunk;

    fn track(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn preferred_frames(&self) -> Option<usize> {
        Some(self.frame_size)
    }

    fn encode(&mut self, chunk: AudioChunk) -> ExportResult<Vec<EncodedChunk>> {
        if chunk.frames > self.frame_size {
            return Err(ExportError::codec(format!(
                "{} frames exceed frame size {}",
                chunk.frames, self.frame_size
            )));
        }
        let pts = chunk.offset as i64 * MICROS / chunk.sample_rate as i64;
        let duration = chunk.frames as i64 * MICROS / chunk.sample_rate as i64;
        Ok(vec![EncodedChunk::new(
            TrackKind::Audio,
            (chunk.frames as u32).to_le_bytes().to_vec(),
            pts,
            duration,
            true,
        )])
    }

    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        Ok(Vec::new())
    }
}

/// Solid surfaces whose first byte is the render count; records render times.
pub struct CountingFrameSource {
    pub width: u32,
    pub height: u32,
    pub times: Arc<Mutex<Vec<f64>>>,
    pub fail_at: Option<usize>,
}

impl CountingFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            times: Arc::default(),
            fail_at: None,
        }
    }
}

impl FrameSource for CountingFrameSource {
    fn render_frame(&mut self, time: f64) -> ExportResult<Surface> {
        let mut times = self.times.lock().unwrap();
        if self.fail_at == Some(times.len()) {
            return Err(ExportError::capture("surface lost"));
        }
        let mut data = vec![0u8; self.width as usize * self.height as usize * 4];
        data[0] = times.len() as u8;
        times.push(time);
        Surface::new(self.width, self.height, data)
    }
}

/// Ramp source that records `(time, max_frames)` requests.
pub struct RampAudioSource {
    pub sample_rate: u32,
    pub channels: u16,
    pub requests: Arc<Mutex<Vec<(f64, usize)>>>,
    /// Deliver fewer frames than asked for on this request.
    pub short_at: Option<(usize, usize)>,
}

impl RampAudioSource {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            requests: Arc::default(),
            short_at: None,
        }
    }
}

impl AudioSource for RampAudioSource {
    fn render_audio(&mut self, time: f64, max_frames: usize) -> ExportResult<AudioChunk> {
        let mut requests = self.requests.lock().unwrap();
        let frames = match self.short_at {
            Some((at, frames)) if at == requests.len() => frames,
            _ => max_frames,
        };
        requests.push((time, max_frames));
        let offset = (time * self.sample_rate as f64).round() as u64;
        let mut chunk = AudioChunk::silent(offset, frames, self.channels, self.sample_rate);
        for (i, s) in chunk.samples.iter_mut().enumerate() {
            *s = (i % 100) as f32 / 100.0;
        }
        Ok(chunk)
    }
}
