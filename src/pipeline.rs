use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::{
    error::{ExportError, ExportResult},
    options::{AudioOptions, RenderOptions},
    source::{AudioChunk, AudioSource, FrameSource, VideoFrame},
};

/// Per-frame callback of the video loop.
pub trait VideoSink {
    fn on_frame(&mut self, frame: VideoFrame) -> impl Future<Output = ExportResult<()>>;
}

/// Per-chunk callback of the audio loop.
pub trait AudioSink {
    fn on_chunk(&mut self, chunk: AudioChunk) -> impl Future<Output = ExportResult<()>>;
}

impl<F, R> VideoSink for F
where
    F: FnMut(VideoFrame) -> R,
    R: Future<Output = ExportResult<()>>,
{
    fn on_frame(&mut self, frame: VideoFrame) -> impl Future<Output = ExportResult<()>> {
        self(frame)
    }
}

impl<F, R> AudioSink for F
where
    F: FnMut(AudioChunk) -> R,
    R: Future<Output = ExportResult<()>>,
{
    fn on_chunk(&mut self, chunk: AudioChunk) -> impl Future<Output = ExportResult<()>> {
        self(chunk)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunStats {
    /// Seconds.
    pub duration: f64,
    pub frame_count: u64,
    /// Sample frames delivered across all audio chunks.
    pub audio_frames: u64,
    pub audio_chunks: u64,
}

/// Drives the video and audio production loops to completion.
///
/// Each loop renders, then awaits its callback, then advances; a loop never
/// starts rendering unit `n + 1` before the callback for `n` resolved. The two
/// loops interleave at their suspension points and are joined at the end.
/// The first error from either loop drops the other and is returned.
pub struct Coordinator<'a> {
    options: &'a RenderOptions,
    cancel: CancellationToken,
    audio_chunk_frames: usize,
}

impl<'a> Coordinator<'a> {
    pub fn new(options: &'a RenderOptions, cancel: CancellationToken) -> Self {
        Self {
            options,
            cancel,
            audio_chunk_frames: options.audio.frames_per_chunk as usize,
        }
    }

    /// Nominal audio request size, normally the audio encoder's frame size.
    pub fn with_audio_chunk_frames(mut self, frames: Option<usize>) -> Self {
        if let Some(frames) = frames.filter(|f| *f > 0) {
            self.audio_chunk_frames = frames;
        }
        self
    }

    pub async fn run<V, A, SV, SA, P>(
        &self,
        frames: &mut V,
        audio: &mut A,
        video_sink: &mut SV,
        audio_sink: &mut SA,
        progress: P,
    ) -> ExportResult<RunStats>
    where
        V: FrameSource + ?Sized,
        A: AudioSource + ?Sized,
        SV: VideoSink,
        SA: AudioSink,
        P: Fn(f64),
    {
        self.options.validate()?;
        let duration = self.options.duration;
        let framerate = self.options.video.framerate;
        let sample_rate = self.options.audio.sample_rate;
        let frame_count = self.options.frame_count();
        let audio_total = self.options.audio_frame_count();
        let cancel = &self.cancel;
        log::info!(
            "pipeline: {:.3}s, {} frames @ {} fps, {} audio frames @ {} Hz in chunks of {}",
            duration,
            frame_count,
            framerate,
            audio_total,
            sample_rate,
            self.audio_chunk_frames
        );

        let video_loop = async {
            let mut index = 0u64;
            while (index as f64) / framerate < duration {
                if cancel.is_cancelled() {
                    return Err(ExportError::Cancelled);
                }
                let timestamp = index as f64 / framerate;
                let surface = frames.render_frame(timestamp)?;
                let frame = VideoFrame {
                    index,
                    timestamp,
                    surface,
                };
                until_cancelled(cancel, video_sink.on_frame(frame)).await?;
                index += 1;
                progress((index as f64 / frame_count.max(1) as f64).min(1.0));
                log::trace!("pipeline: frame {} done", index - 1);
            }
            Ok::<_, ExportError>(index)
        };

        let nominal = self.audio_chunk_frames;
        let audio_loop = async {
            let mut offset = 0u64;
            let mut chunks = 0u64;
            while (offset as f64) / (sample_rate as f64) < duration {
                if cancel.is_cancelled() {
                    return Err(ExportError::Cancelled);
                }
                let remaining = audio_total.saturating_sub(offset) as usize;
                let requested = nominal.min(remaining.max(1));
                let mut chunk = audio.render_audio(offset as f64 / sample_rate as f64, requested)?;
                if chunk.frames == 0 {
                    return Err(ExportError::capture(format!(
                        "audio source returned no frames at offset {}",
                        offset
                    )));
                }
                if chunk.frames > requested {
                    return Err(ExportError::capture(format!(
                        "audio source returned {} frames, {} requested",
                        chunk.frames, requested
                    )));
                }
                check_layout(&chunk, &self.options.audio)?;
                chunk.check()?;
                chunk.offset = offset;
                let delivered = chunk.frames as u64;
                until_cancelled(cancel, audio_sink.on_chunk(chunk)).await?;
                offset += delivered;
                chunks += 1;
            }
            Ok::<_, ExportError>((offset, chunks))
        };

        let (frame_count, (audio_frames, audio_chunks)) = tokio::try_join!(video_loop, audio_loop)?;
        log::info!(
            "pipeline: done, {} frames, {} audio frames in {} chunks",
            frame_count,
            audio_frames,
            audio_chunks
        );
        Ok(RunStats {
            duration,
            frame_count,
            audio_frames,
            audio_chunks,
        })
    }
}

/// Encoders are opened for the configured layout; a chunk must match it.
fn check_layout(chunk: &AudioChunk, expected: &AudioOptions) -> ExportResult<()> {
    if chunk.sample_rate != expected.sample_rate
        || chunk.channels != expected.channels
        || chunk.format != expected.format
    {
        return Err(ExportError::capture(format!(
            "audio chunk at {} is {} Hz x{} {:?}, expected {} Hz x{} {:?}",
            chunk.offset,
            chunk.sample_rate,
            chunk.channels,
            chunk.format,
            expected.sample_rate,
            expected.channels,
            expected.format
        )));
    }
    Ok(())
}

async fn until_cancelled<F>(cancel: &CancellationToken, fut: F) -> ExportResult<()>
where
    F: Future<Output = ExportResult<()>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ExportError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
