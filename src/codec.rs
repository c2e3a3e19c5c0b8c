//! FFmpeg-backed encoders and muxer behind the pipeline's codec seams.

use std::time::Duration;

use bytes::Bytes;
use ffmpeg_export::{
    AudioEncoder, AudioSettings, AudioTrack, ContainerFormat, EncodedChunk, FirstTimestamp,
    Layout, Muxer, MuxerConfig, TrackKind, VideoEncoder, VideoSettings, VideoTrack,
};

use crate::{
    encode::ChunkEncoder,
    error::{ExportError, ExportResult},
    mux::ContainerSink,
    options::{
        AudioCodecOptions, ContainerLayout, ContainerOptions, FirstTimestampPolicy,
        RenderOptions, VideoCodecOptions,
    },
    source::{AudioChunk, VideoFrame},
};

pub struct FfmpegVideoEncoder {
    inner: VideoEncoder,
    track: VideoTrack,
}

impl FfmpegVideoEncoder {
    pub fn open(
        options: &RenderOptions,
        codec: &VideoCodecOptions,
        global_header: bool,
    ) -> ExportResult<Self> {
        codec.validate()?;
        let settings = VideoSettings {
            codec: codec.codec.clone(),
            width: options.video.width,
            height: options.video.height,
            framerate: options.video.framerate,
            bitrate: codec.bitrate,
            keyframe_interval: codec.keyframe_interval,
            preset: codec.preset.clone(),
            global_header,
            ..Default::default()
        };
        let inner = VideoEncoder::new(&settings).map_err(ExportError::from_codec)?;
        let track = VideoTrack {
            codec: codec.codec.clone(),
            width: options.video.width,
            height: options.video.height,
            framerate: options.video.framerate,
            rotation: codec.rotation,
            extradata: inner.extradata().clone(),
        };
        Ok(Self { inner, track })
    }

    /// Track configuration for the muxer, including the codec's extradata.
    pub fn track_config(&self) -> VideoTrack {
        self.track.clone()
    }
}

impl ChunkEncoder for FfmpegVideoEncoder {
    type Unit = VideoFrame;

    fn track(&self) -> TrackKind {
        TrackKind::Video
    }

    fn encode(&mut self, frame: VideoFrame) -> ExportResult<Vec<EncodedChunk>> {
        let pts = frame.timestamp_micros();
        self.inner
            .encode(&frame.surface.data, pts)
            .map_err(|e| ExportError::from_codec(e.context(format!("frame {}", frame.index))))
    }

    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        self.inner.flush().map_err(ExportError::from_codec)
    }
}

pub struct FfmpegAudioEncoder {
    inner: AudioEncoder,
    track: AudioTrack,
}

impl FfmpegAudioEncoder {
    pub fn open(
        options: &RenderOptions,
        codec: &AudioCodecOptions,
        global_header: bool,
    ) -> ExportResult<Self> {
        codec.validate()?;
        let settings = AudioSettings {
            codec: codec.codec.clone(),
            sample_rate: options.audio.sample_rate,
            channels: options.audio.channels,
            bitrate: codec.bitrate,
            global_header,
        };
        let inner = AudioEncoder::new(&settings).map_err(ExportError::from_codec)?;
        let track = AudioTrack {
            codec: codec.codec.clone(),
            sample_rate: options.audio.sample_rate,
            channels: options.audio.channels,
            frame_size: inner.frame_size().unwrap_or(0) as u32,
            extradata: inner.extradata().clone(),
        };
        Ok(Self { inner, track })
    }

    pub fn track_config(&self) -> AudioTrack {
        self.track.clone()
    }
}

impl ChunkEncoder for FfmpegAudioEncoder {
    type Unit = AudioChunk;

    fn track(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn preferred_frames(&self) -> Option<usize> {
        self.inner.frame_size()
    }

    fn encode(&mut self, chunk: AudioChunk) -> ExportResult<Vec<EncodedChunk>> {
        chunk.check()?;
        self.inner
            .encode(&chunk.interleaved(), chunk.frames, chunk.offset)
            .map_err(|e| ExportError::from_codec(e.context(format!("audio at {}", chunk.offset))))
    }

    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>> {
        self.inner.flush().map_err(ExportError::from_codec)
    }
}

pub struct FfmpegMuxer {
    inner: Muxer,
}

impl FfmpegMuxer {
    pub fn open(config: MuxerConfig) -> ExportResult<Self> {
        let inner = Muxer::new(config).map_err(ExportError::from_container)?;
        Ok(Self { inner })
    }
}

impl ContainerSink for FfmpegMuxer {
    fn add_chunk(&mut self, chunk: EncodedChunk) -> ExportResult<()> {
        self.inner
            .add_chunk(chunk)
            .map_err(ExportError::from_container)
    }

    fn finalize(self) -> ExportResult<Bytes> {
        self.inner.finalize().map_err(ExportError::from_container)
    }
}

/// MP4 muxer configuration for the given container policy.
pub fn mp4_config(container: &ContainerOptions) -> MuxerConfig {
    let layout = match container.layout {
        ContainerLayout::Progressive => Layout::Progressive {
            fast_start: container.fast_start,
        },
        ContainerLayout::Fragmented => Layout::Fragmented {
            min_fragment_duration: Duration::from_millis(container.min_fragment_duration_ms),
        },
    };
    let first_timestamp = match container.first_timestamp {
        FirstTimestampPolicy::ZeroOrigin => FirstTimestamp::ZeroOrigin,
        FirstTimestampPolicy::PreserveOffset => FirstTimestamp::PreserveOffset,
    };
    MuxerConfig::new(ContainerFormat::Mp4)
        .with_layout(layout)
        .with_first_timestamp(first_timestamp)
}

pub fn mp3_config() -> MuxerConfig {
    MuxerConfig::new(ContainerFormat::Mp3)
}

/// Audio encoder and MP3 muxer for the project sound asset.
pub fn open_entry_backend(
    options: &RenderOptions,
    audio: &AudioCodecOptions,
) -> ExportResult<(FfmpegAudioEncoder, FfmpegMuxer)> {
    let encoder = FfmpegAudioEncoder::open(options, audio, false)?;
    let muxer = FfmpegMuxer::open(mp3_config().with_audio(encoder.track_config()))?;
    Ok((encoder, muxer))
}

/// Video and audio encoders sharing one MP4 muxer. MP4 keeps codec
/// configuration out of band, so both encoders open with a global header.
pub fn open_mp4_backend(
    options: &RenderOptions,
    video: &VideoCodecOptions,
    audio: &AudioCodecOptions,
    container: &ContainerOptions,
) -> ExportResult<(FfmpegVideoEncoder, FfmpegAudioEncoder, FfmpegMuxer)> {
    let video_encoder = FfmpegVideoEncoder::open(options, video, true)?;
    let audio_encoder = FfmpegAudioEncoder::open(options, audio, true)?;
    let config = mp4_config(container)
        .with_video(video_encoder.track_config())
        .with_audio(audio_encoder.track_config());
    let muxer = FfmpegMuxer::open(config)?;
    Ok((video_encoder, audio_encoder, muxer))
}

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;
