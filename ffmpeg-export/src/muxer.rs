use std::{collections::BTreeMap, time::Duration};

use bytes::Bytes;
use ffmpeg_next::{Dictionary, Packet, Rational, codec, ffi};

use crate::chunk::{EncodedChunk, MICROS, TrackKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerFormat {
    Mp4,
    Mp3,
}

impl ContainerFormat {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mp3 => "mp3",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => ".mp4",
            ContainerFormat::Mp3 => ".mp3",
        }
    }
}

/// How the container places its index relative to the media data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// One `moov` for the whole file. With `fast_start` the index is moved
    /// in front of the media data when the muxer is finalized.
    Progressive { fast_start: bool },
    /// `moof`/`mdat` pairs cut at keyframes, no less than
    /// `min_fragment_duration` apart.
    Fragmented { min_fragment_duration: Duration },
}

/// Where the first chunk of each track lands on the container timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirstTimestamp {
    /// Shift every track so its first chunk starts at zero.
    ZeroOrigin,
    /// Keep chunk timestamps as delivered by the encoder.
    PreserveOffset,
}

#[derive(Clone, Debug)]
pub struct VideoTrack {
    // decoder-side codec name: "h264", "hevc", "mjpeg", ...
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
    /// Clockwise display rotation in degrees (0, 90, 180, 270).
    pub rotation: Option<u32>,
    pub extradata: Bytes,
}

#[derive(Clone, Debug)]
pub struct AudioTrack {
    // decoder-side codec name: "aac", "mp3", "opus", ...
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    // samples per frame, 0 if variable
    pub frame_size: u32,
    pub extradata: Bytes,
}

#[derive(Clone, Debug)]
pub struct MuxerConfig {
    pub format: ContainerFormat,
    pub video: Option<VideoTrack>,
    pub audio: Option<AudioTrack>,
    pub layout: Layout,
    pub first_timestamp: FirstTimestamp,
}

impl MuxerConfig {
    pub fn new(format: ContainerFormat) -> Self {
        Self {
            format,
            video: None,
            audio: None,
            layout: Layout::Progressive { fast_start: false },
            first_timestamp: FirstTimestamp::ZeroOrigin,
        }
    }

    pub fn with_video(mut self, track: VideoTrack) -> Self {
        self.video = Some(track);
        self
    }

    pub fn with_audio(mut self, track: AudioTrack) -> Self {
        self.audio = Some(track);
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_first_timestamp(mut self, first_timestamp: FirstTimestamp) -> Self {
        self.first_timestamp = first_timestamp;
        self
    }

    fn header_options(&self) -> Dictionary<'static> {
        let mut opts = Dictionary::new();
        if self.format != ContainerFormat::Mp4 {
            return opts;
        }
        match self.layout {
            Layout::Progressive { fast_start: true } => opts.set("movflags", "+faststart"),
            Layout::Progressive { fast_start: false } => {}
            Layout::Fragmented {
                min_fragment_duration,
            } => {
                opts.set("movflags", "+frag_keyframe+empty_moov+default_base_moof");
                opts.set(
                    "min_frag_duration",
                    &min_fragment_duration.as_micros().to_string(),
                );
            }
        }
        opts
    }
}

struct TrackState {
    index: usize,
    time_base: Rational,
    origin: Option<i64>,
    last_dts: Option<i64>,
    chunks: u64,
}

/// Assembles encoded chunks into one container held in a scratch file; the
/// finished bytes are handed back by [`Muxer::finalize`].
pub struct Muxer {
    inner: ffmpeg_next::format::context::Output,
    file: tempfile::NamedTempFile,
    tracks: BTreeMap<TrackKind, TrackState>,
    first_timestamp: FirstTimestamp,
}

impl Muxer {
    pub fn new(config: MuxerConfig) -> anyhow::Result<Self> {
        if config.video.is_none() && config.audio.is_none() {
            anyhow::bail!("muxer needs at least one track");
        }
        if config.format == ContainerFormat::Mp3 && config.video.is_some() {
            anyhow::bail!("mp3 container cannot carry a video track");
        }

        let file = tempfile::Builder::new()
            .prefix("ent-export-")
            .suffix(config.format.extension())
            .tempfile()?;
        let mut inner = ffmpeg_next::format::output_as(&file.path(), config.format.name())
            .map_err(|e| anyhow::anyhow!("open {} muxer: {}", config.format.name(), e))?;

        let mut indices = Vec::new();
        if let Some(ref video) = config.video {
            let codec_id = find_codec_id(&video.codec)?;
            let mut stream = inner.add_stream(ffmpeg_next::encoder::find(codec_id))?;
            stream.set_parameters(video_parameters(video, codec_id));
            stream.set_time_base(Rational::new(1, MICROS as i32));
            if let Some(rotation) = video.rotation.filter(|r| *r != 0) {
                let mut metadata = Dictionary::new();
                metadata.set("rotate", &rotation.to_string());
                stream.set_metadata(metadata);
            }
            indices.push((TrackKind::Video, stream.index()));
        }
        if let Some(ref audio) = config.audio {
            let codec_id = find_codec_id(&audio.codec)?;
            let mut stream = inner.add_stream(ffmpeg_next::encoder::find(codec_id))?;
            stream.set_parameters(audio_parameters(audio, codec_id));
            stream.set_time_base(Rational::new(1, audio.sample_rate as i32));
            indices.push((TrackKind::Audio, stream.index()));
        }

        inner
            .write_header_with(config.header_options())
            .map_err(|e| anyhow::anyhow!("write {} header: {}", config.format.name(), e))?;

        let mut tracks = BTreeMap::new();
        for (kind, index) in indices {
            let time_base = inner
                .stream(index)
                .ok_or(anyhow::anyhow!("stream {} not found", index))?
                .time_base();
            tracks.insert(
                kind,
                TrackState {
                    index,
                    time_base,
                    origin: None,
                    last_dts: None,
                    chunks: 0,
                },
            );
        }
        log::info!(
            "muxer opened: {} {:?}, tracks {:?}",
            config.format.name(),
            config.layout,
            tracks.keys().collect::<Vec<_>>()
        );

        Ok(Self {
            inner,
            file,
            tracks,
            first_timestamp: config.first_timestamp,
        })
    }

    pub fn has_track(&self, track: TrackKind) -> bool {
        self.tracks.contains_key(&track)
    }

    /// Writes one chunk. Chunks of a track must arrive in that track's
    /// decode order; tracks may interleave freely.
    pub fn add_chunk(&mut self, chunk: EncodedChunk) -> anyhow::Result<()> {
        let state = self
            .tracks
            .get_mut(&chunk.track)
            .ok_or(anyhow::anyhow!("no {} track configured", chunk.track))?;

        let origin = match self.first_timestamp {
            FirstTimestamp::ZeroOrigin => *state.origin.get_or_insert(chunk.dts.min(chunk.pts)),
            FirstTimestamp::PreserveOffset => 0,
        };
        let dts = chunk.dts - origin;
        if let Some(last) = state.last_dts {
            if dts < last {
                anyhow::bail!(
                    "{} chunk out of order: dts {} after {}",
                    chunk.track,
                    dts,
                    last
                );
            }
        }
        state.last_dts = Some(dts);

        let mut packet = Packet::copy(&chunk.data);
        packet.set_pts(Some(chunk.pts - origin));
        packet.set_dts(Some(dts));
        packet.set_duration(chunk.duration);
        if chunk.is_key {
            packet.set_flags(ffmpeg_next::packet::Flags::KEY);
        }
        packet.set_stream(state.index);
        packet.set_position(-1);
        packet.rescale_ts(Rational::new(1, MICROS as i32), state.time_base);
        packet.write_interleaved(&mut self.inner)?;
        state.chunks += 1;
        log::trace!("muxed {}", chunk);
        Ok(())
    }

    /// Seals the container (trailer, index) and returns its bytes.
    pub fn finalize(mut self) -> anyhow::Result<Bytes> {
        self.inner.write_trailer()?;
        let counts: Vec<(TrackKind, u64)> =
            self.tracks.iter().map(|(k, s)| (*k, s.chunks)).collect();
        let Muxer { inner, file, .. } = self;
        // closes the output io before the file is read back
        drop(inner);
        let data = std::fs::read(file.path())?;
        log::info!("muxer finalized: {} bytes, chunks {:?}", data.len(), counts);
        Ok(Bytes::from(data))
    }
}

unsafe impl Send for Muxer {}

fn find_codec_id(name: &str) -> anyhow::Result<codec::Id> {
    ffmpeg_next::decoder::find_by_name(name)
        .or_else(|| ffmpeg_next::encoder::find_by_name(name))
        .map(|c| c.id())
        .ok_or(anyhow::anyhow!("unknown codec: {}", name))
}

fn video_parameters(track: &VideoTrack, codec_id: codec::Id) -> codec::Parameters {
    let mut params = codec::Parameters::new();
    unsafe {
        let ptr = params.as_mut_ptr();
        (*ptr).codec_type = ffmpeg_next::media::Type::Video.into();
        (*ptr).codec_id = codec_id.into();
        (*ptr).width = track.width as i32;
        (*ptr).height = track.height as i32;
        (*ptr).format = ffi::AVPixelFormat::AV_PIX_FMT_YUV420P as i32;
        (*ptr).framerate = Rational::from(track.framerate).into();
        set_extradata(ptr, &track.extradata);
    }
    params
}

fn audio_parameters(track: &AudioTrack, codec_id: codec::Id) -> codec::Parameters {
    let mut params = codec::Parameters::new();
    unsafe {
        let ptr = params.as_mut_ptr();
        (*ptr).codec_type = ffmpeg_next::media::Type::Audio.into();
        (*ptr).codec_id = codec_id.into();
        (*ptr).sample_rate = track.sample_rate as i32;
        (*ptr).frame_size = track.frame_size as i32;
        ffi::av_channel_layout_default(&mut (*ptr).ch_layout, track.channels as i32);
        set_extradata(ptr, &track.extradata);
    }
    params
}

/// Copies codec configuration into `AVCodecParameters`, which frees it on drop.
unsafe fn set_extradata(ptr: *mut ffi::AVCodecParameters, extradata: &[u8]) {
    if extradata.is_empty() {
        return;
    }
    unsafe {
        let padded = extradata.len() + ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
        let buf = ffi::av_mallocz(padded) as *mut u8;
        if buf.is_null() {
            return;
        }
        std::ptr::copy_nonoverlapping(extradata.as_ptr(), buf, extradata.len());
        (*ptr).extradata = buf;
        (*ptr).extradata_size = extradata.len() as i32;
    }
}

#[cfg(test)]
#[path = "muxer_test.rs"]
mod muxer_test;
