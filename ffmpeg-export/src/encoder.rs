use bytes::Bytes;
use ffmpeg_next::{
    Dictionary, Packet, Rational, codec, ffi,
    format::{Pixel, Sample, sample},
    frame,
};

use crate::{
    chunk::{EncodedChunk, MICROS, TrackKind},
    scaler::Scaler,
};

#[derive(Debug, Clone)]
pub struct VideoSettings {
    // "libx264", "libopenh264", "mjpeg", ...
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
    // bps, None = codec default
    pub bitrate: Option<u64>,
    pub keyframe_interval: u32,
    pub pixel_format: Pixel,
    // "ultrafast", "medium", etc. Ignored by codecs without presets.
    pub preset: Option<String>,
    /// Emit codec configuration out of band (extradata). MP4 needs this.
    pub global_header: bool,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            width: 640,
            height: 360,
            framerate: 30.0,
            bitrate: None,
            keyframe_interval: 25,
            pixel_format: Pixel::YUV420P,
            preset: Some("ultrafast".to_string()),
            global_header: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioSettings {
    // "aac", "libmp3lame", "libopus", ...
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: Option<u64>,
    pub global_header: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            sample_rate: 48_000,
            channels: 2,
            bitrate: Some(128_000),
            global_header: true,
        }
    }
}

/// Returns true when the local FFmpeg build ships an encoder with this name.
pub fn has_encoder(name: &str) -> bool {
    ffmpeg_next::encoder::find_by_name(name).is_some()
}

pub struct VideoEncoder {
    inner: ffmpeg_next::codec::encoder::video::Encoder,
    scaler: Scaler,
    time_base: Rational,
    width: u32,
    height: u32,
    frame_duration: i64,
    frame_index: u64,
    extradata: Bytes,
}

impl VideoEncoder {
    pub fn new(settings: &VideoSettings) -> anyhow::Result<Self> {
        if settings.framerate <= 0.0 || !settings.framerate.is_finite() {
            anyhow::bail!("invalid frame rate: {}", settings.framerate);
        }
        let codec = ffmpeg_next::encoder::find_by_name(&settings.codec)
            .ok_or(anyhow::anyhow!("codec not found: {}", settings.codec))?;
        let mut encoder = codec::Context::new_with_codec(codec).encoder().video()?;
        encoder.set_width(settings.width);
        encoder.set_height(settings.height);
        encoder.set_format(settings.pixel_format);
        encoder.set_frame_rate(Some(Rational::from(settings.framerate)));
        encoder.set_time_base(Rational::new(1, MICROS as i32));
        encoder.set_gop(settings.keyframe_interval.max(1));
        if let Some(bitrate) = settings.bitrate {
            encoder.set_bit_rate(bitrate as usize);
        }
        if settings.global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut opts = Dictionary::new();
        if let Some(ref preset) = settings.preset {
            opts.set("preset", preset);
        }
        let encoder = encoder.open_with(opts)?;

        let (time_base, extradata) = unsafe {
            let ctx = encoder.0.as_ptr();
            (Rational::from((*ctx).time_base), read_extradata(ctx))
        };
        log::info!(
            "video encoder opened: {} {}x{} @ {} fps, extradata {} bytes",
            settings.codec,
            settings.width,
            settings.height,
            settings.framerate,
            extradata.len()
        );

        Ok(Self {
            inner: encoder,
            scaler: Scaler::new(settings.width, settings.height, settings.pixel_format)?,
            time_base,
            width: settings.width,
            height: settings.height,
            frame_duration: (MICROS as f64 / settings.framerate).round() as i64,
            frame_index: 0,
            extradata,
        })
    }

    pub fn extradata(&self) -> &Bytes {
        &self.extradata
    }

    /// Encodes one tightly packed RGBA surface presented at `pts` microseconds.
    pub fn encode(&mut self, rgba: &[u8], pts: i64) -> anyhow::Result<Vec<EncodedChunk>> {
        let row = self.width as usize * 4;
        let expected = row * self.height as usize;
        if rgba.len() != expected {
            anyhow::bail!(
                "surface size mismatch: {} bytes, expected {}",
                rgba.len(),
                expected
            );
        }

        let mut source = frame::Video::new(Pixel::RGBA, self.width, self.height);
        let stride = source.stride(0);
        {
            let plane = source.data_mut(0);
            for (y, line) in rgba.chunks_exact(row).enumerate() {
                plane[y * stride..y * stride + row].copy_from_slice(line);
            }
        }

        let mut converted = frame::Video::empty();
        self.scaler.run(&source, &mut converted)?;
        converted.set_pts(Some(pts));
        self.inner.send_frame(&converted)?;
        self.frame_index += 1;
        self.drain()
    }

    pub fn flush(&mut self) -> anyhow::Result<Vec<EncodedChunk>> {
        self.inner.send_eof()?;
        let chunks = self.drain()?;
        log::debug!(
            "video encoder flushed after {} frames, {} trailing chunks",
            self.frame_index,
            chunks.len()
        );
        Ok(chunks)
    }

    fn drain(&mut self) -> anyhow::Result<Vec<EncodedChunk>> {
        let mut chunks = Vec::new();
        loop {
            let mut packet = Packet::empty();
            match self.inner.receive_packet(&mut packet) {
                Ok(()) => {
                    let mut chunk = to_chunk(TrackKind::Video, &mut packet, self.time_base);
                    if chunk.duration <= 0 {
                        chunk.duration = self.frame_duration;
                    }
                    chunks.push(chunk);
                }
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break;
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(chunks)
    }
}

unsafe impl Send for VideoEncoder {}

pub struct AudioEncoder {
    inner: ffmpeg_next::codec::encoder::audio::Encoder,
    format: Sample,
    time_base: Rational,
    sample_rate: u32,
    channels: u16,
    frame_size: usize,
    extradata: Bytes,
}

impl AudioEncoder {
    pub fn new(settings: &AudioSettings) -> anyhow::Result<Self> {
        if settings.sample_rate == 0 || settings.channels == 0 {
            anyhow::bail!(
                "invalid audio layout: {} Hz, {} channels",
                settings.sample_rate,
                settings.channels
            );
        }
        let codec = ffmpeg_next::encoder::find_by_name(&settings.codec)
            .ok_or(anyhow::anyhow!("codec not found: {}", settings.codec))?;
        let supported: Vec<Sample> = codec
            .audio()
            .ok()
            .and_then(|audio| audio.formats())
            .map(|formats| formats.collect())
            .unwrap_or_default();
        let format = pick_sample_format(&supported);
        let mut encoder = codec::Context::new_with_codec(codec).encoder().audio()?;
        encoder.set_rate(settings.sample_rate as i32);
        encoder.set_format(format);
        encoder.set_time_base(Rational::new(1, settings.sample_rate as i32));
        if let Some(bitrate) = settings.bitrate {
            encoder.set_bit_rate(bitrate as usize);
        }
        if settings.global_header {
            encoder.set_flags(codec::Flags::GLOBAL_HEADER);
        }
        unsafe {
            let ctx = encoder.as_mut_ptr();
            ffi::av_channel_layout_default(&mut (*ctx).ch_layout, settings.channels as i32);
        }

        let encoder = encoder.open_with(Dictionary::new())?;
        let (time_base, extradata) = unsafe {
            let ctx = encoder.0.as_ptr();
            (Rational::from((*ctx).time_base), read_extradata(ctx))
        };
        let frame_size = encoder.frame_size() as usize;
        log::info!(
            "audio encoder opened: {} {} Hz x{} ({:?}), frame size {}, extradata {} bytes",
            settings.codec,
            settings.sample_rate,
            settings.channels,
            format,
            frame_size,
            extradata.len()
        );

        Ok(Self {
            inner: encoder,
            format,
            time_base,
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            frame_size,
            extradata,
        })
    }

    /// Samples per channel the codec wants in every frame but the last.
    /// None for codecs that accept any frame size.
    pub fn frame_size(&self) -> Option<usize> {
        (self.frame_size > 0).then_some(self.frame_size)
    }

    pub fn extradata(&self) -> &Bytes {
        &self.extradata
    }

    /// Encodes `frames` interleaved f32 sample frames starting at sample
    /// offset `offset`.
    pub fn encode(
        &mut self,
        interleaved: &[f32],
        frames: usize,
        offset: u64,
    ) -> anyhow::Result<Vec<EncodedChunk>> {
        let channels = self.channels as usize;
        if interleaved.len() != frames * channels {
            anyhow::bail!(
                "audio buffer holds {} samples, expected {} ({} frames x {} channels)",
                interleaved.len(),
                frames * channels,
                frames,
                channels
            );
        }
        if frames == 0 {
            return Ok(Vec::new());
        }

        let mut frame = frame::Audio::empty();
        unsafe {
            let ptr = frame.as_mut_ptr();
            (*ptr).format = ffi::AVSampleFormat::from(self.format) as i32;
            (*ptr).nb_samples = frames as i32;
            (*ptr).sample_rate = self.sample_rate as i32;
            ffi::av_channel_layout_default(&mut (*ptr).ch_layout, channels as i32);
            if ffi::av_frame_get_buffer(ptr, 0) < 0 {
                anyhow::bail!("av_frame_get_buffer failed for {} frames", frames);
            }
        }
        write_samples(&mut frame, self.format, interleaved, channels)?;
        frame.set_pts(Some(offset as i64));

        self.inner.send_frame(&frame)?;
        self.drain()
    }

    pub fn flush(&mut self) -> anyhow::Result<Vec<EncodedChunk>> {
        self.inner.send_eof()?;
        self.drain()
    }

    fn drain(&mut self) -> anyhow::Result<Vec<EncodedChunk>> {
        let mut chunks = Vec::new();
        loop {
            let mut packet = Packet::empty();
            match self.inner.receive_packet(&mut packet) {
                Ok(()) => chunks.push(to_chunk(TrackKind::Audio, &mut packet, self.time_base)),
                Err(ffmpeg_next::Error::Other { errno })
                    if errno == ffmpeg_next::util::error::EAGAIN =>
                {
                    break;
                }
                Err(ffmpeg_next::Error::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(chunks)
    }
}

unsafe impl Send for AudioEncoder {}

fn pick_sample_format(supported: &[Sample]) -> Sample {
    const PREFERRED: [Sample; 4] = [
        Sample::F32(sample::Type::Planar),
        Sample::F32(sample::Type::Packed),
        Sample::I16(sample::Type::Planar),
        Sample::I16(sample::Type::Packed),
    ];
    if supported.is_empty() {
        return PREFERRED[0];
    }
    PREFERRED
        .into_iter()
        .find(|f| supported.contains(f))
        .unwrap_or(PREFERRED[0])
}

fn write_samples(
    frame: &mut frame::Audio,
    format: Sample,
    interleaved: &[f32],
    channels: usize,
) -> anyhow::Result<()> {
    match format {
        Sample::F32(sample::Type::Planar) => {
            for ch in 0..channels {
                let plane = frame.data_mut(ch);
                for (i, s) in interleaved.iter().skip(ch).step_by(channels).enumerate() {
                    plane[i * 4..i * 4 + 4].copy_from_slice(&s.to_ne_bytes());
                }
            }
        }
        Sample::F32(sample::Type::Packed) => {
            let plane = frame.data_mut(0);
            for (i, s) in interleaved.iter().enumerate() {
                plane[i * 4..i * 4 + 4].copy_from_slice(&s.to_ne_bytes());
            }
        }
        Sample::I16(sample::Type::Planar) => {
            for ch in 0..channels {
                let plane = frame.data_mut(ch);
                for (i, s) in interleaved.iter().skip(ch).step_by(channels).enumerate() {
                    plane[i * 2..i * 2 + 2].copy_from_slice(&to_i16(*s).to_ne_bytes());
                }
            }
        }
        Sample::I16(sample::Type::Packed) => {
            let plane = frame.data_mut(0);
            for (i, s) in interleaved.iter().enumerate() {
                plane[i * 2..i * 2 + 2].copy_from_slice(&to_i16(*s).to_ne_bytes());
            }
        }
        other => anyhow::bail!("unsupported encoder sample format: {:?}", other),
    }
    Ok(())
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn to_chunk(track: TrackKind, packet: &mut Packet, time_base: Rational) -> EncodedChunk {
    packet.rescale_ts(time_base, Rational::new(1, MICROS as i32));
    let pts = packet.pts().or(packet.dts()).unwrap_or(0);
    EncodedChunk {
        track,
        data: packet
            .data()
            .map(Bytes::copy_from_slice)
            .unwrap_or_default(),
        pts,
        dts: packet.dts().unwrap_or(pts),
        duration: packet.duration(),
        is_key: packet.is_key(),
    }
}

unsafe fn read_extradata(ctx: *const ffi::AVCodecContext) -> Bytes {
    unsafe {
        if (*ctx).extradata.is_null() || (*ctx).extradata_size <= 0 {
            return Bytes::new();
        }
        Bytes::copy_from_slice(std::slice::from_raw_parts(
            (*ctx).extradata,
            (*ctx).extradata_size as usize,
        ))
    }
}
