//! Container probing (similar to ffprobe), used to size an export from an
//! existing audio file and to read back what the muxer wrote.

use std::{fmt, path::Path};

use ffmpeg_next::Rational;

use crate::chunk::{MICROS, TrackKind};

#[derive(Debug, Clone)]
pub struct FormatInfo {
    /// e.g. "mov,mp4,m4a,3gp,3g2,mj2"
    pub format_name: String,
    /// None if the container does not know (e.g. raw streams).
    pub duration_sec: Option<f64>,
    pub nb_streams: u32,
}

#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub index: usize,
    /// None for subtitle/data streams.
    pub kind: Option<TrackKind>,
    /// e.g. "h264", "aac"
    pub codec_name: String,
    pub time_base: Rational,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub format: FormatInfo,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn stream(&self, kind: TrackKind) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind == Some(kind))
    }
}

impl fmt::Display for MediaInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FORMAT]")?;
        writeln!(f, "format_name={}", self.format.format_name)?;
        if let Some(d) = self.format.duration_sec {
            writeln!(f, "duration_sec={:.3}", d)?;
        } else {
            writeln!(f, "duration_sec=N/A")?;
        }
        writeln!(f, "nb_streams={}", self.format.nb_streams)?;
        writeln!(f, "[/FORMAT]")?;
        for s in &self.streams {
            writeln!(f, "[STREAM]")?;
            writeln!(f, "index={}", s.index)?;
            match s.kind {
                Some(kind) => writeln!(f, "codec_type={}", kind)?,
                None => writeln!(f, "codec_type=other")?,
            }
            writeln!(f, "codec_name={}", s.codec_name)?;
            writeln!(
                f,
                "time_base={}/{}",
                s.time_base.numerator(),
                s.time_base.denominator()
            )?;
            if let (Some(w), Some(h)) = (s.width, s.height) {
                writeln!(f, "size={}x{}", w, h)?;
            }
            if let Some(sr) = s.sample_rate {
                writeln!(f, "sample_rate={}", sr)?;
            }
            if let Some(c) = s.channels {
                writeln!(f, "channels={}", c)?;
            }
            writeln!(f, "[/STREAM]")?;
        }
        Ok(())
    }
}

/// One demuxed packet, timestamps rescaled to microseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketInfo {
    pub stream: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub size: usize,
    pub is_key: bool,
}

/// Opens a file and returns its container/stream metadata.
pub fn probe(path: impl AsRef<Path>) -> anyhow::Result<MediaInfo> {
    let path = path.as_ref();
    let input = ffmpeg_next::format::input(&path)
        .map_err(|e| anyhow::anyhow!("open {}: {}", path.display(), e))?;

    let format_name = input.format().name().to_string();
    let nb_streams = input.nb_streams();
    // duration is in 1/AV_TIME_BASE seconds
    let duration_sec = {
        let d = input.duration();
        if d == ffmpeg_next::ffi::AV_NOPTS_VALUE as i64 || d <= 0 {
            None
        } else {
            Some(d as f64 / MICROS as f64)
        }
    };

    let mut streams = Vec::with_capacity(nb_streams as usize);
    for stream in input.streams() {
        let params = stream.parameters();
        let kind = match params.medium() {
            ffmpeg_next::media::Type::Video => Some(TrackKind::Video),
            ffmpeg_next::media::Type::Audio => Some(TrackKind::Audio),
            _ => None,
        };
        let (width, height, sample_rate, channels) = unsafe {
            let ptr = params.as_ptr();
            match kind {
                Some(TrackKind::Video) => (
                    Some((*ptr).width.max(0) as u32),
                    Some((*ptr).height.max(0) as u32),
                    None,
                    None,
                ),
                Some(TrackKind::Audio) => (
                    None,
                    None,
                    Some((*ptr).sample_rate.max(0) as u32),
                    Some((*ptr).ch_layout.nb_channels.max(0) as u32),
                ),
                None => (None, None, None, None),
            }
        };
        streams.push(StreamInfo {
            index: stream.index(),
            kind,
            codec_name: format!("{:?}", params.id()).to_lowercase(),
            time_base: stream.time_base(),
            width,
            height,
            sample_rate,
            channels,
        });
    }

    Ok(MediaInfo {
        format: FormatInfo {
            format_name,
            duration_sec,
            nb_streams,
        },
        streams,
    })
}

/// Container duration in seconds; errors when the container does not carry one.
pub fn probe_duration(path: impl AsRef<Path>) -> anyhow::Result<f64> {
    let path = path.as_ref();
    let info = probe(path)?;
    info.format
        .duration_sec
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or(anyhow::anyhow!("{} has no usable duration", path.display()))
}

/// Demuxes every packet without decoding it.
pub fn read_packets(path: impl AsRef<Path>) -> anyhow::Result<Vec<PacketInfo>> {
    let path = path.as_ref();
    let mut input = ffmpeg_next::format::input(&path)
        .map_err(|e| anyhow::anyhow!("open {}: {}", path.display(), e))?;
    let micros = Rational::new(1, MICROS as i32);
    let mut packets = Vec::new();
    for (stream, mut packet) in input.packets() {
        packet.rescale_ts(stream.time_base(), micros);
        packets.push(PacketInfo {
            stream: stream.index(),
            pts: packet.pts(),
            dts: packet.dts(),
            size: packet.size(),
            is_key: packet.is_key(),
        });
    }
    Ok(packets)
}
