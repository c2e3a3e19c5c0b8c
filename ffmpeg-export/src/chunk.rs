use std::fmt::{Display, Formatter};

use bytes::Bytes;

/// Every timestamp crossing the crate boundary is in microseconds.
pub const MICROS: i64 = 1_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackKind {
    Video,
    Audio,
}

impl Display for TrackKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// One codec output unit. Owned by exactly one holder at a time: the encoder
/// hands it to the muxer and never sees it again.
#[derive(Clone, Debug)]
pub struct EncodedChunk {
    pub track: TrackKind,
    pub data: Bytes,
    /// presentation timestamp, microseconds
    pub pts: i64,
    /// decode timestamp, microseconds
    pub dts: i64,
    /// microseconds; 0 when the codec did not report one
    pub duration: i64,
    pub is_key: bool,
}

impl EncodedChunk {
    pub fn new(track: TrackKind, data: impl Into<Bytes>, pts: i64, duration: i64, is_key: bool) -> Self {
        Self {
            track,
            data: data.into(),
            pts,
            dts: pts,
            duration,
            is_key,
        }
    }
}

impl Display for EncodedChunk {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "EncodedChunk {{ track: {}, pts: {}, dts: {}, size: {}, key: {} }}",
            self.track,
            self.pts,
            self.dts,
            self.data.len(),
            self.is_key
        )
    }
}
