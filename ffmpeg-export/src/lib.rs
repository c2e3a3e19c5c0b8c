/// Registers FFmpeg components (codecs, muxers). Call once at startup before
/// opening any encoder or muxer.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod chunk;
pub mod encoder;
pub mod metadata;
pub mod muxer;
pub mod scaler;

pub use chunk::{EncodedChunk, TrackKind, MICROS};
pub use encoder::{AudioEncoder, AudioSettings, VideoEncoder, VideoSettings, has_encoder};
pub use metadata::{MediaInfo, PacketInfo, probe, probe_duration, read_packets};
pub use muxer::{
    AudioTrack, ContainerFormat, FirstTimestamp, Layout, Muxer, MuxerConfig, VideoTrack,
};
