//! Offline export of a rendered animation into either an MP4 file or a
//! content-addressed project archive whose descriptor embeds a playback
//! program for a block-based runtime.

pub mod archive;
pub mod asset;
pub mod codec;
pub mod config;
pub mod encode;
pub mod error;
pub mod export;
pub mod mux;
pub mod options;
pub mod pipeline;
pub mod project;
pub mod scene;
pub mod source;
pub mod tasks;

#[cfg(test)]
mod test_support;

pub use config::{ExportConfig, Overrides};
pub use error::{ExportError, ExportResult};
pub use export::{EntryExport, Exporter, Mp4Export};
pub use options::RenderOptions;
pub use source::{AudioChunk, AudioSource, FrameSource, Surface, VideoFrame};
