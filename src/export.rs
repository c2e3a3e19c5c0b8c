//! The two export targets: an entry project archive and an MP4 file.

use std::{io::Cursor, sync::Arc};

use bytes::Bytes;
use ffmpeg_export::TrackKind;
use image::{ImageFormat, RgbaImage};
use tokio_util::sync::CancellationToken;

use crate::{
    archive::ArchiveBuilder,
    asset::{AssetKind, AssetPath},
    encode::{ChunkEncoder, ENCODE_QUEUE_BOUND, EncoderAdapter},
    error::{ExportError, ExportResult},
    mux::{ContainerSink, MuxTask},
    options::RenderOptions,
    pipeline::{AudioSink, Coordinator, RunStats, VideoSink},
    project::{IdSource, ProjectDescriptor, ProjectManifest, build_descriptor},
    source::{AudioChunk, AudioSource, FrameSource, Surface, VideoFrame},
    tasks::TaskGroup,
};

pub struct EntryExport {
    /// Tar with every asset followed by `temp/project.json`.
    pub archive: Vec<u8>,
    pub descriptor: ProjectDescriptor,
    pub stats: RunStats,
}

pub struct Mp4Export {
    pub container: Bytes,
    pub stats: RunStats,
}

/// Runs one export against caller-supplied codecs and container sinks.
pub struct Exporter<'a> {
    options: &'a RenderOptions,
    cancel: CancellationToken,
    progress: Box<dyn Fn(f64) + 'a>,
}

impl<'a> Exporter<'a> {
    pub fn new(options: &'a RenderOptions, cancel: CancellationToken) -> Self {
        Self {
            options,
            cancel,
            progress: Box::new(|_| {}),
        }
    }

    pub fn on_progress(mut self, progress: impl Fn(f64) + 'a) -> Self {
        self.progress = Box::new(progress);
        self
    }

    /// Captures every frame as a PNG asset and the audio as one MP3 asset,
    /// then seals the archive with the project descriptor.
    pub async fn entry<V, A, E, S>(
        &self,
        frames: &mut V,
        audio: &mut A,
        encoder: E,
        sink: S,
        ids: &mut dyn IdSource,
    ) -> ExportResult<EntryExport>
    where
        V: FrameSource + ?Sized,
        A: AudioSource + ?Sized,
        E: ChunkEncoder<Unit = AudioChunk>,
        S: ContainerSink,
    {
        let options = self.options;
        options.validate()?;

        let mux = MuxTask::spawn(sink, &[TrackKind::Audio]);
        let adapter =
            EncoderAdapter::spawn("entry-audio", encoder, mux.handle(), ENCODE_QUEUE_BOUND);
        let archive = Arc::new(ArchiveBuilder::new());
        let mut group = TaskGroup::new(options.max_in_flight, self.cancel.child_token());

        let stats = match self
            .produce_entry(frames, audio, adapter, &mut group, &archive)
            .await
        {
            Ok(stats) => stats,
            Err(err) => {
                group.shutdown().await;
                return Err(release_mux(err, mux).await);
            }
        };

        // the barrier runs even when finalize fails, so no capture outlives the call
        let captured = group.join().await;
        let sound = mux.finalize().await?;
        let pictures = positional(captured?, stats.frame_count)?;
        let sound = archive.put_asset(&sound, AssetKind::Sound)?;

        let manifest = ProjectManifest {
            name: options.name.clone(),
            width: options.video.width,
            height: options.video.height,
            pictures,
            sound,
            duration: options.duration,
            framerate: options.video.framerate,
            frame_count: stats.frame_count,
            use_dummy_code: options.use_dummy_code,
        };
        let descriptor = build_descriptor(&manifest, ids)?;
        let archive = Arc::try_unwrap(archive)
            .map_err(|_| ExportError::container("archive still shared after capture join"))?;
        let archive = archive.finalize(&descriptor.to_bytes()?)?;

        Ok(EntryExport {
            archive,
            descriptor,
            stats,
        })
    }

    async fn produce_entry<V, A>(
        &self,
        frames: &mut V,
        audio: &mut A,
        mut adapter: EncoderAdapter<AudioChunk>,
        group: &mut TaskGroup<(u64, AssetPath)>,
        archive: &Arc<ArchiveBuilder>,
    ) -> ExportResult<RunStats>
    where
        V: FrameSource + ?Sized,
        A: AudioSource + ?Sized,
    {
        let chunk_frames = adapter.preferred_frames();
        let produced = async {
            let stats = Coordinator::new(self.options, self.cancel.clone())
                .with_audio_chunk_frames(chunk_frames)
                .run(
                    frames,
                    audio,
                    &mut CaptureSink {
                        group,
                        archive: Arc::clone(archive),
                    },
                    &mut EncodeSink {
                        adapter: &mut adapter,
                    },
                    |p| (self.progress)(p),
                )
                .await?;
            adapter.flush().await?;
            Ok::<_, ExportError>(stats)
        }
        .await;
        match produced {
            Ok(stats) => {
                adapter.close().await?;
                Ok(stats)
            }
            Err(err) => {
                release_adapter(adapter).await;
                Err(err)
            }
        }
    }

    /// Encodes video and audio into one MP4 container.
    pub async fn mp4<V, A, VE, AE, S>(
        &self,
        frames: &mut V,
        audio: &mut A,
        video_encoder: VE,
        audio_encoder: AE,
        sink: S,
    ) -> ExportResult<Mp4Export>
    where
        V: FrameSource + ?Sized,
        A: AudioSource + ?Sized,
        VE: ChunkEncoder<Unit = VideoFrame>,
        AE: ChunkEncoder<Unit = AudioChunk>,
        S: ContainerSink,
    {
        self.options.validate()?;

        let mux = MuxTask::spawn(sink, &[TrackKind::Video, TrackKind::Audio]);
        let video =
            EncoderAdapter::spawn("mp4-video", video_encoder, mux.handle(), ENCODE_QUEUE_BOUND);
        let sound =
            EncoderAdapter::spawn("mp4-audio", audio_encoder, mux.handle(), ENCODE_QUEUE_BOUND);

        let stats = match self.produce_mp4(frames, audio, video, sound).await {
            Ok(stats) => stats,
            Err(err) => return Err(release_mux(err, mux).await),
        };
        let container = mux.finalize().await?;
        log::info!(
            "mp4 export: {} frames, {} bytes",
            stats.frame_count,
            container.len()
        );
        Ok(Mp4Export { container, stats })
    }

    async fn produce_mp4<V, A>(
        &self,
        frames: &mut V,
        audio: &mut A,
        mut video: EncoderAdapter<VideoFrame>,
        mut sound: EncoderAdapter<AudioChunk>,
    ) -> ExportResult<RunStats>
    where
        V: FrameSource + ?Sized,
        A: AudioSource + ?Sized,
    {
        let chunk_frames = sound.preferred_frames();
        let produced = async {
            let stats = Coordinator::new(self.options, self.cancel.clone())
                .with_audio_chunk_frames(chunk_frames)
                .run(
                    frames,
                    audio,
                    &mut EncodeSink {
                        adapter: &mut video,
                    },
                    &mut EncodeSink {
                        adapter: &mut sound,
                    },
                    |p| (self.progress)(p),
                )
                .await?;
            tokio::try_join!(video.flush(), sound.flush())?;
            Ok::<_, ExportError>(stats)
        }
        .await;
        match produced {
            Ok(stats) => {
                // both closes run to completion so neither worker is left behind
                let (video, sound) = tokio::join!(video.close(), sound.close());
                video?;
                sound?;
                Ok(stats)
            }
            Err(err) => {
                tokio::join!(release_adapter(video), release_adapter(sound));
                Err(err)
            }
        }
    }
}

/// Submits each unit, then waits for the codec to take it off the queue.
struct EncodeSink<'e, U> {
    adapter: &'e mut EncoderAdapter<U>,
}

impl VideoSink for EncodeSink<'_, VideoFrame> {
    async fn on_frame(&mut self, frame: VideoFrame) -> ExportResult<()> {
        self.adapter.encode(frame).await?;
        self.adapter.wait_dequeue().await
    }
}

impl AudioSink for EncodeSink<'_, AudioChunk> {
    async fn on_chunk(&mut self, chunk: AudioChunk) -> ExportResult<()> {
        self.adapter.encode(chunk).await?;
        self.adapter.wait_dequeue().await
    }
}

/// Spawns PNG capture + archive write per frame into the task group.
struct CaptureSink<'g> {
    group: &'g mut TaskGroup<(u64, AssetPath)>,
    archive: Arc<ArchiveBuilder>,
}

impl VideoSink for CaptureSink<'_> {
    async fn on_frame(&mut self, frame: VideoFrame) -> ExportResult<()> {
        let archive = Arc::clone(&self.archive);
        self.group
            .spawn(async move {
                let index = frame.index;
                let path = tokio::task::spawn_blocking(move || {
                    let png = encode_png(&frame.surface)?;
                    archive.put_asset(&png, AssetKind::Image)
                })
                .await
                .map_err(|e| anyhow::anyhow!("capture of frame {} panicked: {}", index, e))??;
                log::trace!("captured frame {} -> {}", index, path);
                Ok((index, path))
            })
            .await
    }
}

fn encode_png(surface: &Surface) -> ExportResult<Vec<u8>> {
    let image = RgbaImage::from_raw(surface.width, surface.height, surface.data.to_vec())
        .ok_or_else(|| {
            ExportError::capture(format!(
                "{}x{} surface has {} bytes",
                surface.width,
                surface.height,
                surface.data.len()
            ))
        })?;
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .map_err(|e| ExportError::capture(format!("png encode: {}", e)))?;
    Ok(out.into_inner())
}

/// Orders captured paths by frame index; every index must be present.
fn positional(captured: Vec<(u64, AssetPath)>, frame_count: u64) -> ExportResult<Vec<AssetPath>> {
    let mut slots: Vec<Option<AssetPath>> = vec![None; frame_count as usize];
    for (index, path) in captured {
        let slot = slots
            .get_mut(index as usize)
            .ok_or_else(|| ExportError::capture(format!("frame {} beyond {}", index, frame_count)))?;
        *slot = Some(path);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| ExportError::capture(format!("frame {} was never captured", index)))
        })
        .collect()
}

/// Joins a codec worker on the error path; its own failure is only logged.
async fn release_adapter<U: Send + 'static>(adapter: EncoderAdapter<U>) {
    if let Some(err) = adapter.abort().await {
        log::debug!("encoder released with error: {}", err);
    }
}

/// Drops the container sink before the error is returned. A mux task that
/// stopped on its own error holds the root cause behind "mux task stopped".
async fn release_mux(err: ExportError, mux: MuxTask) -> ExportError {
    match mux.abort().await {
        Some(root) => {
            log::debug!("export failed ({}), mux root cause: {}", err, root);
            root
        }
        None => err,
    }
}

#[cfg(test)]
#[path = "export_test.rs"]
mod export_test;
