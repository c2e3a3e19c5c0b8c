use std::{
    collections::HashMap,
    io::Read,
    sync::{Mutex, atomic::Ordering},
};

use tokio_util::sync::CancellationToken;

use super::*;
use crate::{
    archive::DESCRIPTOR_PATH,
    options::{AudioOptions, VideoOptions},
    project::SequentialIds,
    test_support::{
        CountingFrameSource, DelayedVideoEncoder, FixedFrameAudioEncoder, RampAudioSource,
        RecordingSink, Tracked,
    },
};

fn options() -> RenderOptions {
    RenderOptions {
        name: "demo".to_string(),
        duration: 1.0,
        video: VideoOptions {
            width: 4,
            height: 2,
            framerate: 10.0,
        },
        audio: AudioOptions {
            sample_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
        max_in_flight: 3,
        ..Default::default()
    }
}

/// Entries in archive order.
fn read_archive(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = tar::Archive::new(bytes);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            (path, data)
        })
        .collect()
}

#[tokio::test]
async fn test_entry_export_end_to_end() -> anyhow::Result<()> {
    let options = options();
    let mut frames = CountingFrameSource::new(4, 2);
    let mut audio = RampAudioSource::new(48_000, 2);
    let sink = RecordingSink::default();
    let recorded = sink.clone();
    let progress = Mutex::new(Vec::new());

    let export = Exporter::new(&options, CancellationToken::new())
        .on_progress(|p| progress.lock().unwrap().push(p))
        .entry(
            &mut frames,
            &mut audio,
            FixedFrameAudioEncoder { frame_size: 1152 },
            sink,
            &mut SequentialIds::default(),
        )
        .await?;

    assert_eq!(export.stats.frame_count, 10);
    assert_eq!(export.stats.audio_frames, 48_000);
    assert_eq!(progress.lock().unwrap().last().copied(), Some(1.0));

    // audio went out in codec-sized chunks with a short tail
    let audio_chunks = recorded.chunks();
    assert_eq!(audio_chunks.len(), 42);
    let sizes: Vec<u32> = audio_chunks
        .iter()
        .map(|c| u32::from_le_bytes(c.data[..4].try_into().unwrap()))
        .collect();
    assert!(sizes[..41].iter().all(|n| *n == 1152));
    assert_eq!(sizes[41], 48_000 - 41 * 1152);

    let entries = read_archive(&export.archive);
    assert_eq!(entries.len(), 12);
    assert_eq!(entries.last().unwrap().0, DESCRIPTOR_PATH);
    let images = entries.iter().filter(|(p, _)| p.ends_with(".png")).count();
    let sounds = entries.iter().filter(|(p, _)| p.ends_with(".mp3")).count();
    assert_eq!((images, sounds), (10, 1));

    let project: serde_json::Value = serde_json::from_slice(&entries.last().unwrap().1)?;
    assert_eq!(project["speed"], serde_json::json!(10));
    let pictures = project["objects"][0]["sprite"]["pictures"].as_array().unwrap();
    assert_eq!(pictures.len(), 10);

    // pictures[i] is the capture of frame i, whatever order tasks finished in
    let by_path: HashMap<&str, &[u8]> = entries
        .iter()
        .map(|(p, d)| (p.as_str(), d.as_slice()))
        .collect();
    for (index, picture) in pictures.iter().enumerate() {
        let png = by_path[picture["fileurl"].as_str().unwrap()];
        let decoded = image::load_from_memory(png)?.to_rgba8();
        assert_eq!(decoded.as_raw()[0], index as u8);
    }
    Ok(())
}

#[tokio::test]
async fn test_mp4_export_with_in_memory_codecs() -> anyhow::Result<()> {
    let options = options();
    let sink = RecordingSink::default();
    let recorded = sink.clone();

    let export = Exporter::new(&options, CancellationToken::new())
        .mp4(
            &mut CountingFrameSource::new(4, 2),
            &mut RampAudioSource::new(48_000, 2),
            DelayedVideoEncoder::new(),
            FixedFrameAudioEncoder { frame_size: 1024 },
            sink,
        )
        .await?;

    let video = recorded.track(TrackKind::Video);
    let indices: Vec<u64> = video
        .iter()
        .map(|c| u64::from_le_bytes(c.data[..8].try_into().unwrap()))
        .collect();
    // held-back last frame arrives through flush
    assert_eq!(indices, (0..10).collect::<Vec<_>>());
    assert_eq!(recorded.track(TrackKind::Audio).len(), 47);
    assert_eq!(export.container.len(), 10 * 8 + 47 * 4);
    Ok(())
}

#[tokio::test]
async fn test_codec_failure_aborts_mp4() {
    let options = options();
    let mut video = DelayedVideoEncoder::new();
    video.fail_at = Some(3);

    let err = Exporter::new(&options, CancellationToken::new())
        .mp4(
            &mut CountingFrameSource::new(4, 2),
            &mut RampAudioSource::new(48_000, 2),
            video,
            FixedFrameAudioEncoder { frame_size: 1024 },
            RecordingSink::default(),
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ExportError::Codec(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_container_failure_surfaces_root_cause() {
    let options = options();
    let sink = RecordingSink {
        fail_on_chunk: Some(2),
        ..Default::default()
    };

    let err = Exporter::new(&options, CancellationToken::new())
        .entry(
            &mut CountingFrameSource::new(4, 2),
            &mut RampAudioSource::new(48_000, 2),
            FixedFrameAudioEncoder { frame_size: 1152 },
            sink,
            &mut SequentialIds::default(),
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ExportError::Container(_)), "got {:?}", err);
    assert!(err.to_string().contains("sink rejected chunk"), "got {}", err);
}

#[tokio::test]
async fn test_capture_failure_aborts_entry() {
    let options = options();
    let mut frames = CountingFrameSource::new(4, 2);
    frames.fail_at = Some(4);

    let err = Exporter::new(&options, CancellationToken::new())
        .entry(
            &mut frames,
            &mut RampAudioSource::new(48_000, 2),
            FixedFrameAudioEncoder { frame_size: 1152 },
            RecordingSink::default(),
            &mut SequentialIds::default(),
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ExportError::Capture(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_failed_entry_releases_codec_and_sink_before_returning() {
    let options = options();
    let mut frames = CountingFrameSource::new(4, 2);
    frames.fail_at = Some(6);
    let (encoder, encoder_released) = Tracked::new(FixedFrameAudioEncoder { frame_size: 1152 });
    let (sink, sink_released) = Tracked::new(RecordingSink::default());

    let err = Exporter::new(&options, CancellationToken::new())
        .entry(
            &mut frames,
            &mut RampAudioSource::new(48_000, 2),
            encoder,
            sink,
            &mut SequentialIds::default(),
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ExportError::Capture(_)), "got {:?}", err);
    assert!(encoder_released.load(Ordering::SeqCst));
    assert!(sink_released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_failed_mp4_releases_codecs_and_sink_before_returning() {
    let options = options();
    let mut video = DelayedVideoEncoder::new();
    video.fail_at = Some(5);
    let (video, video_released) = Tracked::new(video);
    let (sound, sound_released) = Tracked::new(FixedFrameAudioEncoder { frame_size: 1024 });
    let (sink, sink_released) = Tracked::new(RecordingSink::default());

    let err = Exporter::new(&options, CancellationToken::new())
        .mp4(
            &mut CountingFrameSource::new(4, 2),
            &mut RampAudioSource::new(48_000, 2),
            video,
            sound,
            sink,
        )
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ExportError::Codec(_)), "got {:?}", err);
    assert!(video_released.load(Ordering::SeqCst));
    assert!(sound_released.load(Ordering::SeqCst));
    assert!(sink_released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_container_failure_releases_sink_before_returning() {
    let options = options();
    let (sink, released) = Tracked::new(RecordingSink {
        fail_on_chunk: Some(2),
        ..Default::default()
    });

    let err = Exporter::new(&options, CancellationToken::new())
        .entry(
            &mut CountingFrameSource::new(4, 2),
            &mut RampAudioSource::new(48_000, 2),
            FixedFrameAudioEncoder { frame_size: 1152 },
            sink,
            &mut SequentialIds::default(),
        )
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("sink rejected chunk"), "got {}", err);
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_cancelled_export_produces_nothing() {
    let options = options();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = Exporter::new(&options, cancel)
        .entry(
            &mut CountingFrameSource::new(4, 2),
            &mut RampAudioSource::new(48_000, 2),
            FixedFrameAudioEncoder { frame_size: 1152 },
            RecordingSink::default(),
            &mut SequentialIds::default(),
        )
        .await
        .err()
        .unwrap();
    assert!(err.is_cancelled(), "got {:?}", err);
}

#[test]
fn test_positional_rejects_gaps() {
    let path = AssetPath::new(&crate::asset::content_hash(b"x"), AssetKind::Image);
    let ordered = positional(vec![(1, path.clone()), (0, path.clone())], 2).unwrap();
    assert_eq!(ordered.len(), 2);

    let err = positional(vec![(0, path.clone())], 2).unwrap_err();
    assert!(matches!(err, ExportError::Capture(_)));
    let err = positional(vec![(5, path)], 2).unwrap_err();
    assert!(matches!(err, ExportError::Capture(_)));
}
