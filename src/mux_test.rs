use std::sync::atomic::Ordering;

use ffmpeg_export::{EncodedChunk, TrackKind};

use super::MuxTask;
use crate::{
    error::ExportError,
    test_support::{RecordingSink, Tracked},
};

fn chunk(track: TrackKind, pts: i64) -> EncodedChunk {
    EncodedChunk::new(track, pts.to_le_bytes().to_vec(), pts, 10, true)
}

#[tokio::test]
async fn test_tracks_interleave_by_arrival() {
    let sink = RecordingSink::default();
    let mux = MuxTask::spawn(sink.clone(), &[TrackKind::Video, TrackKind::Audio]);
    let video = mux.handle();
    let audio = mux.handle();

    let v = tokio::spawn(async move {
        for pts in [0, 100, 200] {
            video.send(chunk(TrackKind::Video, pts)).await?;
        }
        video.end(TrackKind::Video).await
    });
    let a = tokio::spawn(async move {
        for pts in [0, 50, 100, 150] {
            audio.send(chunk(TrackKind::Audio, pts)).await?;
        }
        audio.end(TrackKind::Audio).await
    });
    v.await.unwrap().unwrap();
    a.await.unwrap().unwrap();

    let data = mux.finalize().await.unwrap();
    assert_eq!(data.len(), 7 * 8);
    let video_pts: Vec<i64> = sink.track(TrackKind::Video).iter().map(|c| c.pts).collect();
    let audio_pts: Vec<i64> = sink.track(TrackKind::Audio).iter().map(|c| c.pts).collect();
    assert_eq!(video_pts, vec![0, 100, 200]);
    assert_eq!(audio_pts, vec![0, 50, 100, 150]);
}

#[tokio::test]
async fn test_chunk_after_end_is_rejected() {
    let mux = MuxTask::spawn(RecordingSink::default(), &[TrackKind::Audio]);
    let handle = mux.handle();
    handle.send(chunk(TrackKind::Audio, 0)).await.unwrap();
    handle.end(TrackKind::Audio).await.unwrap();
    let _ = handle.send(chunk(TrackKind::Audio, 10)).await;
    drop(handle);

    let err = mux.finalize().await.unwrap_err();
    assert!(matches!(err, ExportError::Container(_)), "got {:?}", err);
    assert!(err.to_string().contains("after end of track"));
}

#[tokio::test]
async fn test_unknown_track_is_rejected() {
    let mux = MuxTask::spawn(RecordingSink::default(), &[TrackKind::Audio]);
    let handle = mux.handle();
    let _ = handle.send(chunk(TrackKind::Video, 0)).await;
    drop(handle);

    let err = mux.finalize().await.unwrap_err();
    assert!(err.to_string().contains("no video track"));
}

#[tokio::test]
async fn test_abort_drops_sink_of_healthy_task() {
    let (sink, released) = Tracked::new(RecordingSink::default());
    let mux = MuxTask::spawn(sink, &[TrackKind::Audio]);
    let handle = mux.handle();
    handle.send(chunk(TrackKind::Audio, 0)).await.unwrap();
    drop(handle);

    assert!(mux.abort().await.is_none());
    assert!(released.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_abort_returns_root_cause() {
    let (sink, released) = Tracked::new(RecordingSink {
        fail_on_chunk: Some(0),
        ..Default::default()
    });
    let mux = MuxTask::spawn(sink, &[TrackKind::Audio]);
    let handle = mux.handle();
    let _ = handle.send(chunk(TrackKind::Audio, 0)).await;
    drop(handle);

    let err = mux.abort().await.unwrap();
    assert!(err.to_string().contains("sink rejected chunk"), "got {}", err);
    assert!(released.load(Ordering::SeqCst));
}
