use std::collections::BTreeSet;

use bytes::Bytes;
use ffmpeg_export::{EncodedChunk, TrackKind};
use tokio::sync::{mpsc, oneshot};

use crate::error::{ExportError, ExportResult};

const MUX_QUEUE_BOUND: usize = 256;

/// Container assembly backend driven by the mux task.
pub trait ContainerSink: Send + 'static {
    fn add_chunk(&mut self, chunk: EncodedChunk) -> ExportResult<()>;
    fn finalize(self) -> ExportResult<Bytes>;
}

enum MuxCommand {
    Chunk(EncodedChunk),
    /// Every chunk of this track has been delivered.
    End(TrackKind),
    Finalize(oneshot::Sender<ExportResult<Bytes>>),
}

/// Producer side of the mux task, cloned into each encoder worker.
#[derive(Clone)]
pub struct MuxHandle {
    tx: mpsc::Sender<MuxCommand>,
}

impl MuxHandle {
    /// Delivers a chunk from a blocking encoder thread.
    pub fn blocking_send(&self, chunk: EncodedChunk) -> ExportResult<()> {
        self.tx
            .blocking_send(MuxCommand::Chunk(chunk))
            .map_err(|_| ExportError::container("mux task stopped"))
    }

    pub async fn send(&self, chunk: EncodedChunk) -> ExportResult<()> {
        self.tx
            .send(MuxCommand::Chunk(chunk))
            .await
            .map_err(|_| ExportError::container("mux task stopped"))
    }

    pub async fn end(&self, track: TrackKind) -> ExportResult<()> {
        self.tx
            .send(MuxCommand::End(track))
            .await
            .map_err(|_| ExportError::container("mux task stopped"))
    }
}

/// Owns one container sink on a blocking thread. Chunks of a track arrive in
/// that track's submission order; tracks interleave by arrival.
pub struct MuxTask {
    tx: mpsc::Sender<MuxCommand>,
    handle: tokio::task::JoinHandle<ExportResult<()>>,
}

impl MuxTask {
    /// Starts the task; `tracks` lists the tracks that must end before finalize.
    pub fn spawn<S: ContainerSink>(sink: S, tracks: &[TrackKind]) -> Self {
        let (tx, rx) = mpsc::channel(MUX_QUEUE_BOUND);
        let pending: BTreeSet<TrackKind> = tracks.iter().copied().collect();
        let handle = tokio::task::spawn_blocking(move || Self::mux_loop(sink, pending, rx));
        Self { tx, handle }
    }

    pub fn handle(&self) -> MuxHandle {
        MuxHandle {
            tx: self.tx.clone(),
        }
    }

    fn mux_loop<S: ContainerSink>(
        mut sink: S,
        mut pending: BTreeSet<TrackKind>,
        mut rx: mpsc::Receiver<MuxCommand>,
    ) -> ExportResult<()> {
        let mut ended = BTreeSet::new();
        let mut chunks = 0u64;
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                MuxCommand::Chunk(chunk) => {
                    if ended.contains(&chunk.track) {
                        return Err(ExportError::container(format!(
                            "{} chunk after end of track",
                            chunk.track
                        )));
                    }
                    if !pending.contains(&chunk.track) {
                        return Err(ExportError::container(format!(
                            "no {} track in this container",
                            chunk.track
                        )));
                    }
                    sink.add_chunk(chunk)?;
                    chunks += 1;
                }
                MuxCommand::End(track) => {
                    pending.remove(&track);
                    ended.insert(track);
                    log::debug!("mux: {} track ended after {} chunks total", track, chunks);
                }
                MuxCommand::Finalize(reply) => {
                    let result = if pending.is_empty() {
                        sink.finalize()
                    } else {
                        Err(ExportError::container(format!(
                            "finalize before tracks {:?} were flushed and closed",
                            pending
                        )))
                    };
                    let failed = result.is_err();
                    let _ = reply.send(result);
                    return if failed {
                        Err(ExportError::container("finalize failed"))
                    } else {
                        Ok(())
                    };
                }
            }
        }
        // every handle dropped without finalize: abandoned export
        Ok(())
    }

    /// Seals the container; valid once every track has ended.
    pub async fn finalize(self) -> ExportResult<Bytes> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(MuxCommand::Finalize(reply)).await.is_err() {
            return Err(self.failure().await);
        }
        match rx.await {
            Ok(result) => {
                let _ = self.handle.await;
                result
            }
            Err(_) => Err(self.failure().await),
        }
    }

    /// The error that stopped the task, once it has stopped.
    async fn failure(self) -> ExportError {
        self.abort()
            .await
            .unwrap_or_else(|| ExportError::container("mux task stopped"))
    }

    /// Abandons the container and waits until the sink has been dropped.
    ///
    /// Every `MuxHandle` must be gone first, or this waits for them. Returns
    /// the task's own error if it stopped on one.
    pub async fn abort(self) -> Option<ExportError> {
        let MuxTask { tx, handle } = self;
        drop(tx);
        match handle.await {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(e) => Some(anyhow::anyhow!("mux task panicked: {}", e).into()),
        }
    }
}

#[cfg(test)]
#[path = "mux_test.rs"]
mod mux_test;
