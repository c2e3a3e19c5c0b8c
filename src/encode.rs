use std::sync::Arc;

use ffmpeg_export::{EncodedChunk, TrackKind};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    error::{ExportError, ExportResult},
    mux::MuxHandle,
};

/// Default bound on units queued ahead of a codec.
pub const ENCODE_QUEUE_BOUND: usize = 8;

/// A synchronous codec driven on a blocking worker thread.
pub trait ChunkEncoder: Send + 'static {
    type Unit: Send + 'static;

    fn track(&self) -> TrackKind;

    /// Sample frames per unit the codec wants, if it has a fixed frame size.
    fn preferred_frames(&self) -> Option<usize> {
        None
    }

    fn encode(&mut self, unit: Self::Unit) -> ExportResult<Vec<EncodedChunk>>;

    /// Drains every buffered unit.
    fn flush(&mut self) -> ExportResult<Vec<EncodedChunk>>;
}

enum EncodeCommand<U> {
    Encode(U),
    Flush(oneshot::Sender<ExportResult<()>>),
}

/// Feeds one codec through a bounded queue and forwards its chunks, in
/// submission order, to a mux task.
///
/// `encode` only enqueues. Queue depth is published on a watch channel so a
/// producer can wait for the codec to dequeue before submitting more.
pub struct EncoderAdapter<U> {
    name: String,
    track: TrackKind,
    capacity: usize,
    preferred_frames: Option<usize>,
    tx: Option<mpsc::Sender<EncodeCommand<U>>>,
    depth_tx: Arc<watch::Sender<usize>>,
    depth: watch::Receiver<usize>,
    worker: Option<tokio::task::JoinHandle<ExportResult<u64>>>,
    mux: MuxHandle,
    submitted: u64,
    flushed: bool,
}

impl<U: Send + 'static> EncoderAdapter<U> {
    pub fn spawn<E>(name: &str, encoder: E, mux: MuxHandle, capacity: usize) -> Self
    where
        E: ChunkEncoder<Unit = U>,
    {
        let capacity = capacity.max(1);
        let track = encoder.track();
        let preferred_frames = encoder.preferred_frames();
        let (tx, rx) = mpsc::channel(capacity);
        let (depth_tx, depth) = watch::channel(0usize);
        let depth_tx = Arc::new(depth_tx);

        let worker_depth = Arc::clone(&depth_tx);
        let worker_mux = mux.clone();
        let worker_name = name.to_string();
        let worker = tokio::task::spawn_blocking(move || {
            Self::encode_loop(&worker_name, encoder, rx, worker_depth, worker_mux)
        });
        log::info!("{}: encoder adapter started ({} track)", name, track);

        Self {
            name: name.to_string(),
            track,
            capacity,
            preferred_frames,
            tx: Some(tx),
            depth_tx,
            depth,
            worker: Some(worker),
            mux,
            submitted: 0,
            flushed: false,
        }
    }

    fn encode_loop<E>(
        name: &str,
        mut encoder: E,
        mut rx: mpsc::Receiver<EncodeCommand<U>>,
        depth: Arc<watch::Sender<usize>>,
        mux: MuxHandle,
    ) -> ExportResult<u64>
    where
        E: ChunkEncoder<Unit = U>,
    {
        let mut emitted = 0u64;
        let result = Self::drive(&mut encoder, &mut rx, &depth, &mux, &mut emitted);
        // wake any producer parked on the depth signal
        depth.send_replace(0);
        match result {
            Ok(()) => {
                log::debug!("{}: encode loop finished, {} chunks", name, emitted);
                Ok(emitted)
            }
            Err(err) => {
                log::error!("{}: encode loop failed: {}", name, err);
                Err(err)
            }
        }
    }

    fn drive<E>(
        encoder: &mut E,
        rx: &mut mpsc::Receiver<EncodeCommand<U>>,
        depth: &watch::Sender<usize>,
        mux: &MuxHandle,
        emitted: &mut u64,
    ) -> ExportResult<()>
    where
        E: ChunkEncoder<Unit = U>,
    {
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                EncodeCommand::Encode(unit) => {
                    let chunks = encoder.encode(unit);
                    depth.send_modify(|d| *d = d.saturating_sub(1));
                    for chunk in chunks? {
                        mux.blocking_send(chunk)?;
                        *emitted += 1;
                    }
                }
                EncodeCommand::Flush(reply) => {
                    let flushed = encoder.flush().and_then(|chunks| {
                        for chunk in chunks {
                            mux.blocking_send(chunk)?;
                            *emitted += 1;
                        }
                        Ok(())
                    });
                    if let Err(err) = flushed {
                        let _ = reply.send(Err(ExportError::codec(err.to_string())));
                        return Err(err);
                    }
                    let _ = reply.send(Ok(()));
                }
            }
        }
        Ok(())
    }

    pub fn track(&self) -> TrackKind {
        self.track
    }

    pub fn preferred_frames(&self) -> Option<usize> {
        self.preferred_frames
    }

    /// Units submitted but not yet taken by the codec.
    pub fn queue_depth(&self) -> usize {
        *self.depth.borrow()
    }

    /// Enqueues one unit; waits only if the channel itself is full.
    pub async fn encode(&mut self, unit: U) -> ExportResult<()> {
        if self.flushed {
            return Err(ExportError::codec(format!(
                "{}: encode after flush",
                self.name
            )));
        }
        let tx = match self.tx.as_ref() {
            Some(tx) => tx,
            None => return Err(ExportError::codec(format!("{}: closed", self.name))),
        };
        self.depth_tx.send_modify(|d| *d += 1);
        if tx.send(EncodeCommand::Encode(unit)).await.is_err() {
            return Err(self.worker_failure().await);
        }
        self.submitted += 1;
        Ok(())
    }

    /// Resolves once the codec has dequeued enough that the queue is below
    /// capacity. Returns immediately when already below.
    pub async fn wait_dequeue(&mut self) -> ExportResult<()> {
        let capacity = self.capacity;
        let Some(tx) = self.tx.clone() else {
            return Err(ExportError::codec(format!("{}: closed", self.name)));
        };
        let drained = tokio::select! {
            biased;
            _ = tx.closed() => false,
            changed = self.depth.wait_for(|d| *d < capacity) => changed.is_ok(),
        };
        if !drained {
            return Err(self.worker_failure().await);
        }
        Ok(())
    }

    /// Waits until every submitted unit has been encoded and its chunks
    /// handed to the mux task.
    pub async fn flush(&mut self) -> ExportResult<()> {
        let tx = match self.tx.as_ref() {
            Some(tx) => tx,
            None => return Err(ExportError::codec(format!("{}: closed", self.name))),
        };
        let (reply, rx) = oneshot::channel();
        if tx.send(EncodeCommand::Flush(reply)).await.is_err() {
            return Err(self.worker_failure().await);
        }
        match rx.await {
            Ok(Ok(())) => {
                self.flushed = true;
                log::debug!("{}: flushed after {} units", self.name, self.submitted);
                Ok(())
            }
            Ok(Err(_)) | Err(_) => Err(self.worker_failure().await),
        }
    }

    /// Releases the codec and marks the track as ended for the mux task.
    /// Valid only after `flush`.
    pub async fn close(mut self) -> ExportResult<u64> {
        if !self.flushed {
            return Err(ExportError::codec(format!(
                "{}: close called before flush",
                self.name
            )));
        }
        self.tx = None;
        let emitted = match self.worker.take() {
            Some(worker) => join_worker(worker).await?,
            None => 0,
        };
        self.mux.end(self.track).await?;
        log::info!(
            "{}: closed, {} units -> {} chunks",
            self.name,
            self.submitted,
            emitted
        );
        Ok(emitted)
    }

    /// Drops pending work and waits for the worker to release the codec.
    /// Returns the worker's own error, if it stopped on one.
    pub async fn abort(mut self) -> Option<ExportError> {
        self.tx = None;
        let worker = self.worker.take()?;
        let result = join_worker(worker).await;
        log::debug!("{}: aborted after {} units", self.name, self.submitted);
        result.err()
    }

    async fn worker_failure(&mut self) -> ExportError {
        self.tx = None;
        match self.worker.take() {
            Some(worker) => match join_worker(worker).await {
                Err(err) => err,
                Ok(_) => ExportError::codec(format!("{}: worker stopped", self.name)),
            },
            None => ExportError::codec(format!("{}: worker stopped", self.name)),
        }
    }
}

async fn join_worker(worker: tokio::task::JoinHandle<ExportResult<u64>>) -> ExportResult<u64> {
    match worker.await {
        Ok(result) => result,
        Err(e) => Err(anyhow::anyhow!("encoder worker panicked: {}", e).into()),
    }
}

#[cfg(test)]
#[path = "encode_test.rs"]
mod encode_test;
