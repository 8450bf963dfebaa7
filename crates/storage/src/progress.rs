//! Per-chunk upload progress tracking.
//!
//! Workers wrap each chunk reader in a [`MeteredReader`] that counts bytes
//! handed to the transport. The counters live in a [`ProgressTable`] shared
//! with the writer, which snapshots them into a
//! [`WriterStatus`](crate::WriterStatus) on demand.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, ReadBuf};

use crate::buffer::ChunkRead;
use crate::error::StorageError;
use crate::types::WriterStatus;

/// Bytes delivered to the transport for one in-flight chunk.
pub(crate) struct ChunkMeter {
    read: AtomicU64,
    size: u64,
}

impl ChunkMeter {
    fn new(size: u64) -> Self {
        Self {
            read: AtomicU64::new(0),
            size,
        }
    }

    /// Total bytes read through the meter so far.
    pub(crate) fn bytes_read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    /// Fraction of the declared size delivered, in `[0, 1]`.
    fn fraction(&self) -> f64 {
        if self.size == 0 {
            return 1.0;
        }
        self.bytes_read() as f64 / self.size as f64
    }
}

/// Chunk-id-indexed progress slots for one writer.
///
/// A slot is registered when a worker begins a chunk and cleared (set to
/// `None`) when it completes; cleared or never-registered slots read as
/// fully delivered.
#[derive(Default)]
pub(crate) struct ProgressTable {
    slots: Mutex<HashMap<u32, Option<Arc<ChunkMeter>>>>,
}

impl ProgressTable {
    /// Register a meter for the given chunk id.
    pub(crate) fn register(&self, id: u32, size: u64) -> Arc<ChunkMeter> {
        let meter: Arc<ChunkMeter> = Arc::new(ChunkMeter::new(size));
        self.slots.lock().unwrap().insert(id, Some(meter.clone()));
        meter
    }

    /// Clear the slot for a chunk that finished (or was skipped).
    pub(crate) fn complete(&self, id: u32) {
        self.slots.lock().unwrap().insert(id, None);
    }

    /// Best-effort copy of all per-chunk fractions, ordered by chunk id.
    pub(crate) fn snapshot(&self) -> WriterStatus {
        let slots = self.slots.lock().unwrap();
        let mut progress: Vec<f64> = Vec::with_capacity(slots.len());
        for id in 1..=slots.len() as u32 {
            let fraction: f64 = match slots.get(&id) {
                Some(Some(meter)) => meter.fraction(),
                _ => 1.0,
            };
            progress.push(fraction);
        }
        WriterStatus { progress }
    }
}

/// Counting wrapper around a chunk reader.
///
/// Rewinding resets both the byte counter and the underlying stream, so a
/// retried upload reports progress from zero again.
pub(crate) struct MeteredReader {
    inner: Box<dyn ChunkRead>,
    meter: Arc<ChunkMeter>,
}

impl MeteredReader {
    pub(crate) fn new(inner: Box<dyn ChunkRead>, meter: Arc<ChunkMeter>) -> Self {
        Self { inner, meter }
    }
}

impl AsyncRead for MeteredReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before: usize = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n: u64 = (buf.filled().len() - before) as u64;
                this.meter.read.fetch_add(n, Ordering::Relaxed);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[async_trait]
impl ChunkRead for MeteredReader {
    async fn rewind(&mut self) -> Result<(), StorageError> {
        self.inner.rewind().await?;
        self.meter.read.store(0, Ordering::Relaxed);
        Ok(())
    }
}
