//! Chunk buffers: staging for one chunk of object data.
//!
//! A [`ChunkBuffer`] accumulates bytes from the writer, keeps a running
//! SHA-1 of everything written, and hands out rewindable readers for the
//! transport. Three variants share the contract:
//!
//! - [`MemoryBuffer`] - pooled in-memory staging, the default
//! - [`FileBuffer`] - scratch file per chunk, bounding memory per upload slot
//! - [`SectionBuffer`] - pass-through over a caller-supplied seekable source,
//!   appending its own checksum at end of stream
//!
//! Buffers are written by exactly one task until dispatched, then owned by
//! exactly one worker until released. Readers always start at byte 0 and can
//! be restarted there with [`ChunkRead::rewind`] when an upload is retried.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Mutex, OnceLock};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, AsyncWriteExt, ReadBuf, SeekFrom};

use rusty_objects_common::{Sha1Hasher, HASH_HEX_LEN, HEX_DIGITS_AT_END};

use crate::error::StorageError;

/// A rewindable byte stream handed to the transport for one upload attempt.
///
/// Retries re-read the same bytes, so the stream must support restarting at
/// byte 0. Rewinding is an explicit capability rather than general seeking;
/// no other offset is expressible.
#[async_trait]
pub trait ChunkRead: AsyncRead + Send + Unpin {
    /// Restart the stream at byte 0, resetting any internal hash state and
    /// end-of-stream latch.
    async fn rewind(&mut self) -> Result<(), StorageError>;
}

/// Staging for a single chunk of object data.
#[async_trait]
pub(crate) trait ChunkBuffer: Send {
    /// Append bytes, returning how many were accepted.
    async fn write(&mut self, data: &[u8]) -> Result<usize, StorageError>;

    /// Payload length in bytes, as the transport will see it.
    fn len(&self) -> u64;

    /// Hex-encoded SHA-1 of the bytes written so far, or a sentinel for
    /// buffers that append their checksum to the payload.
    fn hash(&self) -> String;

    /// A fresh reader over the buffered bytes, starting at byte 0.
    async fn reader(&mut self) -> Result<Box<dyn ChunkRead>, StorageError>;

    /// Release the buffer's resources. Called exactly once per chunk; the
    /// variants also release on drop so cancellation cannot leak scratch
    /// space.
    async fn close(&mut self) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// Buffer pool
// ---------------------------------------------------------------------------

/// Upper bound on idle buffers retained for reuse.
const MAX_POOLED_BUFFERS: usize = 8;

/// Process-wide free list of chunk allocations.
///
/// Chunk buffers are large (up to `chunk_size` bytes), so allocations are
/// recycled between chunks instead of returned to the allocator.
struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    fn get(&self) -> BytesMut {
        self.free.lock().unwrap().pop().unwrap_or_default()
    }

    fn put(&self, mut buf: BytesMut) {
        buf.clear();
        let mut free = self.free.lock().unwrap();
        if free.len() < MAX_POOLED_BUFFERS {
            free.push(buf);
        }
    }
}

fn pool() -> &'static BufferPool {
    static POOL: OnceLock<BufferPool> = OnceLock::new();
    POOL.get_or_init(|| BufferPool {
        free: Mutex::new(Vec::new()),
    })
}

// ---------------------------------------------------------------------------
// In-memory variant
// ---------------------------------------------------------------------------

/// Pooled in-memory chunk buffer. Zero-syscall staging for the common case.
pub(crate) struct MemoryBuffer {
    /// Accumulating bytes; taken when the first reader freezes the buffer.
    data: Option<BytesMut>,
    /// Frozen contents, shared zero-copy with all readers.
    frozen: Option<Bytes>,
    hasher: Sha1Hasher,
}

impl MemoryBuffer {
    pub(crate) fn new() -> Self {
        Self {
            data: Some(pool().get()),
            frozen: None,
            hasher: Sha1Hasher::new(),
        }
    }
}

#[async_trait]
impl ChunkBuffer for MemoryBuffer {
    async fn write(&mut self, data: &[u8]) -> Result<usize, StorageError> {
        let buf = self.data.as_mut().ok_or_else(|| StorageError::Unsupported {
            message: "write to sealed memory buffer".into(),
        })?;
        buf.extend_from_slice(data);
        self.hasher.update(data);
        Ok(data.len())
    }

    fn len(&self) -> u64 {
        match (&self.frozen, &self.data) {
            (Some(frozen), _) => frozen.len() as u64,
            (None, Some(data)) => data.len() as u64,
            (None, None) => 0,
        }
    }

    fn hash(&self) -> String {
        self.hasher.finish_hex()
    }

    async fn reader(&mut self) -> Result<Box<dyn ChunkRead>, StorageError> {
        if self.frozen.is_none() {
            let data: BytesMut = self.data.take().unwrap_or_default();
            self.frozen = Some(data.freeze());
        }
        let bytes: Bytes = match &self.frozen {
            Some(frozen) => frozen.clone(),
            None => Bytes::new(),
        };
        Ok(Box::new(MemoryReader { data: bytes, pos: 0 }))
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if let Some(data) = self.data.take() {
            pool().put(data);
        }
        if let Some(frozen) = self.frozen.take() {
            // Reclaim the allocation unless a reader still aliases it.
            if let Ok(data) = frozen.try_into_mut() {
                pool().put(data);
            }
        }
        Ok(())
    }
}

/// Zero-copy reader over a frozen memory buffer.
struct MemoryReader {
    data: Bytes,
    pos: usize,
}

impl AsyncRead for MemoryReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.pos < this.data.len() {
            let n: usize = buf.remaining().min(this.data.len() - this.pos);
            buf.put_slice(&this.data[this.pos..this.pos + n]);
            this.pos += n;
        }
        Poll::Ready(Ok(()))
    }
}

#[async_trait]
impl ChunkRead for MemoryReader {
    async fn rewind(&mut self) -> Result<(), StorageError> {
        self.pos = 0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File variant
// ---------------------------------------------------------------------------

/// Scratch-file chunk buffer. Bounds memory to one temp file per upload slot.
pub(crate) struct FileBuffer {
    /// Owns the scratch file; dropping it unlinks the file.
    tmp: Option<NamedTempFile>,
    path: PathBuf,
    writer: tokio::fs::File,
    hasher: Sha1Hasher,
    len: u64,
}

impl FileBuffer {
    /// Create a scratch file in `dir`, or the system temp directory when
    /// `None`.
    pub(crate) async fn create(dir: Option<&Path>) -> Result<Self, StorageError> {
        let tmp: NamedTempFile = match dir {
            Some(dir) => NamedTempFile::new_in(dir)
                .map_err(|e| StorageError::io(dir.display().to_string(), e))?,
            None => NamedTempFile::new().map_err(StorageError::from)?,
        };
        let path: PathBuf = tmp.path().to_path_buf();
        let writer = tmp
            .as_file()
            .try_clone()
            .map_err(|e| StorageError::io(path.display().to_string(), e))?;
        Ok(Self {
            tmp: Some(tmp),
            path,
            writer: tokio::fs::File::from_std(writer),
            hasher: Sha1Hasher::new(),
            len: 0,
        })
    }
}

#[async_trait]
impl ChunkBuffer for FileBuffer {
    async fn write(&mut self, data: &[u8]) -> Result<usize, StorageError> {
        self.writer
            .write_all(data)
            .await
            .map_err(|e| StorageError::io(self.path.display().to_string(), e))?;
        self.hasher.update(data);
        self.len += data.len() as u64;
        Ok(data.len())
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn hash(&self) -> String {
        self.hasher.finish_hex()
    }

    async fn reader(&mut self) -> Result<Box<dyn ChunkRead>, StorageError> {
        self.writer
            .flush()
            .await
            .map_err(|e| StorageError::io(self.path.display().to_string(), e))?;
        // Independent read handle; the transport never sees the write handle
        // and cannot close the underlying file.
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| StorageError::io(self.path.display().to_string(), e))?;
        Ok(Box::new(FileReader {
            file,
            path: self.path.clone(),
        }))
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if let Some(tmp) = self.tmp.take() {
            tmp.close()
                .map_err(|e| StorageError::io(self.path.display().to_string(), e))?;
        }
        Ok(())
    }
}

/// Reader over a scratch file.
struct FileReader {
    file: tokio::fs::File,
    path: PathBuf,
}

impl AsyncRead for FileReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_read(cx, buf)
    }
}

#[async_trait]
impl ChunkRead for FileReader {
    async fn rewind(&mut self) -> Result<(), StorageError> {
        self.file
            .seek(SeekFrom::Start(0))
            .await
            .map_err(|e| StorageError::io(self.path.display().to_string(), e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pass-through variant
// ---------------------------------------------------------------------------

/// Pass-through buffer over a caller-supplied seekable source of known size.
///
/// Nothing is copied: the reader streams the source, hashing as it goes, and
/// appends 40 hex digits of the final SHA-1 after the last payload byte. The
/// advertised hash is the `hex_digits_at_end` sentinel, which tells the
/// service to verify against that suffix instead of a pre-declared checksum.
pub(crate) struct SectionBuffer<R> {
    source: Option<R>,
    size: u64,
}

impl<R> SectionBuffer<R> {
    pub(crate) fn new(source: R, size: u64) -> Self {
        Self {
            source: Some(source),
            size,
        }
    }
}

#[async_trait]
impl<R> ChunkBuffer for SectionBuffer<R>
where
    R: AsyncRead + AsyncSeek + Send + Unpin + 'static,
{
    async fn write(&mut self, _data: &[u8]) -> Result<usize, StorageError> {
        Err(StorageError::Unsupported {
            message: "pass-through buffer does not accept writes".into(),
        })
    }

    fn len(&self) -> u64 {
        self.size + HASH_HEX_LEN as u64
    }

    fn hash(&self) -> String {
        HEX_DIGITS_AT_END.to_string()
    }

    async fn reader(&mut self) -> Result<Box<dyn ChunkRead>, StorageError> {
        // The source moves into its reader; retries rewind that reader
        // instead of taking a second one.
        let source: R = self.source.take().ok_or_else(|| StorageError::Unsupported {
            message: "pass-through buffer supports a single reader".into(),
        })?;
        Ok(Box::new(SectionReader {
            source,
            hasher: Sha1Hasher::new(),
            tail: None,
        }))
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.source = None;
        Ok(())
    }
}

/// Remaining checksum bytes once the source is exhausted.
struct Tail {
    bytes: Vec<u8>,
    pos: usize,
}

/// Streams a seekable source and appends the hex SHA-1 at end of stream.
struct SectionReader<R> {
    source: R,
    hasher: Sha1Hasher,
    tail: Option<Tail>,
}

impl<R: AsyncRead + Send + Unpin> AsyncRead for SectionReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if let Some(tail) = &mut this.tail {
            let n: usize = buf.remaining().min(tail.bytes.len() - tail.pos);
            buf.put_slice(&tail.bytes[tail.pos..tail.pos + n]);
            tail.pos += n;
            return Poll::Ready(Ok(()));
        }
        let before: usize = buf.filled().len();
        match Pin::new(&mut this.source).poll_read(cx, buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Ready(Ok(())) => {
                let filled: usize = buf.filled().len();
                if filled == before {
                    // Source exhausted: switch to serving the checksum.
                    let mut tail = Tail {
                        bytes: this.hasher.finish_hex().into_bytes(),
                        pos: 0,
                    };
                    let n: usize = buf.remaining().min(tail.bytes.len());
                    buf.put_slice(&tail.bytes[..n]);
                    tail.pos = n;
                    this.tail = Some(tail);
                } else {
                    this.hasher.update(&buf.filled()[before..]);
                }
                Poll::Ready(Ok(()))
            }
        }
    }
}

#[async_trait]
impl<R> ChunkRead for SectionReader<R>
where
    R: AsyncRead + AsyncSeek + Send + Unpin,
{
    async fn rewind(&mut self) -> Result<(), StorageError> {
        self.source
            .seek(SeekFrom::Start(0))
            .await
            .map_err(StorageError::from)?;
        self.hasher.reset();
        self.tail = None;
        Ok(())
    }
}
