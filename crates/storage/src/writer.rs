//! The streaming object writer.
//!
//! [`ObjectWriter`] accepts sequential byte writes and decides at the last
//! possible moment which ingest path the service sees:
//!
//! - Streams that never overflow one chunk are sent through the single-shot
//!   upload API on close.
//! - At the first overflow the upload is promoted to the large-file API:
//!   workers are spawned, full chunks are handed to them over a shared
//!   channel, and close drains the workers before finishing the file.
//!
//! Workers retry transient failures per chunk with bounded exponential
//! backoff and a fresh endpoint lease, and resumed uploads skip parts the
//! server already holds with matching checksums. The first fatal error
//! poisons the writer and trips its cancellation signal; every blocking
//! point (dispatch, receive, backoff, network call) observes that signal.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, SeekFrom};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use rusty_objects_common::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CONTENT_TYPE, LAST_MODIFIED_INFO_KEY, MAX_INFO_ENTRIES,
    RETRY_INITIAL_BACKOFF, RETRY_MAX_BACKOFF,
};

use crate::bucket::WriterSet;
use crate::buffer::{ChunkBuffer, ChunkRead, FileBuffer, MemoryBuffer, SectionBuffer};
use crate::error::StorageError;
use crate::progress::{MeteredReader, ProgressTable};
use crate::traits::{Backend, FileHandle, LargeFile};
use crate::types::{ObjectAttrs, WriterOptions, WriterStatus};

/// Process-wide worker tag, used only for log correlation.
static NEXT_WORKER_ID: AtomicU32 = AtomicU32::new(1);

/// State shared between the writer, its workers, and the bucket's registry.
pub(crate) struct WriterShared {
    name: String,
    err: Mutex<Option<StorageError>>,
    cancel: CancellationToken,
    progress: ProgressTable,
}

impl WriterShared {
    fn new(name: String, cancel: CancellationToken) -> Self {
        Self {
            name,
            err: Mutex::new(None),
            cancel,
            progress: ProgressTable::default(),
        }
    }

    /// Latch a fatal error. The first writer wins and trips cancellation;
    /// later calls are no-ops.
    fn set_err(&self, err: StorageError) {
        let mut slot = self.err.lock().unwrap();
        if slot.is_none() {
            tracing::debug!(object = %self.name, error = %err, "error writing object");
            *slot = Some(err);
            self.cancel.cancel();
        }
    }

    fn error(&self) -> Option<StorageError> {
        self.err.lock().unwrap().clone()
    }

    pub(crate) fn status(&self) -> WriterStatus {
        self.progress.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(name: &str, cancel: CancellationToken) -> Self {
        Self::new(name.to_string(), cancel)
    }
}

/// One sealed chunk on its way to a worker.
struct DispatchedChunk {
    /// 1-based part number.
    id: u32,
    buf: Box<dyn ChunkBuffer>,
    /// Upload-slot permit, held until the buffer is released. Bounds live
    /// buffers to `concurrency` in flight plus the one being filled.
    _permit: OwnedSemaphorePermit,
}

/// Everything a worker needs, cloned per task.
struct WorkerContext {
    shared: Arc<WriterShared>,
    backend: Arc<dyn Backend>,
    file: Arc<dyn LargeFile>,
    rx: Arc<tokio::sync::Mutex<UnboundedReceiver<DispatchedChunk>>>,
    seen: Arc<HashMap<u32, String>>,
}

/// Race a fallible operation against the writer's cancellation signal.
async fn run_cancellable<T>(
    cancel: &CancellationToken,
    operation: impl std::future::Future<Output = Result<T, StorageError>>,
) -> Result<T, StorageError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled),
        result = operation => result,
    }
}

/// Wait out a retry delay, bailing early on cancellation.
async fn backoff(cancel: &CancellationToken, delay: Duration) -> Result<(), StorageError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn next_delay(delay: Duration) -> Duration {
    (delay * 2).min(RETRY_MAX_BACKOFF)
}

fn internal(message: &str) -> StorageError {
    StorageError::Other {
        message: message.to_string(),
    }
}

/// A write-only streaming sink producing one stored object.
///
/// Obtained from [`Object::writer`](crate::Object::writer). Options and
/// attributes must be set before the first write. It is critical to observe
/// the return value of [`close`](ObjectWriter::close); only a clean close
/// guarantees the object exists server-side.
pub struct ObjectWriter {
    backend: Arc<dyn Backend>,
    name: String,
    options: WriterOptions,

    content_type: Option<String>,
    info: HashMap<String, String>,

    csize: u64,
    started: bool,
    closed: bool,
    promoted: bool,

    active: Option<Box<dyn ChunkBuffer>>,
    cidx: u32,
    file: Option<Arc<dyn LargeFile>>,
    seen: HashMap<u32, String>,
    tx: Option<UnboundedSender<DispatchedChunk>>,
    slots: Option<Arc<Semaphore>>,
    workers: Vec<JoinHandle<()>>,

    shared: Arc<WriterShared>,
    finished: Option<Arc<dyn FileHandle>>,
    registry: Option<WriterSet>,
    registration: Option<u64>,
}

impl ObjectWriter {
    /// Create a writer for the named object.
    pub fn new(backend: Arc<dyn Backend>, name: impl Into<String>, options: WriterOptions) -> Self {
        let name: String = name.into();
        Self {
            backend,
            shared: Arc::new(WriterShared::new(name.clone(), CancellationToken::new())),
            name,
            options,
            content_type: None,
            info: HashMap::new(),
            csize: DEFAULT_CHUNK_SIZE,
            started: false,
            closed: false,
            promoted: false,
            active: None,
            cidx: 0,
            file: None,
            seen: HashMap::new(),
            tx: None,
            slots: None,
            workers: Vec::new(),
            finished: None,
            registry: None,
            registration: None,
        }
    }

    /// Tie this writer's cancellation signal to a caller-supplied token.
    ///
    /// Cancelling the parent aborts the upload; a fatal upload error does
    /// not cancel the parent. Must be called before the first write.
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        if !self.started {
            self.shared = Arc::new(WriterShared::new(self.name.clone(), parent.child_token()));
        }
        self
    }

    pub(crate) fn with_writer_set(mut self, set: WriterSet) -> Self {
        self.registry = Some(set);
        self
    }

    /// Set the writable attributes of the resulting object.
    ///
    /// Must be called before the first write; ignored afterwards. If fewer
    /// than 10 info entries are set and `last_modified` is present, one
    /// entry is used to persist it as `src_last_modified_millis`.
    pub fn with_attrs(&mut self, attrs: &ObjectAttrs) -> &mut Self {
        if self.started {
            return self;
        }
        self.content_type = attrs.content_type.clone();
        self.info = attrs.info.clone();
        if self.info.len() < MAX_INFO_ENTRIES {
            if let Some(at) = attrs.last_modified {
                if let Ok(since_epoch) = at.duration_since(UNIX_EPOCH) {
                    self.info.insert(
                        LAST_MODIFIED_INFO_KEY.to_string(),
                        since_epoch.as_millis().to_string(),
                    );
                }
            }
        }
        self
    }

    /// The object name this writer uploads to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of per-chunk upload progress.
    pub fn status(&self) -> WriterStatus {
        self.shared.status()
    }

    /// Handle of the stored object, available once [`close`] (or the fast
    /// path of [`read_from_seekable`]) has completed successfully.
    ///
    /// [`close`]: ObjectWriter::close
    /// [`read_from_seekable`]: ObjectWriter::read_from_seekable
    pub fn finished(&self) -> Option<&Arc<dyn FileHandle>> {
        self.finished.as_ref()
    }

    /// Append bytes to the object.
    ///
    /// Buffers into the active chunk; once buffered bytes overflow
    /// `chunk_size` the upload is promoted to the large-file API and full
    /// chunks are handed to the upload workers. Blocks while every worker
    /// is busy, which bounds buffered data and provides backpressure.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, StorageError> {
        if self.closed {
            return Err(self.shared.error().unwrap_or(StorageError::Unsupported {
                message: "write on closed writer".into(),
            }));
        }
        self.init().await?;
        if let Some(err) = self.shared.error() {
            return Err(err);
        }
        let mut remaining: &[u8] = data;
        let mut written: usize = 0;
        while !remaining.is_empty() {
            let space: u64 = match &self.active {
                Some(active) => self.csize.saturating_sub(active.len()),
                None => return Err(internal("writer has no active buffer")),
            };
            if space == 0 {
                // Full buffer and more bytes on the way: the stream has
                // outgrown the single-shot path.
                if let Err(err) = self.send_chunk().await {
                    self.shared.set_err(err.clone());
                    return Err(self.shared.error().unwrap_or(err));
                }
                continue;
            }
            let take: usize = remaining.len().min(usize::try_from(space).unwrap_or(usize::MAX));
            let active = match self.active.as_mut() {
                Some(active) => active,
                None => return Err(internal("writer has no active buffer")),
            };
            match active.write(&remaining[..take]).await {
                Ok(n) => {
                    written += n;
                    remaining = &remaining[n..];
                }
                Err(err) => {
                    self.shared.set_err(err.clone());
                    return Err(err);
                }
            }
        }
        Ok(written)
    }

    /// Copy a non-seekable stream into the writer.
    ///
    /// # Returns
    /// The number of bytes consumed from `source`.
    pub async fn read_from<R>(&mut self, mut source: R) -> Result<u64, StorageError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut copied: u64 = 0;
        let mut buf: Vec<u8> = vec![0u8; 64 * 1024];
        loop {
            let n: usize = source.read(&mut buf).await.map_err(StorageError::from)?;
            if n == 0 {
                break;
            }
            self.write(&buf[..n]).await?;
            copied += n as u64;
        }
        Ok(copied)
    }

    /// Upload from a seekable source of known size.
    ///
    /// Sources smaller than `chunk_size` stream straight through the
    /// single-shot API without buffering; the payload carries its own
    /// checksum as a 40-hex-digit suffix, so no pre-pass over the data is
    /// needed. Larger sources fall back to copying through the buffered
    /// write path.
    ///
    /// # Returns
    /// The number of bytes sent, including the checksum suffix on the fast
    /// path.
    pub async fn read_from_seekable<R>(&mut self, mut source: R) -> Result<u64, StorageError>
    where
        R: AsyncRead + AsyncSeek + Send + Unpin + 'static,
    {
        if self.closed {
            return Err(self.shared.error().unwrap_or(StorageError::Unsupported {
                message: "write on closed writer".into(),
            }));
        }
        self.init().await?;
        if let Some(err) = self.shared.error() {
            return Err(err);
        }
        let size: u64 = source
            .seek(SeekFrom::End(0))
            .await
            .map_err(StorageError::from)?;
        source
            .seek(SeekFrom::Start(0))
            .await
            .map_err(StorageError::from)?;
        if size >= self.csize {
            return self.read_from(source).await;
        }
        // Swap the pass-through buffer in for the single-shot upload.
        if let Some(mut staged) = self.active.take() {
            if let Err(err) = staged.close().await {
                tracing::warn!(object = %self.name, error = %err, "failed to release staging buffer");
            }
        }
        self.active = Some(Box::new(SectionBuffer::new(source, size)));
        match self.single_shot_upload().await {
            Ok(sent) => Ok(sent),
            Err(err) => {
                self.shared.set_err(err.clone());
                Err(self.shared.error().unwrap_or(err))
            }
        }
    }

    /// Finish the upload.
    ///
    /// The terminal operation. Streams that never overflowed are uploaded
    /// in one shot; promoted uploads dispatch any trailing chunk, drain the
    /// workers, and finish the large file. It is critical to check the
    /// return value: only a clean close guarantees the object is stored.
    ///
    /// Idempotent: later calls return the first call's result and do no
    /// further work.
    pub async fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return self.result();
        }
        self.closed = true;
        if !self.started {
            return Ok(());
        }
        if let Err(err) = self.finalize().await {
            self.shared.set_err(err);
        }
        if let Some(mut staged) = self.active.take() {
            if let Err(err) = staged.close().await {
                // Non-fatal, but alarming.
                tracing::warn!(object = %self.name, error = %err, "failed to release staging buffer");
            }
        }
        if let Some(set) = &self.registry {
            if let Some(token) = self.registration.take() {
                set.deregister(token);
            }
        }
        self.result()
    }

    fn result(&self) -> Result<(), StorageError> {
        match self.shared.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// First-write initialization: register with the bucket's writer set,
    /// resolve the chunk size, allocate the first buffer. Runs once; a
    /// failure here poisons the writer.
    async fn init(&mut self) -> Result<(), StorageError> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        if let Some(set) = &self.registry {
            self.registration = Some(set.register(&self.name, self.shared.clone()));
        }
        self.csize = if self.options.chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            self.options.chunk_size
        };
        match self.new_buffer().await {
            Ok(buf) => {
                self.active = Some(buf);
                Ok(())
            }
            Err(err) => {
                self.shared.set_err(err.clone());
                Err(err)
            }
        }
    }

    async fn new_buffer(&self) -> Result<Box<dyn ChunkBuffer>, StorageError> {
        if self.options.use_file_buffer {
            let buf = FileBuffer::create(self.options.file_buffer_dir.as_deref()).await?;
            Ok(Box::new(buf))
        } else {
            Ok(Box::new(MemoryBuffer::new()))
        }
    }

    /// Seal the active buffer and hand it to a worker, blocking until an
    /// upload slot frees up. Promotes to the large-file API on first use.
    async fn send_chunk(&mut self) -> Result<(), StorageError> {
        if !self.promoted {
            self.promote().await?;
            self.promoted = true;
        }
        let slots: Arc<Semaphore> = self
            .slots
            .clone()
            .ok_or_else(|| internal("writer has no upload slots"))?;
        let permit: OwnedSemaphorePermit = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => return Err(StorageError::Cancelled),
            permit = slots.acquire_owned() => {
                permit.map_err(|_| internal("upload slots closed"))?
            }
        };
        let buf: Box<dyn ChunkBuffer> = self
            .active
            .take()
            .ok_or_else(|| internal("writer has no active buffer"))?;
        let id: u32 = self.cidx + 1;
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| internal("chunk channel closed"))?;
        if tx
            .send(DispatchedChunk {
                id,
                buf,
                _permit: permit,
            })
            .is_err()
        {
            // Every worker is gone; the latched error says why.
            return Err(self.shared.error().unwrap_or(StorageError::Cancelled));
        }
        self.cidx += 1;
        self.active = Some(self.new_buffer().await?);
        Ok(())
    }

    /// One-shot promotion to the large-file API: obtain (or resume) the
    /// large file and spawn the workers.
    async fn promote(&mut self) -> Result<(), StorageError> {
        let file: Arc<dyn LargeFile> = self.acquire_large_file().await?;
        self.file = Some(file.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        self.tx = Some(tx);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let concurrency: usize = self.options.concurrency.max(1);
        self.slots = Some(Arc::new(Semaphore::new(concurrency)));
        let seen: Arc<HashMap<u32, String>> = Arc::new(mem::take(&mut self.seen));
        for _ in 0..concurrency {
            let ctx = WorkerContext {
                shared: self.shared.clone(),
                backend: self.backend.clone(),
                file: file.clone(),
                rx: rx.clone(),
                seen: seen.clone(),
            };
            self.workers.push(tokio::spawn(run_worker(ctx)));
        }
        Ok(())
    }

    async fn acquire_large_file(&mut self) -> Result<Arc<dyn LargeFile>, StorageError> {
        if self.options.resume {
            if let Some(file) = self.resume_large_file().await? {
                return Ok(file);
            }
            // Nothing to resume; start fresh.
            self.options.resume = false;
        }
        let content_type: &str = self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
        run_cancellable(
            &self.shared.cancel,
            self.backend
                .start_large_file(&self.name, content_type, &self.info),
        )
        .await
    }

    /// Look for an unfinished large file of the same name and rebuild its
    /// part map so already-uploaded chunks can be skipped.
    async fn resume_large_file(&mut self) -> Result<Option<Arc<dyn LargeFile>>, StorageError> {
        let cancel: CancellationToken = self.shared.cancel.clone();
        let versions = run_cancellable(&cancel, self.backend.list_versions(&self.name, 1)).await?;
        let handle: Arc<dyn FileHandle> = match versions
            .into_iter()
            .find(|version| version.name() == self.name)
        {
            Some(handle) => handle,
            None => return Ok(None),
        };
        let mut seen: HashMap<u32, String> = HashMap::new();
        let mut size: u64 = 0;
        let mut start: u32 = 1;
        loop {
            let (parts, next) = run_cancellable(&cancel, handle.list_parts(start, 100)).await?;
            if parts.is_empty() {
                break;
            }
            for part in parts {
                size += part.size;
                seen.insert(part.number, part.hash);
            }
            match next {
                Some(cursor) => start = cursor,
                None => break,
            }
        }
        let file: Arc<dyn LargeFile> = handle.compile_parts(size, &seen);
        self.seen = seen;
        Ok(Some(file))
    }

    /// Upload the active buffer through the single-shot API.
    ///
    /// # Returns
    /// The number of bytes delivered to the transport.
    async fn single_shot_upload(&mut self) -> Result<u64, StorageError> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| internal("writer has no active buffer"))?;
        let size: u64 = active.len();
        let hash: String = active.hash();
        let reader = active.reader().await?;
        let meter = self.shared.progress.register(1, size);
        let mut body = MeteredReader::new(reader, meter.clone());
        let result = self.upload_file_with_retries(&mut body, size, &hash).await;
        self.shared.progress.complete(1);
        match result {
            Ok(handle) => {
                self.finished = Some(handle);
                Ok(meter.bytes_read())
            }
            Err(err) => Err(err),
        }
    }

    async fn upload_file_with_retries(
        &self,
        body: &mut MeteredReader,
        size: u64,
        hash: &str,
    ) -> Result<Arc<dyn FileHandle>, StorageError> {
        let cancel: &CancellationToken = &self.shared.cancel;
        let content_type: &str = self.content_type.as_deref().unwrap_or(DEFAULT_CONTENT_TYPE);
        let mut endpoint = run_cancellable(cancel, self.backend.upload_url()).await?;
        let mut delay: Duration = RETRY_INITIAL_BACKOFF;
        loop {
            let attempt = run_cancellable(
                cancel,
                endpoint.upload_file(&mut *body, size, &self.name, content_type, hash, &self.info),
            )
            .await;
            match attempt {
                Ok(handle) => return Ok(handle),
                Err(err) if self.backend.should_reupload(&err) => {
                    tracing::debug!(object = %self.name, error = %err, "retrying single-shot upload");
                }
                Err(err) => return Err(err),
            }
            backoff(cancel, delay).await?;
            delay = next_delay(delay);
            endpoint = run_cancellable(cancel, self.backend.upload_url()).await?;
            body.rewind().await?;
        }
    }

    /// Close-time finalization; runs at most once.
    async fn finalize(&mut self) -> Result<(), StorageError> {
        if self.cidx == 0 {
            if self.finished.is_some() {
                // read_from_seekable already streamed the object.
                return Ok(());
            }
            if let Some(err) = self.shared.error() {
                return Err(err);
            }
            return self.single_shot_upload().await.map(|_| ());
        }
        if self.shared.error().is_none() {
            let pending: bool = self
                .active
                .as_ref()
                .map(|buf| buf.len() > 0)
                .unwrap_or(false);
            if pending {
                if let Err(err) = self.send_chunk().await {
                    self.shared.set_err(err);
                }
            }
        }
        // Closing the channel is the no-more-chunks signal; always drain the
        // workers, error or not.
        self.tx = None;
        let workers: Vec<JoinHandle<()>> = self.workers.drain(..).collect();
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::warn!(object = %self.name, error = %err, "upload worker panicked");
            }
        }
        if let Some(err) = self.shared.error() {
            return Err(err);
        }
        let file: Arc<dyn LargeFile> = self
            .file
            .clone()
            .ok_or_else(|| internal("large file handle missing"))?;
        let handle = run_cancellable(&self.shared.cancel, file.finish()).await?;
        self.finished = Some(handle);
        Ok(())
    }
}

/// Upload-worker loop: one endpoint lease, one chunk at a time.
async fn run_worker(ctx: WorkerContext) {
    let worker: u32 = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
    let cancel: CancellationToken = ctx.shared.cancel.clone();
    let mut endpoint = match run_cancellable(&cancel, ctx.file.upload_part_url()).await {
        Ok(endpoint) => endpoint,
        Err(err) => {
            ctx.shared.set_err(err);
            return;
        }
    };
    loop {
        let next: Option<DispatchedChunk> = {
            let mut rx = ctx.rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = rx.recv() => chunk,
            }
        };
        let Some(DispatchedChunk {
            id,
            mut buf,
            _permit,
        }) = next
        else {
            return;
        };

        if let Some(expected) = ctx.seen.get(&id) {
            if *expected != buf.hash() {
                ctx.shared.set_err(StorageError::ResumeMismatch { part: id });
                release_buffer(id, &mut buf).await;
                return;
            }
            tracing::debug!(worker, part = id, "skipping part already stored");
            release_buffer(id, &mut buf).await;
            ctx.shared.progress.complete(id);
            continue;
        }

        tracing::debug!(worker, part = id, "uploading part");
        let size: u64 = buf.len();
        let hash: String = buf.hash();
        let reader = match buf.reader().await {
            Ok(reader) => reader,
            Err(err) => {
                ctx.shared.set_err(err);
                release_buffer(id, &mut buf).await;
                return;
            }
        };
        let meter = ctx.shared.progress.register(id, size);
        let mut body = MeteredReader::new(reader, meter);

        let mut delay: Duration = RETRY_INITIAL_BACKOFF;
        let outcome: Result<(), StorageError> = loop {
            let attempt =
                run_cancellable(&cancel, endpoint.upload_part(&mut body, &hash, size, id)).await;
            match attempt {
                Ok(sent) if sent == size => break Ok(()),
                Ok(sent) => {
                    tracing::debug!(
                        worker,
                        part = id,
                        sent,
                        expected = size,
                        "short part upload; retrying"
                    );
                }
                Err(err) if ctx.backend.should_reupload(&err) => {
                    tracing::debug!(worker, part = id, error = %err, "retryable part upload failure");
                }
                Err(err) => break Err(err),
            }
            if let Err(err) = backoff(&cancel, delay).await {
                break Err(err);
            }
            delay = next_delay(delay);
            match run_cancellable(&cancel, ctx.file.upload_part_url()).await {
                Ok(fresh) => endpoint = fresh,
                Err(err) => break Err(err),
            }
            if let Err(err) = body.rewind().await {
                break Err(err);
            }
        };
        ctx.shared.progress.complete(id);
        release_buffer(id, &mut buf).await;
        match outcome {
            Ok(()) => tracing::trace!(worker, part = id, "part uploaded"),
            Err(err) => {
                ctx.shared.set_err(err);
                return;
            }
        }
    }
}

/// Best-effort chunk release; failures are logged, not propagated.
async fn release_buffer(id: u32, buf: &mut Box<dyn ChunkBuffer>) {
    if let Err(err) = buf.close().await {
        tracing::warn!(part = id, error = %err, "failed to release chunk buffer");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    use async_trait::async_trait;

    use crate::traits::UploadEndpoint;

    /// Backend stub for tests that never reach the network.
    struct UnreachableBackend;

    #[async_trait]
    impl Backend for UnreachableBackend {
        async fn upload_url(&self) -> Result<Box<dyn UploadEndpoint>, StorageError> {
            Err(internal("not wired in this test"))
        }

        async fn start_large_file(
            &self,
            _name: &str,
            _content_type: &str,
            _info: &HashMap<String, String>,
        ) -> Result<Arc<dyn LargeFile>, StorageError> {
            Err(internal("not wired in this test"))
        }

        async fn list_versions(
            &self,
            _start_name: &str,
            _count: usize,
        ) -> Result<Vec<Arc<dyn FileHandle>>, StorageError> {
            Err(internal("not wired in this test"))
        }

        fn should_reupload(&self, _err: &StorageError) -> bool {
            false
        }
    }

    fn test_writer() -> ObjectWriter {
        ObjectWriter::new(
            Arc::new(UnreachableBackend),
            "obj",
            WriterOptions::default(),
        )
    }

    #[test]
    fn test_next_delay_doubles_and_caps() {
        let mut delay: Duration = RETRY_INITIAL_BACKOFF;
        delay = next_delay(delay);
        assert_eq!(delay, Duration::from_millis(30));
        for _ in 0..16 {
            delay = next_delay(delay);
        }
        assert_eq!(delay, RETRY_MAX_BACKOFF);
    }

    #[test]
    fn test_with_attrs_adds_last_modified_key() {
        let mut writer = test_writer();
        let attrs = ObjectAttrs::new()
            .with_content_type("text/plain")
            .with_info("origin", "unit-test")
            .with_last_modified(SystemTime::UNIX_EPOCH + Duration::from_millis(1_234_567));
        writer.with_attrs(&attrs);

        assert_eq!(writer.content_type.as_deref(), Some("text/plain"));
        assert_eq!(
            writer.info.get("origin").map(String::as_str),
            Some("unit-test")
        );
        assert_eq!(
            writer.info.get(LAST_MODIFIED_INFO_KEY).map(String::as_str),
            Some("1234567")
        );
    }

    #[test]
    fn test_with_attrs_full_info_map_gets_no_timestamp() {
        let mut writer = test_writer();
        let mut attrs = ObjectAttrs::new()
            .with_last_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1));
        for i in 0..MAX_INFO_ENTRIES {
            attrs = attrs.with_info(format!("key-{i}"), "value");
        }
        writer.with_attrs(&attrs);

        assert_eq!(writer.info.len(), MAX_INFO_ENTRIES);
        assert!(!writer.info.contains_key(LAST_MODIFIED_INFO_KEY));
    }

    #[tokio::test]
    async fn test_with_attrs_ignored_after_first_write() {
        let mut writer = test_writer();
        writer.write(b"x").await.unwrap();
        writer.with_attrs(&ObjectAttrs::new().with_content_type("text/plain"));
        assert!(writer.content_type.is_none());
    }

    #[tokio::test]
    async fn test_write_after_close_rejected() {
        let mut writer = test_writer();
        writer.close().await.unwrap();
        assert!(writer.write(b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_close_without_writes_is_noop() {
        let mut writer = test_writer();
        assert!(writer.close().await.is_ok());
        assert!(writer.finished().is_none());
        // Idempotent.
        assert!(writer.close().await.is_ok());
    }
}
