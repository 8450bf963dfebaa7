//! Shared data structures for upload operations.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use rusty_objects_common::DEFAULT_CHUNK_SIZE;

/// Options for an [`ObjectWriter`](crate::ObjectWriter).
///
/// All options must be set before the first write; changes after that are
/// ignored.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Number of upload workers sending parts concurrently during a
    /// large-file upload. Each worker holds its own endpoint lease and at
    /// most one chunk buffer. Values less than 1 are treated as 1.
    pub concurrency: usize,
    /// Size, in bytes, of each individual part when writing large files, and
    /// the threshold for switching from the single-shot to the large-file
    /// API. Zero means [`DEFAULT_CHUNK_SIZE`]. The service enforces a 5MB
    /// minimum; smaller values are not rejected client-side but will fail.
    pub chunk_size: u64,
    /// Buffer chunks in scratch files instead of memory.
    pub use_file_buffer: bool,
    /// Directory for scratch files. Uses the system temp directory when
    /// `None`.
    pub file_buffer_dir: Option<PathBuf>,
    /// Resume an unfinished large file of the same name, skipping parts the
    /// server already holds with matching checksums.
    pub resume: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            chunk_size: DEFAULT_CHUNK_SIZE,
            use_file_buffer: false,
            file_buffer_dir: None,
            resume: false,
        }
    }
}

impl WriterOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of concurrent part-upload workers.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the part size / large-file threshold in bytes.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Buffer chunks on disk, optionally in the given directory.
    pub fn with_file_buffer(mut self, dir: Option<PathBuf>) -> Self {
        self.use_file_buffer = true;
        self.file_buffer_dir = dir;
        self
    }

    /// Attempt to resume an unfinished large file of the same name.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }
}

/// Writable attributes of the object being uploaded.
///
/// Passed to [`ObjectWriter::with_attrs`](crate::ObjectWriter::with_attrs)
/// before the first write.
#[derive(Debug, Clone, Default)]
pub struct ObjectAttrs {
    /// MIME content type. Defaults to `application/octet-stream` when unset.
    pub content_type: Option<String>,
    /// Caller-provided metadata persisted with the object. The service
    /// accepts at most 10 entries.
    pub info: HashMap<String, String>,
    /// Source last-modified time. When set and fewer than 10 info entries
    /// are used, it is persisted as `src_last_modified_millis`.
    pub last_modified: Option<SystemTime>,
}

impl ObjectAttrs {
    /// Create empty attributes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Add an info entry.
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }

    /// Set the source last-modified time.
    pub fn with_last_modified(mut self, at: SystemTime) -> Self {
        self.last_modified = Some(at);
        self
    }
}

/// Snapshot of a writer's per-chunk upload progress.
///
/// `progress[i]` is the fraction of chunk `i + 1` delivered to the
/// transport, in `[0, 1]`. Chunks that have completed (or whose slot was
/// cleared concurrently with the snapshot) read as `1.0`. This is a
/// best-effort snapshot, not linearizable truth.
#[derive(Debug, Clone, Default)]
pub struct WriterStatus {
    pub progress: Vec<f64>,
}

/// One already-uploaded part of an unfinished large file, as reported by
/// [`FileHandle::list_parts`](crate::FileHandle::list_parts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartInfo {
    /// 1-based part number.
    pub number: u32,
    /// Hex-encoded SHA-1 of the part's contents.
    pub hash: String,
    /// Part size in bytes.
    pub size: u64,
}
