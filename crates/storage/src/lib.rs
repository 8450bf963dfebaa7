//! Upload engine for the rusty-objects client.
//!
//! This crate provides the write path of an object-storage client: a
//! streaming sink that buffers, fingerprints, chunks, parallelizes, retries,
//! and finalizes, surfacing a completed object handle on close. The service
//! exposes two ingest paths and the writer switches between them at the last
//! possible moment:
//!
//! - **Single-shot** - streams that fit in one chunk are uploaded with a
//!   single request when the writer is closed.
//! - **Large file** - once buffered bytes overflow `chunk_size`, the upload
//!   is promoted: N workers upload parts in parallel, each with its own
//!   endpoint lease, per-part retry with bounded backoff, and endpoint
//!   refresh. Close drains the workers and finishes the file.
//!
//! Resumption reconciles the parts an unfinished large file already holds
//! with the stream being replayed, skipping parts whose checksums match and
//! failing fast on any mismatch.
//!
//! The storage service itself (transport, auth, endpoint rotation) sits
//! behind the traits in [`Backend`] and friends; tests drive the engine
//! against scripted mocks.
//!
//! # Example
//!
//! ```ignore
//! use rusty_objects_storage::{Bucket, WriterOptions};
//!
//! let bucket = Bucket::new("media", backend);
//! let mut writer = bucket.object("render.exr").writer(
//!     WriterOptions::new().with_concurrency(4),
//! );
//! writer.write(&payload).await?;
//! writer.close().await?;
//! ```

mod bucket;
mod buffer;
mod error;
mod progress;
mod traits;
mod types;
mod writer;

pub use bucket::{Bucket, Object};
pub use buffer::ChunkRead;
pub use error::StorageError;
pub use traits::{Backend, FileHandle, LargeFile, PartEndpoint, UploadEndpoint};
pub use types::{ObjectAttrs, PartInfo, WriterOptions, WriterStatus};
pub use writer::ObjectWriter;
