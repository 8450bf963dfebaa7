//! Backend traits consumed by the upload engine.
//!
//! The engine talks to the storage service exclusively through these
//! interfaces. The HTTP transport, authentication tokens, and URL rotation
//! live behind them; tests substitute scripted mocks.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::buffer::ChunkRead;
use crate::error::StorageError;
use crate::types::PartInfo;

/// Root capability set of the storage service.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Obtain an endpoint lease for a single-shot upload.
    async fn upload_url(&self) -> Result<Box<dyn UploadEndpoint>, StorageError>;

    /// Begin a large-file upload under the given name.
    async fn start_large_file(
        &self,
        name: &str,
        content_type: &str,
        info: &HashMap<String, String>,
    ) -> Result<Arc<dyn LargeFile>, StorageError>;

    /// List stored object versions starting at `start_name`, including
    /// unfinished large files. Used to locate an upload to resume.
    async fn list_versions(
        &self,
        start_name: &str,
        count: usize,
    ) -> Result<Vec<Arc<dyn FileHandle>>, StorageError>;

    /// Classify an upload failure as worth retrying with a fresh endpoint.
    ///
    /// This predicate is the engine's sole source of the
    /// retryable/non-retryable distinction.
    fn should_reupload(&self, err: &StorageError) -> bool;
}

/// A leased endpoint for single-shot uploads.
#[async_trait]
pub trait UploadEndpoint: Send + Sync {
    /// Upload a complete object in one request.
    ///
    /// `hash` is the lowercase hex SHA-1 of the payload, or the
    /// `hex_digits_at_end` sentinel when the checksum trails the payload.
    async fn upload_file(
        &self,
        body: &mut dyn ChunkRead,
        size: u64,
        name: &str,
        content_type: &str,
        hash: &str,
        info: &HashMap<String, String>,
    ) -> Result<Arc<dyn FileHandle>, StorageError>;
}

/// An in-progress large file.
#[async_trait]
pub trait LargeFile: Send + Sync {
    /// Obtain an endpoint lease for uploading parts of this file. Each
    /// worker holds its own lease and refreshes it on retry.
    async fn upload_part_url(&self) -> Result<Box<dyn PartEndpoint>, StorageError>;

    /// Finish the large file, assembling its uploaded parts.
    async fn finish(&self) -> Result<Arc<dyn FileHandle>, StorageError>;

    /// Abort the large file, discarding its uploaded parts.
    async fn cancel(&self) -> Result<(), StorageError>;
}

/// A leased endpoint for part uploads on one specific large file.
#[async_trait]
pub trait PartEndpoint: Send + Sync {
    /// Upload one part, returning the number of payload bytes the service
    /// accepted. A count short of `size` means the upload must be redone.
    async fn upload_part(
        &self,
        body: &mut dyn ChunkRead,
        hash: &str,
        size: u64,
        part_number: u32,
    ) -> Result<u64, StorageError>;
}

/// A stored object version, finished or not.
#[async_trait]
pub trait FileHandle: Send + Sync {
    /// The object name this version was stored under.
    fn name(&self) -> &str;

    /// Page through the already-uploaded parts of an unfinished large file.
    ///
    /// # Arguments
    /// * `start_part` - 1-based part number to start listing from
    /// * `count` - Maximum parts per page
    ///
    /// # Returns
    /// The page of parts and the next `start_part` cursor, or `None` when
    /// the listing is exhausted.
    async fn list_parts(
        &self,
        start_part: u32,
        count: usize,
    ) -> Result<(Vec<PartInfo>, Option<u32>), StorageError>;

    /// Reconstruct an in-progress large file from its listed parts, so that
    /// uploading can continue where it left off.
    fn compile_parts(&self, size: u64, parts: &HashMap<u32, String>) -> Arc<dyn LargeFile>;
}
