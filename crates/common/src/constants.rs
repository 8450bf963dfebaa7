//! Shared constants used across rusty-objects crates.

use std::time::Duration;

/// Default chunk size (100MB). Files larger than this are uploaded through
/// the large-file API, split into parts of this size.
pub const DEFAULT_CHUNK_SIZE: u64 = 100_000_000;

/// Minimum part size accepted by the service (5MB). Smaller values are not
/// rejected client-side, but the service will fail the upload.
pub const MIN_CHUNK_SIZE: u64 = 5_000_000;

/// Maximum part size accepted by the service (5GB).
pub const MAX_CHUNK_SIZE: u64 = 5_000_000_000;

/// Maximum number of entries in an object's info map.
pub const MAX_INFO_ENTRIES: usize = 10;

/// Distinguished info key carrying the source file's last-modified time as
/// decimal milliseconds since the Unix epoch.
pub const LAST_MODIFIED_INFO_KEY: &str = "src_last_modified_millis";

/// Checksum sentinel telling the service that the final 40 bytes of the
/// payload are the hex-encoded SHA-1 of everything before them.
pub const HEX_DIGITS_AT_END: &str = "hex_digits_at_end";

/// Length of a hex-encoded SHA-1 digest.
pub const HASH_HEX_LEN: usize = 40;

/// Initial delay before retrying a failed part or file upload.
pub const RETRY_INITIAL_BACKOFF: Duration = Duration::from_millis(15);

/// Ceiling for the doubling retry delay.
pub const RETRY_MAX_BACKOFF: Duration = Duration::from_secs(15);

/// Content type used when the caller does not set one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
