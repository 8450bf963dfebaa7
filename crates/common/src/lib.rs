//! Shared types and utilities for rusty-objects.
//!
//! This crate provides common functionality used across all rusty-objects
//! crates:
//! - Streaming SHA-1 hash computation (the service checksums every upload)
//! - Shared constants (chunk sizing, metadata limits, retry bounds)

pub mod constants;
pub mod hash;

// Re-export commonly used items at crate root
pub use constants::*;
pub use hash::{hash_bytes, Sha1Hasher};
