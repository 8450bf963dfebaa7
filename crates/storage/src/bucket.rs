//! Thin bucket and object handles.
//!
//! Bucket CRUD, listing, reading, and deletion are backend concerns; these
//! types exist so callers can construct writers and observe the progress of
//! every writer a bucket currently has open.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::traits::Backend;
use crate::types::{WriterOptions, WriterStatus};
use crate::writer::{ObjectWriter, WriterShared};

/// A reference to a bucket of the storage service.
#[derive(Clone)]
pub struct Bucket {
    name: String,
    backend: Arc<dyn Backend>,
    writers: WriterSet,
}

impl Bucket {
    /// Create a handle to the named bucket.
    pub fn new(name: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        Self {
            name: name.into(),
            backend,
            writers: WriterSet::default(),
        }
    }

    /// The bucket name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A reference to the named object in this bucket.
    pub fn object(&self, name: impl Into<String>) -> Object {
        Object {
            name: name.into(),
            backend: self.backend.clone(),
            writers: self.writers.clone(),
        }
    }

    /// Progress snapshots of every writer currently open on this bucket,
    /// as `(object name, status)` pairs.
    pub fn writer_statuses(&self) -> Vec<(String, WriterStatus)> {
        self.writers.statuses()
    }
}

/// A reference to an object in a bucket.
#[derive(Clone)]
pub struct Object {
    name: String,
    backend: Arc<dyn Backend>,
    writers: WriterSet,
}

impl Object {
    /// The object name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A new writer for this object. Objects that are overwritten are not
    /// deleted; the service keeps prior versions.
    pub fn writer(&self, options: WriterOptions) -> ObjectWriter {
        ObjectWriter::new(self.backend.clone(), self.name.clone(), options)
            .with_writer_set(self.writers.clone())
    }
}

/// Registry of the writers currently open on a bucket.
///
/// Writers register on their first write and deregister on close; the
/// bucket aggregates their progress snapshots for status reporting.
#[derive(Clone, Default)]
pub(crate) struct WriterSet {
    inner: Arc<WriterSetInner>,
}

#[derive(Default)]
struct WriterSetInner {
    next_token: AtomicU64,
    writers: Mutex<HashMap<u64, (String, Arc<WriterShared>)>>,
}

impl WriterSet {
    pub(crate) fn register(&self, name: &str, shared: Arc<WriterShared>) -> u64 {
        let token: u64 = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner
            .writers
            .lock()
            .unwrap()
            .insert(token, (name.to_string(), shared));
        token
    }

    pub(crate) fn deregister(&self, token: u64) {
        self.inner.writers.lock().unwrap().remove(&token);
    }

    fn statuses(&self) -> Vec<(String, WriterStatus)> {
        let writers = self.inner.writers.lock().unwrap();
        writers
            .values()
            .map(|(name, shared)| (name.clone(), shared.status()))
            .collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.writers.lock().unwrap().len()
    }
}
