//! Read-only buckets over random-access storage.
//!
//! Fetched block payloads are handed onward as buckets. A [`RafBucket`] is a
//! read-only view over any [`RandomAccess`] store: an in-memory buffer or a
//! memory-mapped file. Writing is refused; freeing releases the store.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BucketError {
    #[error("bucket is read-only")]
    ReadOnly,

    #[error("bucket storage has been freed")]
    Freed,

    #[error("read at offset {offset} past end of {size}-byte store")]
    OutOfRange { offset: u64, size: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Positional read access to a fixed-size store.
pub trait RandomAccess: Send + Sync {
    fn size(&self) -> u64;

    /// Read into `buf` starting at `offset`. Returns bytes read; 0 at the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, BucketError>;

    /// Release the backing storage. Later reads fail with [`BucketError::Freed`].
    fn free(&self);
}

fn copy_range(data: &[u8], offset: u64, buf: &mut [u8]) -> Result<usize, BucketError> {
    let size = data.len() as u64;
    if offset > size {
        return Err(BucketError::OutOfRange { offset, size });
    }
    let start = offset as usize;
    let n = buf.len().min(data.len() - start);
    buf[..n].copy_from_slice(&data[start..start + n]);
    Ok(n)
}

/// Store backed by a shared in-memory buffer.
pub struct MemoryRandomAccess {
    data: RwLock<Option<Arc<[u8]>>>,
    size: u64,
}

impl MemoryRandomAccess {
    pub fn new(data: Arc<[u8]>) -> Self {
        let size = data.len() as u64;
        Self {
            data: RwLock::new(Some(data)),
            size,
        }
    }
}

impl RandomAccess for MemoryRandomAccess {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, BucketError> {
        let guard = self.data.read();
        let data = guard.as_ref().ok_or(BucketError::Freed)?;
        copy_range(data, offset, buf)
    }

    fn free(&self) {
        self.data.write().take();
    }
}

/// Store backed by a read-only memory-mapped file.
pub struct MmapRandomAccess {
    mmap: RwLock<Option<Mmap>>,
    size: u64,
}

impl MmapRandomAccess {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BucketError> {
        let file = File::open(path.as_ref())?;
        // SAFETY: the file is opened read-only and bucket files are never
        // modified while mapped.
        let mmap = unsafe { Mmap::map(&file)? };
        let size = mmap.len() as u64;
        Ok(Self {
            mmap: RwLock::new(Some(mmap)),
            size,
        })
    }
}

impl RandomAccess for MmapRandomAccess {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, BucketError> {
        let guard = self.mmap.read();
        let mmap = guard.as_ref().ok_or(BucketError::Freed)?;
        copy_range(mmap, offset, buf)
    }

    fn free(&self) {
        self.mmap.write().take();
    }
}

/// A sized blob of data with stream access.
pub trait Bucket: Send + Sync {
    fn name(&self) -> Option<&str>;
    fn size(&self) -> u64;
    fn is_read_only(&self) -> bool;
    fn set_read_only(&self);
    fn reader(&self) -> Result<Box<dyn Read + Send>, BucketError>;
    fn writer(&self) -> Result<Box<dyn io::Write + Send>, BucketError>;
    fn free(&self);
}

/// Read-only bucket over a [`RandomAccess`] store.
pub struct RafBucket {
    underlying: Arc<dyn RandomAccess>,
    size: u64,
    freed: AtomicBool,
}

impl RafBucket {
    pub fn new(underlying: Arc<dyn RandomAccess>) -> Self {
        let size = underlying.size();
        Self {
            underlying,
            size,
            freed: AtomicBool::new(false),
        }
    }

    /// Map `path` and wrap it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, BucketError> {
        Ok(Self::new(Arc::new(MmapRandomAccess::open(path)?)))
    }

    /// Read the whole bucket into memory.
    pub fn read_all(&self) -> Result<Vec<u8>, BucketError> {
        let mut out = Vec::with_capacity(self.size as usize);
        self.reader()?.read_to_end(&mut out)?;
        Ok(out)
    }
}

impl Bucket for RafBucket {
    fn name(&self) -> Option<&str> {
        None
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn is_read_only(&self) -> bool {
        true
    }

    fn set_read_only(&self) {}

    fn reader(&self) -> Result<Box<dyn Read + Send>, BucketError> {
        if self.freed.load(Ordering::Acquire) {
            return Err(BucketError::Freed);
        }
        Ok(Box::new(RafReader {
            underlying: Arc::clone(&self.underlying),
            pos: 0,
            end: self.size,
        }))
    }

    fn writer(&self) -> Result<Box<dyn io::Write + Send>, BucketError> {
        Err(BucketError::ReadOnly)
    }

    fn free(&self) {
        if !self.freed.swap(true, Ordering::AcqRel) {
            self.underlying.free();
        }
    }
}

/// Sequential reader over a [`RandomAccess`] range.
struct RafReader {
    underlying: Arc<dyn RandomAccess>,
    pos: u64,
    end: u64,
}

impl Read for RafReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.end || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min((self.end - self.pos) as usize);
        let n = self
            .underlying
            .read_at(self.pos, &mut buf[..want])
            .map_err(|e| match e {
                BucketError::Io(io) => io,
                other => io::Error::new(io::ErrorKind::Other, other),
            })?;
        self.pos += n as u64;
        Ok(n)
    }
}
