//! Block keys, fetched blocks, and the fetch collaborator contract.
//!
//! The transport that actually talks to peers lives outside this crate and
//! plugs in through [`Fetcher`].

mod error;

pub use error::{Cause, FailureClass, FailureKind, FetchError, FetchFailure};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::bucket::{MemoryRandomAccess, RafBucket};

/// Content-addressing identifier: SHA-256 of the block payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct BlockKey([u8; 32]);

impl BlockKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Key under which `data` is addressed.
    pub fn for_content(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are plenty to tell keys apart in logs.
        write!(f, "BlockKey({}..)", hex::encode(&self.0[..8]))
    }
}

/// Error parsing a hex block key.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KeyParseError {
    #[error("invalid hex in block key: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("block key must be 32 bytes, got {0}")]
    Length(usize),
}

impl FromStr for BlockKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let len = bytes.len();
        let arr: [u8; 32] = bytes.try_into().map_err(|_| KeyParseError::Length(len))?;
        Ok(Self(arr))
    }
}

impl From<BlockKey> for String {
    fn from(key: BlockKey) -> Self {
        key.to_hex()
    }
}

impl TryFrom<String> for BlockKey {
    type Error = KeyParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A fetched block. Cheap to clone; the payload is shared.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    key: BlockKey,
    data: Arc<[u8]>,
}

impl Block {
    /// Build a block from its payload, deriving the key.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        let data = data.into();
        Self {
            key: BlockKey::for_content(&data),
            data,
        }
    }

    /// Build a block claimed to live under `key`. Not verified.
    pub fn with_key(key: BlockKey, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            key,
            data: data.into(),
        }
    }

    pub fn key(&self) -> &BlockKey {
        &self.key
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if the payload hashes to the block's key.
    pub fn verify(&self) -> bool {
        BlockKey::for_content(&self.data) == self.key
    }

    /// Read-only bucket view over the payload.
    pub fn to_bucket(&self) -> RafBucket {
        RafBucket::new(Arc::new(MemoryRandomAccess::new(Arc::clone(&self.data))))
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("key", &self.key)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Per-requester fetch settings handed through to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Only consult the local store, never the network.
    pub local_only: bool,
    /// Skip the local store and always go to the network.
    pub ignore_store: bool,
    /// Cache blocks fetched for local requests.
    pub cache_local_requests: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            local_only: false,
            ignore_store: false,
            cache_local_requests: true,
        }
    }
}

/// The external transport that performs one block fetch.
///
/// Called synchronously from a worker and may block for a network round
/// trip. Panics are caught by the scheduler and reported as internal errors.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, key: &BlockKey, options: &FetchOptions) -> Result<Block, FetchError>;
}

impl<F> Fetcher for F
where
    F: Fn(&BlockKey, &FetchOptions) -> Result<Block, FetchError> + Send + Sync,
{
    fn fetch(&self, key: &BlockKey, options: &FetchOptions) -> Result<Block, FetchError> {
        self(key, options)
    }
}
