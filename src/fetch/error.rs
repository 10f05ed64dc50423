//! Fetch failure taxonomy.
//!
//! A failure is always delivered to requesters as a value, never thrown
//! across the dispatch boundary.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared, thread-safe error cause.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

/// Why a low-level fetch did not produce a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DecodeFailed,
    DataNotFound,
    InternalError,
    RejectedOverload,
    RouteNotFound,
    RouteReallyNotFound,
    TransferFailed,
    VerifyFailed,
    Cancelled,
    RecentlyFailed,
}

/// Retry policy bucket for a [`FailureKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The requester withdrew interest. Terminal.
    Cancelled,
    /// Network or lookup trouble. The key cools down and may be retried.
    Transient,
    /// The data itself is bad. Terminal.
    Permanent,
    /// A collaborator misbehaved. Terminal for this attempt.
    Internal,
}

impl FailureKind {
    /// Stable numeric code, matching the node's wire-level failure codes.
    pub fn code(self) -> u8 {
        match self {
            Self::DecodeFailed => 1,
            Self::DataNotFound => 3,
            Self::InternalError => 4,
            Self::RejectedOverload => 5,
            Self::RouteNotFound => 6,
            Self::RouteReallyNotFound => 7,
            Self::TransferFailed => 8,
            Self::VerifyFailed => 9,
            Self::Cancelled => 10,
            Self::RecentlyFailed => 11,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::DecodeFailed,
            3 => Self::DataNotFound,
            4 => Self::InternalError,
            5 => Self::RejectedOverload,
            6 => Self::RouteNotFound,
            7 => Self::RouteReallyNotFound,
            8 => Self::TransferFailed,
            9 => Self::VerifyFailed,
            10 => Self::Cancelled,
            11 => Self::RecentlyFailed,
            _ => return None,
        })
    }

    pub fn class(self) -> FailureClass {
        match self {
            Self::Cancelled => FailureClass::Cancelled,
            Self::InternalError => FailureClass::Internal,
            Self::DecodeFailed | Self::VerifyFailed => FailureClass::Permanent,
            Self::DataNotFound
            | Self::RejectedOverload
            | Self::RouteNotFound
            | Self::RouteReallyNotFound
            | Self::TransferFailed
            | Self::RecentlyFailed => FailureClass::Transient,
        }
    }

    /// True if the key should enter cooldown after this failure.
    pub fn is_transient(self) -> bool {
        self.class() == FailureClass::Transient
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::DecodeFailed => "decode failed",
            Self::DataNotFound => "data not found",
            Self::InternalError => "internal error",
            Self::RejectedOverload => "rejected due to overload",
            Self::RouteNotFound => "route not found",
            Self::RouteReallyNotFound => "route really not found",
            Self::TransferFailed => "transfer failed",
            Self::VerifyFailed => "verify failed",
            Self::Cancelled => "cancelled",
            Self::RecentlyFailed => "recently failed",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A failure outcome as delivered to a requester.
#[derive(Debug, Clone, Error)]
#[error("{kind}{}", .detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct FetchFailure {
    pub kind: FailureKind,
    pub detail: Option<String>,
    #[source]
    pub cause: Option<Cause>,
}

impl FetchFailure {
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            detail: None,
            cause: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled)
    }

    /// Wrap an unexpected collaborator error as an internal error.
    pub fn internal<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let detail = err.to_string();
        Self::new(FailureKind::InternalError)
            .with_detail(detail)
            .with_cause(Arc::new(err))
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_cause(mut self, cause: Cause) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn class(&self) -> FailureClass {
        self.kind.class()
    }
}

impl From<FailureKind> for FetchFailure {
    fn from(kind: FailureKind) -> Self {
        Self::new(kind)
    }
}

/// What a fetch collaborator may return instead of a block.
#[derive(Debug, Error)]
pub enum FetchError {
    /// A failure the collaborator understands and classified.
    #[error(transparent)]
    Failed(#[from] FetchFailure),

    /// Anything else. Normalized to [`FailureKind::InternalError`].
    #[error("unexpected fetch error: {0}")]
    Unexpected(Box<dyn StdError + Send + Sync + 'static>),
}

impl FetchError {
    pub fn unexpected(msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        Self::Unexpected(msg.into())
    }

    /// Normalize into the failure that requesters will observe.
    pub fn into_failure(self) -> FetchFailure {
        match self {
            Self::Failed(failure) => failure,
            Self::Unexpected(err) => {
                let detail = err.to_string();
                FetchFailure::new(FailureKind::InternalError)
                    .with_detail(detail)
                    .with_cause(Arc::from(err))
            }
        }
    }
}

impl From<FailureKind> for FetchError {
    fn from(kind: FailureKind) -> Self {
        Self::Failed(FetchFailure::new(kind))
    }
}
