// std
use std::time::Duration;
// crates
use thiserror::Error;
// internal
use crate::common::{BlobKey, BlobVersion, QuorumId};
use crate::encoding::EncodingError;
use crate::pool::PoolError;
use crate::settings::ConfigError;

pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure of a single operator download. Never fatal on its own.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("transport error: {0}")]
    Transport(DynError),
    #[error("download did not complete within {0:?}")]
    Timeout(Duration),
    #[error("download cancelled")]
    Cancelled,
    #[error("download task ended without a reply")]
    Abandoned,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("commitment verification failed for blob {blob_key}: {source}")]
    Commitment { blob_key: BlobKey, source: DynError },
    #[error("unknown blob version {0}")]
    UnknownBlobVersion(BlobVersion),
    #[error("failed to resolve assignments for blob {blob_key}: {source}")]
    Assignment { blob_key: BlobKey, source: DynError },
    #[error("no operators assigned to quorum {0}")]
    NoOperators(QuorumId),
    #[error("not enough chunks verified for blob {blob_key}: {verified} < {minimum}")]
    NotEnoughChunks {
        blob_key: BlobKey,
        verified: u32,
        minimum: u32,
    },
    #[error("retrieval of blob {blob_key} cancelled during {stage}")]
    Cancelled {
        blob_key: BlobKey,
        stage: &'static str,
    },
    #[error("failed to decode blob {blob_key}: {source}")]
    Decode { blob_key: BlobKey, source: DynError },
}
