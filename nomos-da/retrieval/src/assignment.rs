// std
use std::collections::HashMap;
// crates
use async_trait::async_trait;
// internal
use crate::common::{Assignment, BlobKey, BlobParams, BlobVersion, OperatorId, QuorumId};
use crate::error::DynError;

pub type Assignments = HashMap<OperatorId, Assignment>;

/// Chain view needed to plan a retrieval.
#[async_trait]
pub trait AssignmentSource: Send + Sync + 'static {
    /// Parameters registered for `version`, `None` if the version is unknown.
    async fn blob_params(&self, version: BlobVersion) -> Result<Option<BlobParams>, DynError>;

    /// Which chunks of `blob_key` each operator of `quorum_id` holds, as of
    /// `reference_block_number`.
    async fn assignments(
        &self,
        reference_block_number: u64,
        quorum_id: QuorumId,
        blob_params: &BlobParams,
        blob_key: &BlobKey,
    ) -> Result<Assignments, DynError>;
}
