// crates
use async_trait::async_trait;
// internal
use crate::common::{BlobKey, ChunksReply, OperatorId, QuorumId};
use crate::error::DynError;

/// Network access to the operators holding chunks.
///
/// One call is issued per operator and retrieval, without retries. Dropping
/// the returned future must abort the underlying request.
#[async_trait]
pub trait ChunkTransport: Send + Sync + 'static {
    async fn download_chunks(
        &self,
        blob_key: &BlobKey,
        operator_id: &OperatorId,
        quorum_id: QuorumId,
    ) -> Result<ChunksReply, DynError>;
}
