// crates
use bytes::Bytes;
// internal
use crate::common::{BlobCommitments, BlobKey, ChunksReply, EncodingParams, OperatorId};
use crate::error::DynError;

/// Deserializes raw operator replies and checks them against the blob
/// commitments.
pub trait ChunkVerifier: Send + Sync + 'static {
    type Frame: Send + 'static;

    /// Check that the commitments published for a blob are consistent with
    /// each other, before anything is downloaded.
    fn verify_commitment(&self, commitments: &BlobCommitments) -> Result<(), DynError>;

    /// Turn an operator reply into verified frames, one per index in
    /// `indices`, in the same order.
    fn verify_chunks(
        &self,
        blob_key: &BlobKey,
        operator_id: &OperatorId,
        reply: &ChunksReply,
        indices: &[u32],
        commitments: &BlobCommitments,
        encoding_params: &EncodingParams,
    ) -> Result<Vec<Self::Frame>, DynError>;
}

/// Reconstructs the original blob out of verified frames.
///
/// `indices[i]` is the global chunk position of `frames[i]`. The same index
/// may appear several times when operator assignments overlap; implementors
/// must tolerate it.
pub trait BlobDecoder: Send + Sync + 'static {
    type Frame: Send + 'static;

    fn decode(
        &self,
        blob_key: &BlobKey,
        frames: Vec<Self::Frame>,
        indices: Vec<u32>,
        encoding_params: &EncodingParams,
        total_byte_length: u64,
    ) -> Result<Bytes, DynError>;
}
