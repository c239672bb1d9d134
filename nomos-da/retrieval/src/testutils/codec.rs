// STD
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
// Crates
use bytes::Bytes;
use parking_lot::Mutex;
// Internal
use crate::common::{BlobCommitments, BlobKey, ChunksReply, EncodingParams, OperatorId};
use crate::error::DynError;
use crate::verifier::{BlobDecoder, ChunkVerifier};

/// Content an honest operator serves for chunk `index`.
pub fn chunk_payload(index: u32) -> Bytes {
    Bytes::from(format!("chunk-{index}"))
}

/// What [`MockCodec`] reconstructs for a blob of `total_byte_length` bytes.
pub fn expected_blob(blob_key: &BlobKey, total_byte_length: u64) -> Bytes {
    blob_key
        .as_bytes()
        .iter()
        .copied()
        .cycle()
        .take(total_byte_length as usize)
        .collect::<Vec<u8>>()
        .into()
}

/// A verified chunk: its payload and the index it was checked against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockFrame {
    pub index: u32,
    pub payload: Bytes,
}

/// Verifier and decoder over [`chunk_payload`] contents.
///
/// A reply verifies when it carries exactly the payloads of the assigned
/// indices. Decoding needs `minimum_chunk_count` distinct, consistent
/// indices.
pub struct MockCodec {
    minimum_chunk_count: u32,
    reject_commitment: bool,
    fail_decode: bool,
    panic_on: BTreeSet<u32>,
    verifications: AtomicUsize,
    decoded_indices: Mutex<Option<Vec<u32>>>,
}

impl MockCodec {
    pub fn new(minimum_chunk_count: u32) -> Self {
        Self {
            minimum_chunk_count,
            reject_commitment: false,
            fail_decode: false,
            panic_on: BTreeSet::new(),
            verifications: AtomicUsize::new(0),
            decoded_indices: Mutex::new(None),
        }
    }

    pub fn rejecting_commitment(mut self) -> Self {
        self.reject_commitment = true;
        self
    }

    pub fn failing_decode(mut self) -> Self {
        self.fail_decode = true;
        self
    }

    /// Panic while verifying any reply that carries one of `indices`.
    pub fn panicking_on(mut self, indices: impl IntoIterator<Item = u32>) -> Self {
        self.panic_on.extend(indices);
        self
    }

    /// Number of `verify_chunks` calls so far.
    pub fn verifications(&self) -> usize {
        self.verifications.load(Ordering::SeqCst)
    }

    /// Indices handed to the last decode call.
    pub fn decoded_indices(&self) -> Option<Vec<u32>> {
        self.decoded_indices.lock().clone()
    }
}

impl ChunkVerifier for MockCodec {
    type Frame = MockFrame;

    fn verify_commitment(&self, commitments: &BlobCommitments) -> Result<(), DynError> {
        if self.reject_commitment || commitments.commitment.is_empty() {
            return Err("length proof does not match the commitment".into());
        }
        Ok(())
    }

    fn verify_chunks(
        &self,
        _blob_key: &BlobKey,
        _operator_id: &OperatorId,
        reply: &ChunksReply,
        indices: &[u32],
        _commitments: &BlobCommitments,
        _encoding_params: &EncodingParams,
    ) -> Result<Vec<Self::Frame>, DynError> {
        self.verifications.fetch_add(1, Ordering::SeqCst);
        if let Some(index) = indices.iter().find(|index| self.panic_on.contains(index)) {
            panic!("verifier crashed on chunk {index}");
        }
        if reply.chunks.len() != indices.len() {
            return Err(format!(
                "expected {} chunks, got {}",
                indices.len(),
                reply.chunks.len()
            )
            .into());
        }
        reply
            .chunks
            .iter()
            .zip(indices)
            .map(|(chunk, index)| {
                if *chunk == chunk_payload(*index) {
                    Ok(MockFrame {
                        index: *index,
                        payload: chunk.clone(),
                    })
                } else {
                    Err(format!("invalid proof for chunk {index}").into())
                }
            })
            .collect()
    }
}

impl BlobDecoder for MockCodec {
    type Frame = MockFrame;

    fn decode(
        &self,
        blob_key: &BlobKey,
        frames: Vec<Self::Frame>,
        indices: Vec<u32>,
        _encoding_params: &EncodingParams,
        total_byte_length: u64,
    ) -> Result<Bytes, DynError> {
        *self.decoded_indices.lock() = Some(indices.clone());
        if self.fail_decode {
            return Err("reconstructed polynomial does not match the commitment".into());
        }
        if frames.len() != indices.len() {
            return Err("frames and indices differ in length".into());
        }
        if frames
            .iter()
            .zip(&indices)
            .any(|(frame, index)| frame.index != *index)
        {
            return Err("frame placed at the wrong index".into());
        }
        let distinct: BTreeSet<u32> = indices.into_iter().collect();
        if distinct.len() < self.minimum_chunk_count as usize {
            return Err(format!(
                "{} distinct chunks, {} needed",
                distinct.len(),
                self.minimum_chunk_count
            )
            .into());
        }
        Ok(expected_blob(blob_key, total_byte_length))
    }
}
