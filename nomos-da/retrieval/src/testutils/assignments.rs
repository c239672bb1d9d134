// STD
use std::collections::HashMap;
// Crates
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
// Internal
use crate::assignment::{AssignmentSource, Assignments};
use crate::common::{
    Assignment, BlobCommitments, BlobKey, BlobParams, BlobVersion, OperatorId, QuorumId,
};
use crate::error::DynError;

pub fn blob_key(seed: u8) -> BlobKey {
    BlobKey::new([seed; 32])
}

/// Distinct, ordered ids for test operators.
pub fn operator_id(index: usize) -> OperatorId {
    let mut bytes = [0u8; 32];
    bytes[24..].copy_from_slice(&(index as u64).to_be_bytes());
    OperatorId::new(bytes)
}

/// Commitments of a blob spread over `num_chunks` unit-length chunks.
pub fn commitments_for(num_chunks: u32) -> BlobCommitments {
    BlobCommitments {
        commitment: Bytes::from_static(b"commitment"),
        length_commitment: Bytes::from_static(b"length commitment"),
        length_proof: Bytes::from_static(b"length proof"),
        length: num_chunks.max(1).next_power_of_two(),
    }
}

/// Chunk `i` goes to operator `i % operators`.
pub fn round_robin_assignments(operators: usize, num_chunks: u32) -> Assignments {
    let mut assignments: Assignments = (0..operators)
        .map(|operator| (operator_id(operator), Assignment::default()))
        .collect();
    for index in 0..num_chunks {
        let operator = operator_id(index as usize % operators);
        if let Some(assignment) = assignments.get_mut(&operator) {
            assignment.indices.push(index);
        }
    }
    assignments
}

/// Every operator holds `chunks_per_operator` consecutive chunks, starting
/// `stride` chunks after the previous operator, wrapping around `num_chunks`.
/// A stride smaller than `chunks_per_operator` makes assignments overlap.
pub fn overlapping_assignments(
    operators: usize,
    chunks_per_operator: u32,
    stride: u32,
    num_chunks: u32,
) -> Assignments {
    (0..operators)
        .map(|operator| {
            let first = operator as u32 * stride;
            let indices = (0..chunks_per_operator)
                .map(|offset| (first + offset) % num_chunks)
                .collect();
            (operator_id(operator), Assignment::new(indices))
        })
        .collect()
}

/// Serves fixed blob parameters and assignments, recording every lookup.
pub struct StaticAssignmentSource {
    params: HashMap<BlobVersion, BlobParams>,
    assignments: Assignments,
    failing: bool,
    queries: Mutex<Vec<(u64, QuorumId, BlobKey)>>,
}

impl StaticAssignmentSource {
    pub fn new(version: BlobVersion, params: BlobParams, assignments: Assignments) -> Self {
        Self {
            params: HashMap::from([(version, params)]),
            assignments,
            failing: false,
            queries: Mutex::new(Vec::new()),
        }
    }

    /// Assignment lookups fail, blob parameters are still served.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// `(reference_block_number, quorum_id, blob_key)` of every assignment lookup.
    pub fn queries(&self) -> Vec<(u64, QuorumId, BlobKey)> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl AssignmentSource for StaticAssignmentSource {
    async fn blob_params(&self, version: BlobVersion) -> Result<Option<BlobParams>, DynError> {
        Ok(self.params.get(&version).copied())
    }

    async fn assignments(
        &self,
        reference_block_number: u64,
        quorum_id: QuorumId,
        _blob_params: &BlobParams,
        blob_key: &BlobKey,
    ) -> Result<Assignments, DynError> {
        self.queries
            .lock()
            .push((reference_block_number, quorum_id, *blob_key));
        if self.failing {
            return Err("operator state unavailable".into());
        }
        Ok(self.assignments.clone())
    }
}
