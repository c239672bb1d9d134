// std
use std::sync::Arc;
// crates
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;
// internal
use crate::assignment::AssignmentSource;
use crate::common::{BlobCommitments, BlobKey, BlobVersion, QuorumId};
use crate::encoding::encoding_params;
use crate::error::RetrievalError;
use crate::pool::{PoolError, WorkerPools};
use crate::probe::{NoopProbe, RetrievalProbe};
use crate::settings::RetrievalSettings;
use crate::transport::ChunkTransport;
use crate::verifier::{BlobDecoder, ChunkVerifier};
use crate::worker::{RetrievalBackends, RetrievalRequest, RetrievalWorker};

/// Retrieves blobs straight from the operators holding their chunks.
///
/// Every [`RetrievalClient::get_blob`] call runs its own
/// [`RetrievalWorker`], all of them sharing the client's worker pools.
pub struct RetrievalClient<T, V, D, A> {
    settings: RetrievalSettings,
    backends: RetrievalBackends<T, V, D>,
    assignments: Arc<A>,
    pools: WorkerPools,
}

impl<T, V, D, A> RetrievalClient<T, V, D, A>
where
    T: ChunkTransport,
    V: ChunkVerifier,
    D: BlobDecoder<Frame = V::Frame>,
    A: AssignmentSource,
{
    pub fn new(
        settings: RetrievalSettings,
        transport: Arc<T>,
        verifier: Arc<V>,
        decoder: Arc<D>,
        assignments: Arc<A>,
    ) -> Result<Self, RetrievalError> {
        settings.validate()?;
        let pools = WorkerPools::new(&settings);
        Ok(Self {
            settings,
            backends: RetrievalBackends {
                transport,
                verifier,
                decoder,
            },
            assignments,
            pools,
        })
    }

    #[must_use]
    pub const fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    pub async fn get_blob(
        &self,
        cancel: &CancellationToken,
        blob_key: BlobKey,
        blob_version: BlobVersion,
        commitments: BlobCommitments,
        reference_block_number: u64,
        quorum_id: QuorumId,
    ) -> Result<Bytes, RetrievalError> {
        self.get_blob_with_probe(
            cancel,
            blob_key,
            blob_version,
            commitments,
            reference_block_number,
            quorum_id,
            &NoopProbe,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn get_blob_with_probe(
        &self,
        cancel: &CancellationToken,
        blob_key: BlobKey,
        blob_version: BlobVersion,
        commitments: BlobCommitments,
        reference_block_number: u64,
        quorum_id: QuorumId,
        probe: &dyn RetrievalProbe,
    ) -> Result<Bytes, RetrievalError> {
        if self.pools.connection.is_closed() {
            return Err(PoolError::Closed(self.pools.connection.name()).into());
        }

        probe.set_stage("verify_commitment");
        self.backends
            .verifier
            .verify_commitment(&commitments)
            .map_err(|source| RetrievalError::Commitment { blob_key, source })?;

        probe.set_stage("get_blob_params");
        let blob_params = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            params = self.assignments.blob_params(blob_version) => Some(params),
        }
        .ok_or(RetrievalError::Cancelled {
            blob_key,
            stage: "get_blob_params",
        })?
        .map_err(|source| RetrievalError::Assignment { blob_key, source })?
        .ok_or(RetrievalError::UnknownBlobVersion(blob_version))?;

        probe.set_stage("get_encoding_params");
        let encoding_params = encoding_params(commitments.length, &blob_params)?;

        probe.set_stage("get_assignments");
        let assignments = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            assignments = self.assignments.assignments(
                reference_block_number,
                quorum_id,
                &blob_params,
                &blob_key,
            ) => Some(assignments),
        }
        .ok_or(RetrievalError::Cancelled {
            blob_key,
            stage: "get_assignments",
        })?
        .map_err(|source| RetrievalError::Assignment { blob_key, source })?;
        if assignments.is_empty() {
            return Err(RetrievalError::NoOperators(quorum_id));
        }

        let minimum_chunk_count = blob_params.minimum_chunk_count();
        debug!(
            blob_key = %blob_key,
            operators = assignments.len(),
            minimum_chunk_count,
            "retrieving blob from operators"
        );
        let request = RetrievalRequest {
            blob_key,
            quorum_id,
            commitments,
            encoding_params,
            assignments,
            minimum_chunk_count,
        };
        let worker = RetrievalWorker::new(
            &self.settings,
            &self.pools,
            self.backends.clone(),
            request,
            cancel,
        )?;
        worker.retrieve_with_probe(probe).await
    }

    /// Stop accepting work. Queued downloads and verifications of running
    /// retrievals count as failed, so those retrievals end with the chunks they
    /// already verified.
    pub fn close(&self) {
        self.pools.close();
    }
}
