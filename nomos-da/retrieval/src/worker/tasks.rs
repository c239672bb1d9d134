// std
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
// crates
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
// internal
use crate::assignment::Assignments;
use crate::common::{BlobCommitments, BlobKey, ChunksReply, EncodingParams, OperatorId, QuorumId};
use crate::error::{DownloadError, DynError};
use crate::transport::ChunkTransport;
use crate::verifier::{BlobDecoder, ChunkVerifier};

/// Read-only description of the blob being retrieved.
#[derive(Debug)]
pub(crate) struct BlobContext {
    pub blob_key: BlobKey,
    pub quorum_id: QuorumId,
    pub commitments: BlobCommitments,
    pub encoding_params: EncodingParams,
    pub assignments: Assignments,
}

impl BlobContext {
    pub fn indices_of(&self, operator: &OperatorId) -> &[u32] {
        self.assignments
            .get(operator)
            .map(|assignment| assignment.indices())
            .unwrap_or_default()
    }
}

/// A download began running on the connection pool.
#[derive(Copy, Clone, Debug)]
pub(crate) struct DownloadStarted {
    pub operator: OperatorId,
    pub started: Instant,
}

#[derive(Debug)]
pub(crate) struct DownloadCompleted {
    pub operator: OperatorId,
    pub result: Result<ChunksReply, DownloadError>,
}

#[derive(Debug)]
pub(crate) struct VerificationCompleted<Frame> {
    pub operator: OperatorId,
    pub result: Result<Vec<Frame>, DynError>,
}

#[derive(Debug)]
pub(crate) enum WorkerEvent<Frame> {
    DownloadStarted(DownloadStarted),
    DownloadCompleted(DownloadCompleted),
    VerificationCompleted(VerificationCompleted<Frame>),
}

#[derive(Copy, Clone, Debug)]
enum TaskKind {
    Download,
    Verification,
}

/// Reports a failed completion for its operator when dropped while armed.
///
/// Built together with the task it guards, so a task dropped before running
/// (closed pool) or unwinding out of a panic still settles its operator.
struct CompletionGuard<Frame> {
    operator: OperatorId,
    kind: TaskKind,
    events: mpsc::Sender<WorkerEvent<Frame>>,
    armed: bool,
}

impl<Frame> CompletionGuard<Frame> {
    fn new(
        operator: OperatorId,
        kind: TaskKind,
        events: mpsc::Sender<WorkerEvent<Frame>>,
    ) -> Self {
        Self {
            operator,
            kind,
            events,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<Frame> Drop for CompletionGuard<Frame> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let operator = self.operator;
        let event = match self.kind {
            TaskKind::Download => WorkerEvent::DownloadCompleted(DownloadCompleted {
                operator,
                result: Err(DownloadError::Abandoned),
            }),
            TaskKind::Verification => WorkerEvent::VerificationCompleted(VerificationCompleted {
                operator,
                result: Err(format!(
                    "verification task for operator {operator} ended without a result"
                )
                .into()),
            }),
        };
        // the channel keeps room for every operator's final event
        let _ = self.events.try_send(event);
    }
}

/// Everything a download or verification task needs, shared by all the tasks
/// of one retrieval.
pub(crate) struct TaskContext<T, V: ChunkVerifier> {
    pub transport: Arc<T>,
    pub verifier: Arc<V>,
    pub blob: BlobContext,
    pub download_timeout: Duration,
    pub detailed_logging: bool,
    /// Cancelled once the blob can be decoded or the caller gave up.
    pub cancel: CancellationToken,
    pub events: mpsc::Sender<WorkerEvent<V::Frame>>,
}

impl<T, V> TaskContext<T, V>
where
    T: ChunkTransport,
    V: ChunkVerifier,
{
    /// Download task for the connection pool. Always ends with a
    /// [`DownloadCompleted`] event unless the retrieval is already over.
    pub fn download_task(
        self: &Arc<Self>,
        operator: OperatorId,
    ) -> impl Future<Output = ()> + Send + 'static {
        let guard = CompletionGuard::new(operator, TaskKind::Download, self.events.clone());
        let context = Arc::clone(self);
        async move {
            context.download_chunks(operator).await;
            guard.disarm();
        }
    }

    /// Verification task for the compute pool. Always ends with a
    /// [`VerificationCompleted`] event unless the retrieval is already over.
    pub fn verification_task(
        self: &Arc<Self>,
        operator: OperatorId,
        reply: ChunksReply,
    ) -> impl FnOnce() + Send + 'static {
        let guard = CompletionGuard::new(operator, TaskKind::Verification, self.events.clone());
        let context = Arc::clone(self);
        move || {
            context.verify_chunks(operator, &reply);
            guard.disarm();
        }
    }

    async fn download_chunks(&self, operator: OperatorId) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.detailed_logging {
            debug!(operator = %operator, blob_key = %self.blob.blob_key, "downloading chunks");
        }

        // May be later than the scheduling time when the connection pool is busy.
        let started = DownloadStarted {
            operator,
            started: Instant::now(),
        };
        if self
            .events
            .send(WorkerEvent::DownloadStarted(started))
            .await
            .is_err()
        {
            return;
        }

        let download = tokio::time::timeout(
            self.download_timeout,
            self.transport
                .download_chunks(&self.blob.blob_key, &operator, self.blob.quorum_id),
        );
        let result = tokio::select! {
            () = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            outcome = download => match outcome {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(e)) => Err(DownloadError::Transport(e)),
                Err(_) => Err(DownloadError::Timeout(self.download_timeout)),
            },
        };

        // the control loop may be gone already, nothing left to report to
        let _ = self
            .events
            .send(WorkerEvent::DownloadCompleted(DownloadCompleted {
                operator,
                result,
            }))
            .await;
    }

    fn verify_chunks(&self, operator: OperatorId, reply: &ChunksReply) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self.detailed_logging {
            debug!(operator = %operator, blob_key = %self.blob.blob_key, "verifying chunks");
        }

        let indices = self.blob.indices_of(&operator);
        let result = self
            .verifier
            .verify_chunks(
                &self.blob.blob_key,
                &operator,
                reply,
                indices,
                &self.blob.commitments,
                &self.blob.encoding_params,
            )
            .and_then(|frames| {
                if frames.len() == indices.len() {
                    Ok(frames)
                } else {
                    Err(format!(
                        "verifier returned {} frames for {} assigned chunks",
                        frames.len(),
                        indices.len()
                    )
                    .into())
                }
            })
            .map_err(|e| -> DynError {
                format!("failed to verify chunks from operator {operator}: {e}").into()
            });

        let _ = self
            .events
            .blocking_send(WorkerEvent::VerificationCompleted(VerificationCompleted {
                operator,
                result,
            }));
    }
}

/// Blocking, meant for the compute pool.
pub(crate) fn decode_blob<D: BlobDecoder>(
    decoder: &D,
    blob: &BlobContext,
    frames: Vec<D::Frame>,
    indices: Vec<u32>,
    detailed_logging: bool,
) -> Result<Bytes, DynError> {
    if detailed_logging {
        debug!(
            blob_key = %blob.blob_key,
            frames = frames.len(),
            "decoding frames"
        );
    }
    decoder.decode(
        &blob.blob_key,
        frames,
        indices,
        &blob.encoding_params,
        blob.commitments.byte_length(),
    )
}
