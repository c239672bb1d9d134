pub mod status;
mod tasks;

// std
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
// crates
use bytes::Bytes;
use itertools::Itertools as _;
use nomos_utils::fisheryates::FisherYatesShuffle;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument as _};
// internal
use self::status::{ChunkStatus, ChunkStatusTracker};
use self::tasks::{
    decode_blob, BlobContext, DownloadCompleted, DownloadStarted, TaskContext,
    VerificationCompleted, WorkerEvent,
};
use crate::assignment::Assignments;
use crate::common::{BlobCommitments, BlobKey, ChunksReply, EncodingParams, OperatorId, QuorumId};
use crate::error::RetrievalError;
use crate::pool::WorkerPools;
use crate::probe::{NoopProbe, RetrievalProbe};
use crate::settings::{ConfigError, RetrievalSettings};
use crate::transport::ChunkTransport;
use crate::verifier::{BlobDecoder, ChunkVerifier};

const DOWNLOAD_STAGE: &str = "download_and_verify";
const DECODE_STAGE: &str = "decode";

/// Statuses counting towards the download target.
const SCHEDULED: [ChunkStatus; 4] = [
    ChunkStatus::Downloading,
    ChunkStatus::Downloaded,
    ChunkStatus::Verifying,
    ChunkStatus::Verified,
];
/// Statuses counting towards the verification target.
const VERIFYING: [ChunkStatus; 2] = [ChunkStatus::Verifying, ChunkStatus::Verified];

/// Cancels download and verification work once dropped.
struct DownloadCancel(CancellationToken);

impl DownloadCancel {
    fn cancel(&self) {
        self.0.cancel();
    }

    fn token(&self) -> &CancellationToken {
        &self.0
    }
}

impl Drop for DownloadCancel {
    fn drop(&mut self) {
        if !self.0.is_cancelled() {
            self.cancel();
        }
    }
}

/// Everything known about a blob before its chunks are fetched.
#[derive(Clone, Debug)]
pub struct RetrievalRequest {
    pub blob_key: BlobKey,
    pub quorum_id: QuorumId,
    pub commitments: BlobCommitments,
    pub encoding_params: EncodingParams,
    pub assignments: Assignments,
    /// Verified chunks needed to reconstruct the blob.
    pub minimum_chunk_count: u32,
}

/// The collaborators doing the actual network and cryptographic work.
pub struct RetrievalBackends<T, V, D> {
    pub transport: Arc<T>,
    pub verifier: Arc<V>,
    pub decoder: Arc<D>,
}

impl<T, V, D> Clone for RetrievalBackends<T, V, D> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            verifier: Arc::clone(&self.verifier),
            decoder: Arc::clone(&self.decoder),
        }
    }
}

struct DownloadedChunks {
    operator: OperatorId,
    reply: ChunksReply,
}

struct VerifiedChunks<Frame> {
    operator: OperatorId,
    frames: Vec<Frame>,
}

enum Termination {
    Enough,
    NotEnough { verified: u32 },
}

enum Step<Frame> {
    Cancelled,
    Event(Option<WorkerEvent<Frame>>),
    Tick,
}

/// Drives the retrieval of a single blob.
///
/// Downloads are scheduled from the operators until enough chunks are in
/// flight, downloaded replies are verified until enough chunks are verified or
/// verifying, and once [`RetrievalRequest::minimum_chunk_count`] chunks are
/// verified the blob is decoded. All the bookkeeping happens on the task
/// calling [`RetrievalWorker::retrieve`]; download and verification tasks only
/// report back through a channel.
pub struct RetrievalWorker<T, V, D>
where
    V: ChunkVerifier,
{
    settings: RetrievalSettings,
    pools: WorkerPools,
    context: Arc<TaskContext<T, V>>,
    decoder: Arc<D>,
    minimum_chunk_count: u32,
    caller_cancel: CancellationToken,
    download_cancel: DownloadCancel,
    events: mpsc::Receiver<WorkerEvent<V::Frame>>,
    tracker: ChunkStatusTracker,
    download_order: VecDeque<OperatorId>,
    in_flight: VecDeque<DownloadStarted>,
    downloaded: VecDeque<DownloadedChunks>,
    verified: VecDeque<VerifiedChunks<V::Frame>>,
}

impl<T, V, D> RetrievalWorker<T, V, D>
where
    T: ChunkTransport,
    V: ChunkVerifier,
    D: BlobDecoder<Frame = V::Frame>,
{
    /// `cancel` aborts the whole retrieval, decoding included.
    pub fn new(
        settings: &RetrievalSettings,
        pools: &WorkerPools,
        backends: RetrievalBackends<T, V, D>,
        request: RetrievalRequest,
        cancel: &CancellationToken,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        if request.minimum_chunk_count == 0 {
            return Err(ConfigError::ZeroMinimumChunkCount);
        }

        let RetrievalRequest {
            blob_key,
            quorum_id,
            commitments,
            encoding_params,
            assignments,
            minimum_chunk_count,
        } = request;

        let operators: Vec<OperatorId> = assignments.keys().copied().sorted().collect();
        let download_order =
            FisherYatesShuffle::new(*blob_key.as_bytes()).shuffled(operators).into();

        // at most three events per operator, senders never wait
        let (events_tx, events) = mpsc::channel(3 * assignments.len() + 1);
        let download_cancel = DownloadCancel(cancel.child_token());
        let tracker = ChunkStatusTracker::new(&assignments);
        let context = TaskContext {
            transport: backends.transport,
            verifier: backends.verifier,
            blob: BlobContext {
                blob_key,
                quorum_id,
                commitments,
                encoding_params,
                assignments,
            },
            download_timeout: settings.download_timeout,
            detailed_logging: settings.detailed_logging,
            cancel: download_cancel.token().clone(),
            events: events_tx,
        };

        Ok(Self {
            settings: settings.clone(),
            pools: pools.clone(),
            context: Arc::new(context),
            decoder: backends.decoder,
            minimum_chunk_count,
            caller_cancel: cancel.clone(),
            download_cancel,
            events,
            tracker,
            download_order,
            in_flight: VecDeque::new(),
            downloaded: VecDeque::new(),
            verified: VecDeque::new(),
        })
    }

    /// Contact operators in `order` instead of the blob keyed shuffle.
    ///
    /// `order` must list every assigned operator exactly once.
    pub fn with_download_order(mut self, order: Vec<OperatorId>) -> Result<Self, ConfigError> {
        let assigned = &self.context.blob.assignments;
        let unique = order.iter().collect::<HashSet<_>>().len();
        if order.len() != assigned.len()
            || unique != order.len()
            || !order.iter().all(|operator| assigned.contains_key(operator))
        {
            return Err(ConfigError::InvalidDownloadOrder);
        }
        self.download_order = order.into();
        Ok(self)
    }

    #[must_use]
    pub fn blob_key(&self) -> &BlobKey {
        &self.context.blob.blob_key
    }

    /// Operators in the order they will be contacted.
    pub fn download_order(&self) -> impl Iterator<Item = &OperatorId> {
        self.download_order.iter()
    }

    pub async fn retrieve(self) -> Result<Bytes, RetrievalError> {
        self.retrieve_with_probe(&NoopProbe).await
    }

    pub async fn retrieve_with_probe(
        self,
        probe: &dyn RetrievalProbe,
    ) -> Result<Bytes, RetrievalError> {
        let span = tracing::info_span!("da_retrieval", blob_key = %self.blob_key());
        self.run(probe).instrument(span).await
    }

    async fn run(mut self, probe: &dyn RetrievalProbe) -> Result<Bytes, RetrievalError> {
        probe.set_stage(DOWNLOAD_STAGE);
        let mut tick = tokio::time::interval(self.settings.control_loop_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            match self.termination() {
                Some(Termination::Enough) => break,
                Some(Termination::NotEnough { verified }) => {
                    return Err(RetrievalError::NotEnoughChunks {
                        blob_key: *self.blob_key(),
                        verified,
                        minimum: self.minimum_chunk_count,
                    });
                }
                None => {}
            }

            self.schedule_downloads();
            self.schedule_verifications();

            let step = tokio::select! {
                () = self.download_cancel.token().cancelled() => Step::Cancelled,
                event = self.events.recv() => Step::Event(event),
                _ = tick.tick() => Step::Tick,
            };
            match step {
                Step::Cancelled => {
                    return Err(RetrievalError::Cancelled {
                        blob_key: *self.blob_key(),
                        stage: DOWNLOAD_STAGE,
                    });
                }
                Step::Event(Some(event)) => self.handle_event(event),
                // the worker holds a sender itself, unreachable in practice
                Step::Event(None) => {}
                Step::Tick => self.check_pessimistic_timeouts(),
            }
        }

        probe.set_stage(DECODE_STAGE);
        self.decode().await
    }

    fn termination(&self) -> Option<Termination> {
        let verified = self.tracker.count_of(&[ChunkStatus::Verified]);
        if verified >= self.minimum_chunk_count {
            return Some(Termination::Enough);
        }
        let failed = self.tracker.count_of(&[ChunkStatus::Failed]);
        // Total is the summed assignment weight, not the encoding's chunk
        // count. Chunks shared by several operators are counted once per
        // operator here. Widened, the sum may not fit when the minimum is
        // unreachable anyway.
        if u64::from(failed) + u64::from(self.minimum_chunk_count) > u64::from(self.tracker.total())
        {
            return Some(Termination::NotEnough { verified });
        }
        None
    }

    fn schedule_downloads(&mut self) {
        let target = self
            .settings
            .target_download_count(self.minimum_chunk_count);
        while self.tracker.count_of(&SCHEDULED) < target {
            let Some(operator) = self.download_order.pop_front() else {
                break;
            };
            if let Err(e) = self.tracker.transition(&operator, ChunkStatus::Downloading) {
                warn!("Skipping download: {e}");
                continue;
            }
            if let Err(e) = self
                .pools
                .connection
                .submit(self.context.download_task(operator))
            {
                error!(operator = %operator, "Failed to schedule download: {e}");
                self.mark_failed(&operator);
            }
        }
    }

    fn schedule_verifications(&mut self) {
        let target = self
            .settings
            .target_verified_count(self.minimum_chunk_count);
        while self.tracker.count_of(&VERIFYING) < target {
            let Some(DownloadedChunks { operator, reply }) = self.downloaded.pop_front() else {
                break;
            };
            if let Err(e) = self.tracker.transition(&operator, ChunkStatus::Verifying) {
                warn!("Skipping verification: {e}");
                continue;
            }
            if let Err(e) = self
                .pools
                .compute
                .submit_blocking(self.context.verification_task(operator, reply))
            {
                error!(operator = %operator, "Failed to schedule verification: {e}");
                self.mark_failed(&operator);
            }
        }
    }

    fn handle_event(&mut self, event: WorkerEvent<V::Frame>) {
        match event {
            WorkerEvent::DownloadStarted(started) => self.in_flight.push_back(started),
            WorkerEvent::DownloadCompleted(completed) => self.on_download_completed(completed),
            WorkerEvent::VerificationCompleted(completed) => {
                self.on_verification_completed(completed);
            }
        }
    }

    fn on_download_completed(&mut self, DownloadCompleted { operator, result }: DownloadCompleted) {
        match result {
            Ok(reply) => {
                if let Err(e) = self.tracker.transition(&operator, ChunkStatus::Downloaded) {
                    warn!("Ignoring download reply: {e}");
                    return;
                }
                if self.settings.detailed_logging {
                    debug!(operator = %operator, chunks = reply.chunks.len(), "downloaded chunks");
                }
                self.downloaded
                    .push_back(DownloadedChunks { operator, reply });
            }
            Err(e) => {
                warn!(operator = %operator, "Failed to download chunks: {e}");
                self.mark_failed(&operator);
            }
        }
    }

    fn on_verification_completed(
        &mut self,
        VerificationCompleted { operator, result }: VerificationCompleted<V::Frame>,
    ) {
        match result {
            Ok(frames) => {
                if let Err(e) = self.tracker.transition(&operator, ChunkStatus::Verified) {
                    warn!("Ignoring verified chunks: {e}");
                    return;
                }
                if self.settings.detailed_logging {
                    debug!(operator = %operator, frames = frames.len(), "verified chunks");
                }
                self.verified.push_back(VerifiedChunks { operator, frames });
            }
            Err(e) => {
                warn!(operator = %operator, "{e}");
                self.mark_failed(&operator);
            }
        }
    }

    fn mark_failed(&mut self, operator: &OperatorId) {
        if let Err(e) = self.tracker.transition(operator, ChunkStatus::Failed) {
            warn!("Ignoring failure: {e}");
        }
    }

    /// Downloads running longer than the pessimistic timeout stop counting as
    /// in progress, which lets another operator be scheduled in their place.
    /// The download itself carries on and may still complete.
    fn check_pessimistic_timeouts(&mut self) {
        let now = Instant::now();
        while let Some(DownloadStarted { operator, started }) = self.in_flight.front().copied() {
            if self.tracker.status_of(&operator) != Some(ChunkStatus::Downloading) {
                self.in_flight.pop_front();
                continue;
            }
            // entries are assumed to be ordered by start time
            if now.saturating_duration_since(started) <= self.settings.pessimistic_timeout {
                break;
            }
            self.in_flight.pop_front();
            if let Err(e) = self
                .tracker
                .transition(&operator, ChunkStatus::PessimisticTimeout)
            {
                warn!("Ignoring timeout: {e}");
                continue;
            }
            if self.settings.detailed_logging {
                debug!(operator = %operator, "download hit the pessimistic timeout");
            }
        }
    }

    /// Verified frames and the chunk index of each of them.
    fn take_verified_frames(&mut self) -> (Vec<V::Frame>, Vec<u32>) {
        let mut frames = Vec::new();
        let mut indices = Vec::new();
        for VerifiedChunks {
            operator,
            frames: operator_frames,
        } in self.verified.drain(..)
        {
            indices.extend_from_slice(self.context.blob.indices_of(&operator));
            frames.extend(operator_frames);
        }
        (frames, indices)
    }

    async fn decode(mut self) -> Result<Bytes, RetrievalError> {
        self.download_cancel.cancel();
        let blob_key = *self.blob_key();
        let (frames, indices) = self.take_verified_frames();
        info!(blob_key = %blob_key, chunks = indices.len(), "decoding blob");

        let (result_tx, result_rx) = oneshot::channel();
        let decoder = Arc::clone(&self.decoder);
        let context = Arc::clone(&self.context);
        let detailed_logging = self.settings.detailed_logging;
        self.pools.compute.submit_blocking(move || {
            let result = decode_blob(
                decoder.as_ref(),
                &context.blob,
                frames,
                indices,
                detailed_logging,
            );
            let _ = result_tx.send(result);
        })?;

        tokio::select! {
            () = self.caller_cancel.cancelled() => Err(RetrievalError::Cancelled {
                blob_key,
                stage: DECODE_STAGE,
            }),
            result = result_rx => match result {
                Ok(Ok(blob)) => Ok(blob),
                Ok(Err(source)) => Err(RetrievalError::Decode { blob_key, source }),
                Err(_) => Err(RetrievalError::Decode {
                    blob_key,
                    source: "decode task was dropped".into(),
                }),
            },
        }
    }
}
