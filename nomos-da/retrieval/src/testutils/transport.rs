// STD
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
// Crates
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
// Internal
use crate::assignment::Assignments;
use crate::common::{BlobKey, ChunksReply, OperatorId, QuorumId};
use crate::error::DynError;
use crate::testutils::codec::chunk_payload;

/// How a scripted operator answers a download.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Behavior {
    /// Serve the assigned chunks right away.
    Respond,
    /// Return a transport error.
    Fail,
    /// Never answer; the download only ends when it is dropped.
    Hang,
    /// Serve the assigned chunks after the given delay.
    Delay(Duration),
    /// Serve chunks that fail verification.
    Corrupt,
    /// Panic inside the transport.
    Panic,
}

/// In-memory operators with per-operator scripted behavior.
pub struct ScriptedTransport {
    indices: HashMap<OperatorId, Vec<u32>>,
    behaviors: Mutex<HashMap<OperatorId, Behavior>>,
    default_behavior: Behavior,
    calls: Mutex<Vec<OperatorId>>,
    running: AtomicUsize,
    peak: AtomicUsize,
    dropped: AtomicUsize,
}

impl ScriptedTransport {
    /// Every operator of `assignments` answers honestly until scripted
    /// otherwise.
    pub fn new(assignments: &Assignments) -> Self {
        Self {
            indices: assignments
                .iter()
                .map(|(operator, assignment)| (*operator, assignment.indices().to_vec()))
                .collect(),
            behaviors: Mutex::new(HashMap::new()),
            default_behavior: Behavior::Respond,
            calls: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Behavior of operators without a scripted one.
    pub fn with_default(mut self, behavior: Behavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    pub fn with_behavior(self, operator: OperatorId, behavior: Behavior) -> Self {
        self.set_behavior(operator, behavior);
        self
    }

    pub fn set_behavior(&self, operator: OperatorId, behavior: Behavior) {
        self.behaviors.lock().insert(operator, behavior);
    }

    /// Operators contacted so far, in call order.
    pub fn calls(&self) -> Vec<OperatorId> {
        self.calls.lock().clone()
    }

    /// Most downloads observed running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Downloads dropped before they answered.
    pub fn dropped_downloads(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    fn behavior_of(&self, operator: &OperatorId) -> Behavior {
        self.behaviors
            .lock()
            .get(operator)
            .copied()
            .unwrap_or(self.default_behavior)
    }

    fn reply_for(&self, operator: &OperatorId, corrupt: bool) -> ChunksReply {
        let chunks = self
            .indices
            .get(operator)
            .map(|indices| {
                indices
                    .iter()
                    .map(|index| {
                        if corrupt {
                            Bytes::from(format!("garbage-{index}"))
                        } else {
                            chunk_payload(*index)
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        ChunksReply::new(chunks)
    }
}

/// Tracks a running download, counting it as dropped unless it answered.
struct RunningDownload<'a> {
    transport: &'a ScriptedTransport,
    answered: bool,
}

impl<'a> RunningDownload<'a> {
    fn start(transport: &'a ScriptedTransport) -> Self {
        let running = transport.running.fetch_add(1, Ordering::SeqCst) + 1;
        transport.peak.fetch_max(running, Ordering::SeqCst);
        Self {
            transport,
            answered: false,
        }
    }
}

impl Drop for RunningDownload<'_> {
    fn drop(&mut self) {
        self.transport.running.fetch_sub(1, Ordering::SeqCst);
        if !self.answered {
            self.transport.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl crate::transport::ChunkTransport for ScriptedTransport {
    async fn download_chunks(
        &self,
        _blob_key: &BlobKey,
        operator_id: &OperatorId,
        _quorum_id: QuorumId,
    ) -> Result<ChunksReply, DynError> {
        self.calls.lock().push(*operator_id);
        let mut download = RunningDownload::start(self);
        let result: Result<ChunksReply, DynError> = match self.behavior_of(operator_id) {
            Behavior::Respond => Ok(self.reply_for(operator_id, false)),
            Behavior::Fail => Err(format!("operator {operator_id} refused the connection").into()),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Err("unreachable".into())
            }
            Behavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.reply_for(operator_id, false))
            }
            Behavior::Corrupt => Ok(self.reply_for(operator_id, true)),
            Behavior::Panic => panic!("transport crashed talking to operator {operator_id}"),
        };
        download.answered = true;
        result
    }
}
