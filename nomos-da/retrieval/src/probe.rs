// std
use std::time::Duration;
// crates
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
// internal

/// Receives stage markers while a retrieval progresses.
pub trait RetrievalProbe: Send + Sync {
    fn set_stage(&self, stage: &'static str);
}

#[derive(Copy, Clone, Debug, Default)]
pub struct NoopProbe;

impl RetrievalProbe for NoopProbe {
    fn set_stage(&self, _stage: &'static str) {}
}

/// Records when each stage was entered.
#[derive(Debug, Default)]
pub struct StageTimeline {
    entries: Mutex<Vec<(&'static str, Instant)>>,
}

impl StageTimeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stages(&self) -> Vec<&'static str> {
        self.entries.lock().iter().map(|(stage, _)| *stage).collect()
    }

    /// Time spent in every stage. The last stage runs until now.
    #[must_use]
    pub fn durations(&self) -> Vec<(&'static str, Duration)> {
        let entries = self.entries.lock();
        let now = Instant::now();
        entries
            .iter()
            .enumerate()
            .map(|(i, (stage, started))| {
                let ended = entries.get(i + 1).map_or(now, |(_, next)| *next);
                (*stage, ended.saturating_duration_since(*started))
            })
            .collect()
    }

    pub fn finish(&self) {
        for (stage, elapsed) in self.durations() {
            debug!(stage, ?elapsed, "retrieval stage");
        }
    }
}

impl RetrievalProbe for StageTimeline {
    fn set_stage(&self, stage: &'static str) {
        self.entries.lock().push((stage, Instant::now()));
    }
}
