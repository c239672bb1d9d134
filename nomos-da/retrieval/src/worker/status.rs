// std
use std::collections::HashMap;
// crates
use thiserror::Error;
// internal
use crate::assignment::Assignments;
use crate::common::OperatorId;

/// Lifecycle of the chunks assigned to one operator.
///
/// ```text
/// available -> downloading -> downloaded -> verifying -> verified
///                  |    |         ^             |
///                  |    v         |             v
///                  |  pessimistic timeout ---> failed
///                  +--------------------------^
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChunkStatus {
    /// Not requested yet.
    Available,
    Downloading,
    /// Downloaded, waiting to be verified.
    Downloaded,
    Verifying,
    Verified,
    /// Download or verification failed.
    Failed,
    /// Download outlived the soft timeout but may still succeed.
    PessimisticTimeout,
}

impl ChunkStatus {
    pub const ALL: [Self; 7] = [
        Self::Available,
        Self::Downloading,
        Self::Downloaded,
        Self::Verifying,
        Self::Verified,
        Self::Failed,
        Self::PessimisticTimeout,
    ];

    const fn slot(self) -> usize {
        match self {
            Self::Available => 0,
            Self::Downloading => 1,
            Self::Downloaded => 2,
            Self::Verifying => 3,
            Self::Verified => 4,
            Self::Failed => 5,
            Self::PessimisticTimeout => 6,
        }
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Available, Self::Downloading)
                | (
                    Self::Downloading,
                    Self::Downloaded | Self::Failed | Self::PessimisticTimeout
                )
                | (Self::PessimisticTimeout, Self::Downloaded | Self::Failed)
                | (Self::Downloaded, Self::Verifying)
                | (Self::Verifying, Self::Verified | Self::Failed)
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Failed)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("operator {0} is not part of the assignment")]
    UnknownOperator(OperatorId),
    #[error("operator {operator} cannot move from {from:?} to {to:?}")]
    Illegal {
        operator: OperatorId,
        from: ChunkStatus,
        to: ChunkStatus,
    },
}

/// Status of every operator plus chunk counts per status.
///
/// Counts are weighted by the number of chunks each operator holds, so the
/// buckets always add up to [`ChunkStatusTracker::total`].
#[derive(Debug, Clone)]
pub struct ChunkStatusTracker {
    weights: HashMap<OperatorId, u32>,
    statuses: HashMap<OperatorId, ChunkStatus>,
    counts: [u32; ChunkStatus::ALL.len()],
    total: u32,
}

impl ChunkStatusTracker {
    /// Every assigned operator starts as [`ChunkStatus::Available`].
    #[must_use]
    pub fn new(assignments: &Assignments) -> Self {
        let weights: HashMap<OperatorId, u32> = assignments
            .iter()
            .map(|(operator, assignment)| (*operator, assignment.num_chunks()))
            .collect();
        let total = weights
            .values()
            .fold(0u32, |total, weight| total.saturating_add(*weight));
        let statuses = weights
            .keys()
            .map(|operator| (*operator, ChunkStatus::Available))
            .collect();
        let mut counts = [0; ChunkStatus::ALL.len()];
        counts[ChunkStatus::Available.slot()] = total;
        Self {
            weights,
            statuses,
            counts,
            total,
        }
    }

    #[must_use]
    pub fn status_of(&self, operator: &OperatorId) -> Option<ChunkStatus> {
        self.statuses.get(operator).copied()
    }

    #[must_use]
    pub fn weight_of(&self, operator: &OperatorId) -> u32 {
        self.weights.get(operator).copied().unwrap_or_default()
    }

    /// Move the whole weight of `operator` to `status`, whatever its current
    /// status is. Returns the previous status.
    pub fn set_status(
        &mut self,
        operator: &OperatorId,
        status: ChunkStatus,
    ) -> Result<ChunkStatus, TransitionError> {
        let weight = self.weight_of(operator);
        let current = self
            .statuses
            .get_mut(operator)
            .ok_or(TransitionError::UnknownOperator(*operator))?;
        let previous = std::mem::replace(current, status);
        self.counts[previous.slot()] -= weight;
        self.counts[status.slot()] += weight;
        Ok(previous)
    }

    /// Like [`Self::set_status`], refusing moves the lifecycle does not allow.
    pub fn transition(
        &mut self,
        operator: &OperatorId,
        status: ChunkStatus,
    ) -> Result<ChunkStatus, TransitionError> {
        let from = self
            .status_of(operator)
            .ok_or(TransitionError::UnknownOperator(*operator))?;
        if !from.can_transition_to(status) {
            return Err(TransitionError::Illegal {
                operator: *operator,
                from,
                to: status,
            });
        }
        self.set_status(operator, status)
    }

    /// Chunks currently in any of `statuses`.
    #[must_use]
    pub fn count_of(&self, statuses: &[ChunkStatus]) -> u32 {
        statuses
            .iter()
            .map(|status| self.counts[status.slot()])
            .sum()
    }

    /// Total weight of all tracked operators.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.total
    }

    /// Largest number of chunks held by a single operator.
    #[must_use]
    pub fn max_weight(&self) -> u32 {
        self.weights.values().copied().max().unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::{ChunkStatus, ChunkStatusTracker, TransitionError};
    use crate::assignment::Assignments;
    use crate::common::{Assignment, OperatorId};

    fn operator(i: u8) -> OperatorId {
        OperatorId::new([i; 32])
    }

    fn tracker() -> ChunkStatusTracker {
        let assignments: Assignments = [
            (operator(1), Assignment::new(vec![0, 1, 2])),
            (operator(2), Assignment::new(vec![3])),
            (operator(3), Assignment::new(vec![2, 4])),
        ]
        .into_iter()
        .collect();
        ChunkStatusTracker::new(&assignments)
    }

    fn bucket_sum(tracker: &ChunkStatusTracker) -> u32 {
        tracker.count_of(&ChunkStatus::ALL)
    }

    #[test]
    fn starts_available() {
        let tracker = tracker();
        assert_eq!(tracker.total(), 6);
        assert_eq!(tracker.count_of(&[ChunkStatus::Available]), 6);
        assert_eq!(tracker.max_weight(), 3);
        assert_eq!(tracker.status_of(&operator(2)), Some(ChunkStatus::Available));
        assert_eq!(tracker.status_of(&operator(9)), None);
    }

    #[test]
    fn moves_whole_operator_weight() {
        let mut tracker = tracker();
        tracker
            .transition(&operator(1), ChunkStatus::Downloading)
            .unwrap();
        assert_eq!(tracker.count_of(&[ChunkStatus::Downloading]), 3);
        assert_eq!(tracker.count_of(&[ChunkStatus::Available]), 3);

        tracker
            .transition(&operator(3), ChunkStatus::Downloading)
            .unwrap();
        tracker
            .transition(&operator(3), ChunkStatus::Downloaded)
            .unwrap();
        assert_eq!(
            tracker.count_of(&[ChunkStatus::Downloading, ChunkStatus::Downloaded]),
            5
        );
        assert_eq!(bucket_sum(&tracker), tracker.total());
    }

    #[test]
    fn late_completion_overrides_soft_timeout() {
        let mut tracker = tracker();
        tracker
            .transition(&operator(1), ChunkStatus::Downloading)
            .unwrap();
        tracker
            .transition(&operator(1), ChunkStatus::PessimisticTimeout)
            .unwrap();
        assert_eq!(tracker.count_of(&[ChunkStatus::Downloading]), 0);
        assert_eq!(tracker.count_of(&[ChunkStatus::PessimisticTimeout]), 3);

        let previous = tracker
            .transition(&operator(1), ChunkStatus::Downloaded)
            .unwrap();
        assert_eq!(previous, ChunkStatus::PessimisticTimeout);
        assert_eq!(tracker.count_of(&[ChunkStatus::PessimisticTimeout]), 0);
        assert_eq!(tracker.count_of(&[ChunkStatus::Downloaded]), 3);
        assert_eq!(bucket_sum(&tracker), tracker.total());
    }

    #[test]
    fn refuses_illegal_moves() {
        let mut tracker = tracker();
        assert_eq!(
            tracker.transition(&operator(2), ChunkStatus::Verified),
            Err(TransitionError::Illegal {
                operator: operator(2),
                from: ChunkStatus::Available,
                to: ChunkStatus::Verified,
            })
        );
        tracker
            .transition(&operator(2), ChunkStatus::Downloading)
            .unwrap();
        tracker.transition(&operator(2), ChunkStatus::Failed).unwrap();
        // a duplicate completion must not be counted twice
        assert!(tracker
            .transition(&operator(2), ChunkStatus::Failed)
            .is_err());
        assert_eq!(tracker.count_of(&[ChunkStatus::Failed]), 1);
        assert_eq!(
            tracker.transition(&operator(7), ChunkStatus::Downloading),
            Err(TransitionError::UnknownOperator(operator(7)))
        );
        assert_eq!(bucket_sum(&tracker), tracker.total());
    }

    #[test]
    fn lifecycle_table() {
        use ChunkStatus::*;
        for from in ChunkStatus::ALL {
            if from.is_terminal() {
                assert!(ChunkStatus::ALL.iter().all(|to| !from.can_transition_to(*to)));
            }
        }
        assert!(Downloading.can_transition_to(PessimisticTimeout));
        assert!(!PessimisticTimeout.can_transition_to(Downloading));
        assert!(!Downloaded.can_transition_to(Verified));
        assert!(!Available.can_transition_to(Failed));
    }
}
