use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::pipeline::SamplePipeline;

/// Whether a progress percentage can be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressState {
    /// Nothing is running, either not started yet or already ended.
    NoTransformation,
    /// The source duration has not been reported yet.
    WaitingForAvailability,
    /// The source duration is unknown so no percentage will ever be reported.
    Unavailable,
    Available,
}

/// Snapshot returned by [`Transformer::progress`](crate::Transformer::progress).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    NoTransformation,
    WaitingForAvailability,
    Unavailable,
    /// Percentage in `0..=99`.
    Available(u8),
}

impl Progress {
    pub fn state(&self) -> ProgressState {
        match self {
            Progress::NoTransformation => ProgressState::NoTransformation,
            Progress::WaitingForAvailability => ProgressState::WaitingForAvailability,
            Progress::Unavailable => ProgressState::Unavailable,
            Progress::Available(_) => ProgressState::Available,
        }
    }

    pub fn percent(&self) -> Option<u8> {
        match self {
            Progress::Available(percent) => Some(*percent),
            _ => None,
        }
    }
}

/// State published by the control task for lock-free progress queries.
#[derive(Clone)]
pub(crate) struct ProgressSnapshot {
    pub state: ProgressState,
    pub duration_ms: Option<u64>,
    pub pipelines: Vec<Arc<dyn SamplePipeline>>,
    pub high_water: Arc<AtomicU8>,
}

impl ProgressSnapshot {
    pub fn new(high_water: Arc<AtomicU8>) -> Self {
        Self {
            state: ProgressState::NoTransformation,
            duration_ms: None,
            pipelines: Vec::new(),
            high_water,
        }
    }

    pub fn progress(&self) -> Progress {
        match self.state {
            ProgressState::NoTransformation => Progress::NoTransformation,
            ProgressState::WaitingForAvailability => Progress::WaitingForAvailability,
            ProgressState::Unavailable => Progress::Unavailable,
            ProgressState::Available => {
                let duration_ms = match self.duration_ms {
                    Some(duration_ms) if duration_ms > 0 => duration_ms,
                    _ => return Progress::Unavailable,
                };
                let percent = compute_percent(&self.pipelines, duration_ms);
                let previous = self.high_water.fetch_max(percent, Ordering::AcqRel);
                Progress::Available(previous.max(percent))
            }
        }
    }
}

/// Mean position of the pipelines as a share of `duration_ms`, capped at 99
/// so that 100 is only implied by completion.
pub(crate) fn compute_percent(pipelines: &[Arc<dyn SamplePipeline>], duration_ms: u64) -> u8 {
    if pipelines.is_empty() {
        return 0;
    }
    let sum: i128 = pipelines
        .iter()
        .map(|p| i128::from(p.current_position_ms().max(0)))
        .sum();
    let mean = sum / pipelines.len() as i128;
    let percent = mean * 100 / i128::from(duration_ms);
    percent.clamp(0, 99) as u8
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicI64;

    use super::*;
    use crate::pipeline::{PipelineKind, Sample};

    struct FixedPosition(AtomicI64);

    impl SamplePipeline for FixedPosition {
        fn kind(&self) -> PipelineKind {
            PipelineKind::Passthrough
        }
        fn queue_input(&self, _sample: Sample) -> anyhow::Result<()> {
            Ok(())
        }
        fn end_of_input(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn current_position_ms(&self) -> i64 {
            self.0.load(Ordering::Acquire)
        }
        fn is_ended(&self) -> bool {
            false
        }
        fn release(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn at(position_ms: i64) -> Arc<FixedPosition> {
        Arc::new(FixedPosition(AtomicI64::new(position_ms)))
    }

    fn available(pipelines: Vec<Arc<dyn SamplePipeline>>, duration_ms: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            state: ProgressState::Available,
            duration_ms: Some(duration_ms),
            pipelines,
            high_water: Arc::new(AtomicU8::new(0)),
        }
    }

    #[test]
    fn percent_is_mean_of_pipelines() {
        let pipelines: Vec<Arc<dyn SamplePipeline>> = vec![at(2_000), at(4_000)];
        assert_eq!(compute_percent(&pipelines, 10_000), 30);
        assert_eq!(compute_percent(&[], 10_000), 0);
    }

    #[test]
    fn percent_never_reaches_100() {
        let pipelines: Vec<Arc<dyn SamplePipeline>> = vec![at(10_000)];
        assert_eq!(compute_percent(&pipelines, 10_000), 99);
        let pipelines: Vec<Arc<dyn SamplePipeline>> = vec![at(50_000)];
        assert_eq!(compute_percent(&pipelines, 10_000), 99);
    }

    #[test]
    fn negative_positions_count_as_zero() {
        let pipelines: Vec<Arc<dyn SamplePipeline>> = vec![at(-5_000), at(2_000)];
        assert_eq!(compute_percent(&pipelines, 10_000), 10);
    }

    #[test]
    fn available_progress_does_not_go_backwards() {
        let first = at(5_000);
        let pipelines: Vec<Arc<dyn SamplePipeline>> = vec![first.clone()];
        let mut snapshot = available(pipelines, 10_000);
        assert_eq!(snapshot.progress(), Progress::Available(50));

        // a late track starting at zero halves the mean
        snapshot.pipelines.push(at(0));
        assert_eq!(snapshot.progress(), Progress::Available(50));

        first.0.store(9_000, Ordering::Release);
        snapshot.pipelines[1] = at(5_000);
        assert_eq!(snapshot.progress(), Progress::Available(70));
    }

    #[test]
    fn states_without_percentage() {
        let mut snapshot = ProgressSnapshot::new(Arc::new(AtomicU8::new(0)));
        assert_eq!(snapshot.progress(), Progress::NoTransformation);
        snapshot.state = ProgressState::WaitingForAvailability;
        assert_eq!(snapshot.progress(), Progress::WaitingForAvailability);
        assert_eq!(snapshot.progress().percent(), None);
        snapshot.state = ProgressState::Unavailable;
        assert_eq!(snapshot.progress().state(), ProgressState::Unavailable);
    }
}
