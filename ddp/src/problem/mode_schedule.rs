use crate::error::{DdpError, DdpResult};
use crate::Scalar;

/// Switching times of a hybrid system and the mode active between them.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSchedule {
    event_times: Vec<Scalar>,
    mode_sequence: Vec<usize>,
}

impl Default for ModeSchedule {
    fn default() -> Self {
        Self {
            event_times: Vec::new(),
            mode_sequence: vec![0],
        }
    }
}

impl ModeSchedule {
    /// `mode_sequence` needs one entry more than `event_times`, which must be
    /// strictly increasing.
    pub fn new(event_times: Vec<Scalar>, mode_sequence: Vec<usize>) -> DdpResult<Self> {
        if mode_sequence.len() != event_times.len() + 1 {
            return Err(DdpError::DimensionMismatch {
                what: "mode sequence",
                expected: event_times.len() + 1,
                actual: mode_sequence.len(),
            });
        }
        if event_times.windows(2).any(|w| w[1] <= w[0]) {
            return Err(DdpError::InvalidPartitioning(
                "event times must be strictly increasing".into(),
            ));
        }
        Ok(Self {
            event_times,
            mode_sequence,
        })
    }

    pub fn event_times(&self) -> &[Scalar] {
        &self.event_times
    }

    pub fn mode_sequence(&self) -> &[usize] {
        &self.mode_sequence
    }

    /// Mode active at `time`. An event time belongs to the mode before it.
    pub fn mode_at_time(&self, time: Scalar) -> usize {
        let index = self.event_times.partition_point(|&e| e < time);
        self.mode_sequence[index]
    }

    /// Event times strictly inside `(start, end)`.
    pub fn events_in(&self, start: Scalar, end: Scalar) -> Vec<Scalar> {
        self.event_times
            .iter()
            .copied()
            .filter(|&e| e > start && e < end)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_lookup() {
        let schedule = ModeSchedule::new(vec![1.0, 2.0], vec![0, 1, 2]).unwrap();
        assert_eq!(schedule.mode_at_time(0.5), 0);
        assert_eq!(schedule.mode_at_time(1.0), 0);
        assert_eq!(schedule.mode_at_time(1.5), 1);
        assert_eq!(schedule.mode_at_time(3.0), 2);
        assert_eq!(schedule.events_in(0.0, 1.5), vec![1.0]);
        assert_eq!(ModeSchedule::default().mode_at_time(10.0), 0);
    }

    #[test]
    fn test_invalid_schedules() {
        assert!(ModeSchedule::new(vec![1.0], vec![0]).is_err());
        assert!(ModeSchedule::new(vec![2.0, 1.0], vec![0, 1, 2]).is_err());
    }
}
