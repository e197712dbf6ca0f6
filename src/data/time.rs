use std::ops::Range;

use crate::error::{EcgError, Result};

use super::sequence::{Sequence, Sliceable};

/// Monotonic time axis of a record, in seconds.
///
/// A uniformly sampled axis is kept analytic (`offset + i` over `fs`) so
/// slicing a long recording never allocates its timestamps.
#[derive(Debug, Clone, PartialEq)]
pub enum Time {
    Uniform { fs: f64, offset: usize, len: usize },
    Explicit(Sequence<f64>),
}

impl Time {
    /// `n` timestamps `i / fs` for `i` in `0..n`.
    pub fn from_rate_and_count(fs: f64, samples: usize) -> Result<Self> {
        if !fs.is_finite() || fs <= 0.0 {
            return Err(EcgError::TypeMismatch(format!(
                "sampling rate must be a positive number, got {fs}"
            )));
        }
        Ok(Time::Uniform {
            fs,
            offset: 0,
            len: samples,
        })
    }

    /// Explicit timestamps; they must be strictly increasing.
    pub fn from_timestamps(values: Vec<f64>) -> Result<Self> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EcgError::TypeMismatch(
                "timestamps must be finite numbers".into(),
            ));
        }
        if values.windows(2).any(|w| w[1] <= w[0]) {
            return Err(EcgError::NonMonotonicTime);
        }
        Ok(Time::Explicit(Sequence::new(values)))
    }

    /// Sampling rate, when the axis is uniform.
    pub fn fs(&self) -> Option<f64> {
        match self {
            Time::Uniform { fs, .. } => Some(*fs),
            Time::Explicit(_) => None,
        }
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        match self {
            Time::Uniform { fs, offset, len } => {
                (index < *len).then(|| (offset + index) as f64 * (1.0 / fs))
            }
            Time::Explicit(seq) => seq.get(index).copied(),
        }
    }

    /// Materialized timestamps.
    pub fn values(&self) -> Vec<f64> {
        match self {
            Time::Uniform { len, .. } => (0..*len).filter_map(|i| self.get(i)).collect(),
            Time::Explicit(seq) => seq.as_slice().to_vec(),
        }
    }

    /// Largest timestamp, i.e. the last one.
    pub fn max(&self) -> Option<f64> {
        self.len().checked_sub(1).and_then(|last| self.get(last))
    }
}

impl Sliceable for Time {
    fn len(&self) -> usize {
        match self {
            Time::Uniform { len, .. } => *len,
            Time::Explicit(seq) => seq.len(),
        }
    }

    fn slice_range(&self, range: Range<usize>) -> Self {
        match self {
            Time::Uniform { fs, offset, .. } => Time::Uniform {
                fs: *fs,
                offset: offset + range.start,
                len: range.len(),
            },
            Time::Explicit(seq) => Time::Explicit(seq.slice_range(range)),
        }
    }
}

impl PartialEq<[f64]> for Time {
    fn eq(&self, other: &[f64]) -> bool {
        self.values() == other
    }
}

impl PartialEq<Vec<f64>> for Time {
    fn eq(&self, other: &Vec<f64>) -> bool {
        self.values() == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_and_count_length_and_values() {
        for (fs, n) in [(360.0, 10), (250.0, 20), (360.0, 30)] {
            let time = Time::from_rate_and_count(fs, n).unwrap();
            assert_eq!(time.len(), n);
            let expected: Vec<f64> = (0..n).map(|i| i as f64 * (1.0 / fs)).collect();
            assert_eq!(time.values(), expected);
        }
    }

    #[test]
    fn test_non_monotonic_timestamps_fail() {
        for stamps in [vec![2.0, 1.0, 3.0, 3.0], vec![5.0, 2.0, 3.0, 4.0]] {
            let err = Time::from_timestamps(stamps).unwrap_err();
            assert!(matches!(err, EcgError::NonMonotonicTime));
        }
    }

    #[test]
    fn test_bad_sampling_rate() {
        assert!(Time::from_rate_and_count(0.0, 10).is_err());
        assert!(Time::from_rate_and_count(f64::NAN, 10).is_err());
    }

    #[test]
    fn test_slicing_uniform_keeps_absolute_times() {
        let time = Time::from_rate_and_count(4.0, 8).unwrap();
        let part = time.slice(2..5).unwrap();
        assert_eq!(part.len(), 3);
        assert_eq!(part, vec![0.5, 0.75, 1.0]);
        assert_eq!(part.slice(1..2).unwrap(), vec![0.75]);
        assert_eq!(time.len(), 8);
    }

    #[test]
    fn test_single_element_slice() {
        let time = Time::from_timestamps(vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(time.at(0).unwrap(), vec![1.0]);
        assert_eq!(time.slice(0..1).unwrap(), vec![1.0]);
    }

    #[test]
    fn test_max_is_last_timestamp() {
        let time = Time::from_rate_and_count(250.0, 20).unwrap();
        assert_eq!(time.max(), Some(19.0 * (1.0 / 250.0)));
        let empty = Time::from_rate_and_count(250.0, 0).unwrap();
        assert_eq!(empty.max(), None);
    }
}
