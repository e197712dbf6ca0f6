use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

use crate::error::{EcgError, Result};

// ---------------------------------------------------------------------------
// Selector – a single position or a half-open range
// ---------------------------------------------------------------------------

/// What to cut out of a sequence.
///
/// A single position still produces a length-1 view so that every slice has
/// the same shape as its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    Index(usize),
    Range {
        start: Option<usize>,
        end: Option<usize>,
    },
}

impl Selector {
    /// Resolve against a sequence of length `len`.
    ///
    /// Ranges are clamped the way Python slices are; a single index past the
    /// end is an error.
    pub fn resolve(&self, len: usize) -> Result<Range<usize>> {
        match *self {
            Selector::Index(index) => {
                if index >= len {
                    return Err(EcgError::OutOfBounds { index, len });
                }
                Ok(index..index + 1)
            }
            Selector::Range { start, end } => {
                let end = end.unwrap_or(len).min(len);
                let start = start.unwrap_or(0).min(end);
                Ok(start..end)
            }
        }
    }

    pub fn is_index(&self) -> bool {
        matches!(self, Selector::Index(_))
    }
}

impl From<usize> for Selector {
    fn from(index: usize) -> Self {
        Selector::Index(index)
    }
}

impl From<Range<usize>> for Selector {
    fn from(r: Range<usize>) -> Self {
        Selector::Range {
            start: Some(r.start),
            end: Some(r.end),
        }
    }
}

impl From<RangeFrom<usize>> for Selector {
    fn from(r: RangeFrom<usize>) -> Self {
        Selector::Range {
            start: Some(r.start),
            end: None,
        }
    }
}

impl From<RangeTo<usize>> for Selector {
    fn from(r: RangeTo<usize>) -> Self {
        Selector::Range {
            start: None,
            end: Some(r.end),
        }
    }
}

impl From<RangeFull> for Selector {
    fn from(_: RangeFull) -> Self {
        Selector::Range {
            start: None,
            end: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sliceable – shared by Sequence, Time and Signal
// ---------------------------------------------------------------------------

/// An ordered container that can hand out independent sub-range views.
pub trait Sliceable: Sized {
    fn len(&self) -> usize;

    /// Build the view for an already-resolved, in-bounds range.
    fn slice_range(&self, range: Range<usize>) -> Self;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slice(&self, selector: impl Into<Selector>) -> Result<Self> {
        let range = selector.into().resolve(self.len())?;
        Ok(self.slice_range(range))
    }

    /// Length-1 view at `index`.
    fn at(&self, index: usize) -> Result<Self> {
        self.slice(Selector::Index(index))
    }
}

// ---------------------------------------------------------------------------
// Sequence<T> – owned, copy-on-slice storage
// ---------------------------------------------------------------------------

/// An ordered list of values. Slicing copies, so a view never aliases its
/// parent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequence<T> {
    values: Vec<T>,
}

impl<T: Clone> Sequence<T> {
    pub fn new(values: Vec<T>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.values.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.values.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    pub fn into_vec(self) -> Vec<T> {
        self.values
    }
}

impl<T: Clone> Sliceable for Sequence<T> {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn slice_range(&self, range: Range<usize>) -> Self {
        Self {
            values: self.values[range].to_vec(),
        }
    }
}

impl<T: Clone> From<Vec<T>> for Sequence<T> {
    fn from(values: Vec<T>) -> Self {
        Self::new(values)
    }
}

impl<T: PartialEq> PartialEq<[T]> for Sequence<T> {
    fn eq(&self, other: &[T]) -> bool {
        self.values == other
    }
}

impl<T: PartialEq> PartialEq<Vec<T>> for Sequence<T> {
    fn eq(&self, other: &Vec<T>) -> bool {
        &self.values == other
    }
}

impl<'a, T> IntoIterator for &'a Sequence<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_clamps_ranges() {
        assert_eq!(Selector::from(1..4).resolve(6).unwrap(), 1..4);
        assert_eq!(Selector::from(3..).resolve(6).unwrap(), 3..6);
        assert_eq!(Selector::from(..10).resolve(6).unwrap(), 0..6);
        assert_eq!(Selector::from(5..2).resolve(6).unwrap(), 2..2);
        assert_eq!(Selector::from(..).resolve(0).unwrap(), 0..0);
    }

    #[test]
    fn test_index_past_end_fails() {
        let err = Selector::from(6).resolve(6).unwrap_err();
        assert!(matches!(err, EcgError::OutOfBounds { index: 6, len: 6 }));
    }

    #[test]
    fn test_single_index_is_length_one_view() {
        let seq = Sequence::new(vec![1, 2, 3, 4]);
        let one = seq.at(0).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one, vec![1]);
    }

    #[test]
    fn test_slice_leaves_parent_untouched() {
        let seq = Sequence::new(vec![0.0, 1.0, 2.0, 3.0]);
        let part = seq.slice(1..3).unwrap();
        assert_eq!(part, vec![1.0, 2.0]);
        assert_eq!(seq.len(), 4);
        assert_eq!(seq, vec![0.0, 1.0, 2.0, 3.0]);
    }
}
