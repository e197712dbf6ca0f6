use std::collections::BTreeSet;
use std::fmt;
use std::ops::Add;

use serde_json::Value as JsonValue;

use crate::error::{EcgError, Result};

/// Label of an ordinary beat in the WFDB symbol table.
pub const NORMAL_BEAT: &str = "N";

// ---------------------------------------------------------------------------
// AnnotationSample – one labelled event
// ---------------------------------------------------------------------------

/// A label attached to a sample index.
///
/// Equality is structural; ordering is by index first so sorting a list of
/// samples puts them in time order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnotationSample {
    pub index: i64,
    pub label: String,
}

impl AnnotationSample {
    pub fn new(index: i64, label: impl Into<String>) -> Self {
        Self {
            index,
            label: label.into(),
        }
    }

    /// Beat with the default label.
    pub fn normal(index: i64) -> Self {
        Self::new(index, NORMAL_BEAT)
    }

    /// Build from a floating point index, which must hold an integer value.
    pub fn from_f64(index: f64, label: impl Into<String>) -> Result<Self> {
        Ok(Self::new(integral(index, "annotation index")?, label))
    }

    /// Build from a `[index, label]` JSON pair.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let pair = value
            .as_array()
            .filter(|a| a.len() == 2)
            .ok_or_else(|| {
                EcgError::TypeMismatch(format!("expected [index, label] pair, got {value}"))
            })?;
        let index = match &pair[0] {
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => i,
                None => integral(n.as_f64().unwrap_or(f64::NAN), "annotation index")?,
            },
            other => {
                return Err(EcgError::TypeMismatch(format!(
                    "annotation index must be an integer, got {other}"
                )))
            }
        };
        let label = pair[1].as_str().ok_or_else(|| {
            EcgError::TypeMismatch(format!("annotation label must be a string, got {}", pair[1]))
        })?;
        Ok(Self::new(index, label))
    }

    /// Copy with the index moved by `delta`.
    pub fn shift(&self, delta: i64) -> Result<Self> {
        let index = self.index.checked_add(delta).ok_or_else(|| {
            EcgError::TypeMismatch(format!(
                "shifting annotation index {} by {delta} overflows",
                self.index
            ))
        })?;
        Ok(Self {
            index,
            label: self.label.clone(),
        })
    }
}

impl fmt::Display for AnnotationSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.index, self.label)
    }
}

fn integral(value: f64, what: &str) -> Result<i64> {
    if value.is_finite() && value.fract() == 0.0 {
        Ok(value as i64)
    } else {
        Err(EcgError::TypeMismatch(format!(
            "{what} must be an integer, got {value}"
        )))
    }
}

// ---------------------------------------------------------------------------
// Annotation – sorted set of samples over a record
// ---------------------------------------------------------------------------

/// Index-sorted annotation samples plus the logical length of the window
/// they describe.
#[derive(Debug, Clone, Default)]
pub struct Annotation {
    samples: Vec<AnnotationSample>,
    max_index: Option<usize>,
}

impl Annotation {
    /// Sorts by index; samples sharing an index keep their input order.
    pub fn new(mut samples: Vec<AnnotationSample>) -> Self {
        samples.sort_by_key(|s| s.index);
        Self {
            samples,
            max_index: None,
        }
    }

    pub fn from_pairs<L: Into<String>>(pairs: impl IntoIterator<Item = (i64, L)>) -> Self {
        Self::new(
            pairs
                .into_iter()
                .map(|(index, label)| AnnotationSample::new(index, label))
                .collect(),
        )
    }

    /// Fix the window length instead of deriving it from the samples.
    pub fn with_max_index(mut self, max_index: usize) -> Self {
        self.max_index = Some(max_index);
        self
    }

    pub fn set_max_index(&mut self, max_index: Option<usize>) {
        self.max_index = max_index;
    }

    /// Explicit window length, or one past the largest sample index.
    pub fn max_index(&self) -> usize {
        self.max_index.unwrap_or_else(|| {
            self.samples
                .last()
                .map(|s| s.index.saturating_add(1).max(0) as usize)
                .unwrap_or(0)
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AnnotationSample> {
        self.samples.iter()
    }

    pub fn samples(&self) -> &[AnnotationSample] {
        &self.samples
    }

    /// Labels of the samples before `max_index`, in order.
    pub fn labels(&self) -> Vec<&str> {
        let max_index = self.max_index() as i64;
        self.samples
            .iter()
            .filter(|s| s.index < max_index)
            .map(|s| s.label.as_str())
            .collect()
    }

    pub fn unique_labels(&self) -> Vec<&str> {
        self.samples
            .iter()
            .map(|s| s.label.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Label of the last sample at or before index 0.
    pub fn left_label(&self) -> Option<&str> {
        self.samples
            .iter()
            .rev()
            .find(|s| s.index <= 0)
            .map(|s| s.label.as_str())
    }

    /// Label of the first sample at or past `max_index`.
    pub fn right_label(&self) -> Option<&str> {
        let max_index = self.max_index() as i64;
        self.samples
            .iter()
            .find(|s| s.index >= max_index)
            .map(|s| s.label.as_str())
    }

    /// Positional view of `label` over `0..max_index`.
    ///
    /// With `use_adjacent`, a matching label just outside the window is
    /// carried onto the first/last position.
    pub fn stem_label(&self, label: &str, use_adjacent: bool) -> Vec<bool> {
        let max_index = self.max_index();
        let mut stem = vec![false; max_index];
        for s in &self.samples {
            if s.index >= 0 && (s.index as usize) < max_index && s.label == label {
                stem[s.index as usize] = true;
            }
        }
        if use_adjacent && max_index > 0 {
            if self.left_label() == Some(label) {
                stem[0] = true;
            }
            if self.right_label() == Some(label) {
                stem[max_index - 1] = true;
            }
        }
        stem
    }

    /// Every index moved by `delta`. The window length is re-derived.
    pub fn shift(&self, delta: i64) -> Result<Annotation> {
        let samples = self
            .samples
            .iter()
            .map(|s| s.shift(delta))
            .collect::<Result<Vec<_>>>()?;
        Ok(Annotation::new(samples))
    }

    /// [`Annotation::shift`] for a delta that arrives as a float.
    pub fn try_shift(&self, delta: f64) -> Result<Annotation> {
        self.shift(integral(delta, "shift")?)
    }

    /// Samples carrying exactly `label`, order preserved.
    pub fn select_label(&self, label: &str) -> Annotation {
        Annotation {
            samples: self
                .samples
                .iter()
                .filter(|s| s.label == label)
                .cloned()
                .collect(),
            max_index: self.max_index,
        }
    }
}

impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        self.samples == other.samples
    }
}

impl Add for Annotation {
    type Output = Annotation;

    /// Concatenation; duplicates are kept.
    fn add(self, other: Annotation) -> Annotation {
        let mut samples = self.samples;
        samples.extend(other.samples);
        Annotation::new(samples)
    }
}

impl<'a> IntoIterator for &'a Annotation {
    type Item = &'a AnnotationSample;
    type IntoIter = std::slice::Iter<'a, AnnotationSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

impl FromIterator<AnnotationSample> for Annotation {
    fn from_iter<I: IntoIterator<Item = AnnotationSample>>(iter: I) -> Self {
        Annotation::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normals(indices: &[i64]) -> Annotation {
        indices.iter().map(|&i| AnnotationSample::normal(i)).collect()
    }

    #[test]
    fn test_sample_equality() {
        assert_eq!(AnnotationSample::new(1, "N"), AnnotationSample::new(1, "N"));
        assert_ne!(AnnotationSample::new(1, "A"), AnnotationSample::new(1, "N"));
        assert_ne!(AnnotationSample::new(1, "N"), AnnotationSample::new(2, "N"));
        assert_ne!(AnnotationSample::new(1, "A"), AnnotationSample::new(2, "N"));
        assert!(AnnotationSample::new(1, "Z") < AnnotationSample::new(2, "A"));
    }

    #[test]
    fn test_sample_rejects_fractional_index() {
        assert!(AnnotationSample::from_f64(3.0, "N").is_ok());
        let err = AnnotationSample::from_f64(3.5, "N").unwrap_err();
        assert!(matches!(err, EcgError::TypeMismatch(_)));
    }

    #[test]
    fn test_sample_from_json() {
        let ok = AnnotationSample::from_json(&serde_json::json!([4, "V"])).unwrap();
        assert_eq!(ok, AnnotationSample::new(4, "V"));
        assert!(AnnotationSample::from_json(&serde_json::json!(["4", "V"])).is_err());
        assert!(AnnotationSample::from_json(&serde_json::json!([4.5, "V"])).is_err());
        assert!(AnnotationSample::from_json(&serde_json::json!("N")).is_err());
    }

    #[test]
    fn test_sample_shift_returns_new_value() {
        let sample = AnnotationSample::normal(5);
        assert_eq!(sample.shift(-2).unwrap(), AnnotationSample::normal(3));
        assert_eq!(sample.index, 5);
    }

    #[test]
    fn test_sorted_on_construction() {
        assert_eq!(normals(&[6, 5, 1, 4]), normals(&[1, 4, 5, 6]));
        assert_eq!(normals(&[6, 5, 1, 4]).len(), 4);
    }

    #[test]
    fn test_inequality() {
        assert_ne!(normals(&[1, 5, 4, 6]), normals(&[1, 8, 4, 6]));
        assert_ne!(normals(&[1, 5, 4, 6]), normals(&[1, 4, 6]));
        assert_ne!(Annotation::default(), normals(&[1, 4, 6]));
    }

    #[test]
    fn test_concat_keeps_duplicates() {
        let a = Annotation::from_pairs([(1, "N"), (5, "N"), (4, "N"), (6, "N")]);
        let b = Annotation::from_pairs([(10, "A"), (3, "X"), (62, "C"), (84, "D")]);
        let expected = Annotation::from_pairs([
            (1, "N"),
            (5, "N"),
            (4, "N"),
            (6, "N"),
            (10, "A"),
            (3, "X"),
            (62, "C"),
            (84, "D"),
        ]);
        assert_eq!(a.clone() + b, expected);
        assert_eq!((a.clone() + a).len(), 8);
    }

    #[test]
    fn test_max_index_default_and_override() {
        let ann = Annotation::from_pairs([(-3, "A"), (3, "X"), (4, "A"), (5, "B")]);
        assert_eq!(ann.max_index(), 6);
        assert_eq!(ann.stem_label("A", true).len(), 6);
        let ann = ann.with_max_index(3);
        assert_eq!(ann.max_index(), 3);
        assert_eq!(ann.stem_label("A", true).len(), 3);
    }

    #[test]
    fn test_stem_label_left_boundary_carry() {
        let ann = Annotation::from_pairs([(-3, "A"), (3, "X"), (4, "A"), (5, "B")]);
        assert_eq!(
            ann.stem_label("A", true),
            vec![true, false, false, false, true, false]
        );
        assert_eq!(
            ann.stem_label("A", false),
            vec![false, false, false, false, true, false]
        );
        assert_eq!(
            ann.stem_label("X", true),
            vec![false, false, false, true, false, false]
        );
    }

    #[test]
    fn test_stem_label_right_boundary_carry() {
        let ann = Annotation::from_pairs([(1, "A"), (4, "B"), (9, "B")]).with_max_index(4);
        assert_eq!(ann.right_label(), Some("B"));
        assert_eq!(ann.stem_label("B", true), vec![false, false, false, true]);
        assert_eq!(ann.labels(), vec!["A"]);
    }

    #[test]
    fn test_stem_label_empty_window() {
        let ann = Annotation::from_pairs([(-1, "A")]);
        assert_eq!(ann.max_index(), 0);
        assert!(ann.stem_label("A", true).is_empty());
    }

    #[test]
    fn test_boundary_labels_use_nearest_outside_sample() {
        let ann = Annotation::from_pairs([(-5, "A"), (-1, "B"), (2, "N"), (7, "C"), (9, "D")])
            .with_max_index(7);
        assert_eq!(ann.left_label(), Some("B"));
        assert_eq!(ann.right_label(), Some("C"));
    }

    #[test]
    fn test_shift() {
        let ann = normals(&[1, 4, 5, 6]);
        assert_eq!(ann.shift(-1).unwrap(), normals(&[0, 3, 4, 5]));
        assert_eq!(ann.shift(2).unwrap(), normals(&[3, 6, 7, 8]));
        assert_eq!(ann, normals(&[1, 4, 5, 6]));
        assert!(ann.try_shift(0.5).is_err());
        assert_eq!(ann.try_shift(-1.0).unwrap(), normals(&[0, 3, 4, 5]));
    }

    #[test]
    fn test_extreme_indices_do_not_overflow() {
        let top = Annotation::from_pairs([(i64::MAX, "N")]);
        assert_eq!(top.max_index(), i64::MAX as usize);
        assert!(matches!(top.shift(1), Err(EcgError::TypeMismatch(_))));

        let bottom = Annotation::from_pairs([(i64::MIN + 1, "N")]);
        assert!(matches!(bottom.shift(-5), Err(EcgError::TypeMismatch(_))));
        assert_eq!(
            bottom.shift(-1).unwrap(),
            Annotation::from_pairs([(i64::MIN, "N")])
        );
        assert!(AnnotationSample::new(i64::MIN, "N").shift(-1).is_err());
    }

    #[test]
    fn test_select_and_unique_labels() {
        let ann = Annotation::from_pairs([(1, "N"), (2, "V"), (3, "N"), (4, "A")]);
        assert_eq!(ann.select_label("N"), normals(&[1, 3]));
        assert_eq!(ann.unique_labels(), vec!["A", "N", "V"]);
        assert!(ann.select_label("~").is_empty());
    }
}
