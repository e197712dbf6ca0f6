use std::fmt;
use std::ops::Range;

use serde_json::Value as JsonValue;

use crate::error::{EcgError, Result};

use super::loader::RecordSignalLoader;
use super::sequence::{Sequence, Sliceable};

#[derive(Debug, Clone, PartialEq)]
enum SignalSource {
    Samples(Sequence<f64>),
    Loader(RecordSignalLoader),
}

/// Samples of one lead.
///
/// Loader-backed signals carry only the lead index and window; samples are
/// read from the shared record when [`Signal::values`] is called.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    lead_name: String,
    source: SignalSource,
}

impl Signal {
    pub fn new(lead_name: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            lead_name: lead_name.into(),
            source: SignalSource::Samples(Sequence::new(values)),
        }
    }

    /// Build from untyped data; anything but an array of numbers is rejected.
    pub fn from_json(lead_name: impl Into<String>, value: &JsonValue) -> Result<Self> {
        let items = value.as_array().ok_or_else(|| {
            EcgError::TypeMismatch(format!("signal values must be a numeric array, got {value}"))
        })?;
        let values = items
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    EcgError::TypeMismatch(format!("signal sample {v} is not a number"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(lead_name, values))
    }

    pub fn from_loader(lead_name: impl Into<String>, loader: RecordSignalLoader) -> Self {
        Self {
            lead_name: lead_name.into(),
            source: SignalSource::Loader(loader),
        }
    }

    pub fn lead_name(&self) -> &str {
        &self.lead_name
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self.source, SignalSource::Loader(_))
    }

    /// Materialized samples of this view.
    pub fn values(&self) -> Result<Vec<f64>> {
        match &self.source {
            SignalSource::Samples(seq) => Ok(seq.as_slice().to_vec()),
            SignalSource::Loader(loader) => loader.load(),
        }
    }

    /// Compare materialized samples and lead names.
    pub fn content_eq(&self, other: &Signal) -> Result<bool> {
        Ok(self.lead_name == other.lead_name && self.values()? == other.values()?)
    }
}

impl Sliceable for Signal {
    fn len(&self) -> usize {
        match &self.source {
            SignalSource::Samples(seq) => seq.len(),
            SignalSource::Loader(loader) => loader.len(),
        }
    }

    fn slice_range(&self, range: Range<usize>) -> Self {
        let source = match &self.source {
            SignalSource::Samples(seq) => SignalSource::Samples(seq.slice_range(range)),
            SignalSource::Loader(loader) => SignalSource::Loader(loader.slice(range)),
        };
        Self {
            lead_name: self.lead_name.clone(),
            source,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lead {}", self.lead_name)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::data::loader::tests::CountingParser;
    use crate::data::loader::RecordLoader;

    #[test]
    fn test_rejects_non_numeric_input() {
        assert!(matches!(
            Signal::from_json("I", &json!("abc")),
            Err(EcgError::TypeMismatch(_))
        ));
        assert!(matches!(
            Signal::from_json("I", &json!(3.5)),
            Err(EcgError::TypeMismatch(_))
        ));
        assert!(matches!(
            Signal::from_json("I", &json!([1, "x"])),
            Err(EcgError::TypeMismatch(_))
        ));
        let s = Signal::from_json("I", &json!([1, 2.5, -3])).unwrap();
        assert_eq!(s.values().unwrap(), vec![1.0, 2.5, -3.0]);
    }

    #[test]
    fn test_slice_is_independent() {
        let s = Signal::new("V1", vec![0.0, 1.0, 2.0, 3.0]);
        let a = s.slice(1..3).unwrap();
        let b = s.at(3).unwrap();
        assert_eq!(a.values().unwrap(), vec![1.0, 2.0]);
        assert_eq!(b.len(), 1);
        assert_eq!(s.len(), 4);
        assert_eq!(s.values().unwrap(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(a.lead_name(), "V1");
        assert_eq!(s.to_string(), "Lead V1");
    }

    #[test]
    fn test_lazy_slice_matches_eager_slice() {
        let parser = Arc::new(CountingParser::default());
        let record = RecordLoader::new(PathBuf::from("/virtual/signal-lazy.hea"), parser.clone());
        let lazy = Signal::from_loader("II", RecordSignalLoader::new(record, 1, 6));
        let lazy_slice = lazy.slice(2..5).unwrap();
        assert!(lazy_slice.is_lazy());
        assert_eq!(parser.records.load(Ordering::SeqCst), 0);

        let eager = Signal::new("II", lazy.values().unwrap());
        assert_eq!(
            lazy_slice.values().unwrap(),
            eager.slice(2..5).unwrap().values().unwrap()
        );
        assert!(lazy_slice.content_eq(&eager.slice(2..5).unwrap()).unwrap());
        assert_eq!(lazy.slice(2..5).unwrap().slice(1..).unwrap().values().unwrap(), vec![40.0, 50.0]);
        assert_eq!(parser.records.load(Ordering::SeqCst), 1);
    }
}
