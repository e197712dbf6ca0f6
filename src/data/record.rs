use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{EcgError, Result};
use crate::formats::{self, ResolvedFile};

use super::annotation::Annotation;
use super::loader::{AnnotationLoader, RecordLoader, RecordSignalLoader};
use super::sequence::Sliceable;
use super::signal::Signal;
use super::time::Time;

// ---------------------------------------------------------------------------
// Subject metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Sex {
    /// Parse `M`/`F` style header tokens; anything else is unknown.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "m" | "male" => Sex::Male,
            "f" | "female" => Sex::Female,
            _ => Sex::Unknown,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
            Sex::Unknown => "?",
        }
    }
}

/// Demographics carried alongside a record. Not interpreted here.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubjectInfo {
    pub subject_id: Option<String>,
    pub age: Option<u32>,
    pub sex: Sex,
    pub comments: Vec<String>,
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum RecordAnnotations {
    Absent,
    Loaded(Arc<Annotation>),
    Deferred(AnnotationLoader),
}

/// One recording: a time axis, its leads and the beat annotations.
///
/// Slicing yields a new view that shares loaders and annotation storage with
/// its parent. The view remembers its `origin` in the source so annotations
/// can be re-based to the window when they are read.
#[derive(Debug, Clone)]
pub struct Record {
    record_name: String,
    time: Time,
    signals: Vec<Signal>,
    annotations: RecordAnnotations,
    origin: i64,
    info: SubjectInfo,
}

impl Record {
    pub fn new(record_name: impl Into<String>, time: Time) -> Self {
        Self {
            record_name: record_name.into(),
            time,
            signals: Vec::new(),
            annotations: RecordAnnotations::Absent,
            origin: 0,
            info: SubjectInfo::default(),
        }
    }

    /// Build from explicit timestamps and one row per lead.
    pub fn from_array(
        record_name: impl Into<String>,
        timestamps: Vec<f64>,
        rows: Vec<Vec<f64>>,
        lead_names: Vec<String>,
    ) -> Result<Self> {
        if rows.len() != lead_names.len() {
            return Err(EcgError::ShapeMismatch(format!(
                "{} signal rows but {} lead names",
                rows.len(),
                lead_names.len()
            )));
        }
        let mut record = Record::new(record_name, Time::from_timestamps(timestamps)?);
        for (row, name) in rows.into_iter().zip(lead_names) {
            record.add_signal(Signal::new(name, row))?;
        }
        Ok(record)
    }

    /// Resolve `path` (file or basename) and build a lazily-backed record.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_resolved(&formats::resolve(path)?, None)
    }

    pub fn from_resolved(resolved: &ResolvedFile, selected_leads: Option<&[String]>) -> Result<Self> {
        Self::load_with(
            RecordLoader::for_file(resolved),
            Some(AnnotationLoader::for_file(resolved)),
            selected_leads,
        )
    }

    /// Build a record whose signals read rows of `loader` on demand.
    ///
    /// The matrix is parsed here (once per path) to learn the shape; the
    /// annotation stream is only read on [`Record::annotations`].
    pub fn load_with(
        loader: RecordLoader,
        annotations: Option<AnnotationLoader>,
        selected_leads: Option<&[String]>,
    ) -> Result<Self> {
        let raw = loader.load()?;
        let fs = raw.sampling_rate.ok_or_else(|| {
            EcgError::TypeMismatch(format!("record {} has no sampling rate", raw.record_name))
        })?;
        if raw.channel_names.len() != raw.samples.len() {
            return Err(EcgError::ShapeMismatch(format!(
                "record {} has {} rows but {} channel names",
                raw.record_name,
                raw.samples.len(),
                raw.channel_names.len()
            )));
        }

        let leads: Vec<usize> = match selected_leads {
            None => (0..raw.channel_names.len()).collect(),
            Some(names) => names
                .iter()
                .map(|name| {
                    raw.channel_names
                        .iter()
                        .position(|c| c == name)
                        .ok_or_else(|| {
                            EcgError::Config(format!(
                                "lead {name} not in record {}",
                                raw.record_name
                            ))
                        })
                })
                .collect::<Result<_>>()?,
        };

        let mut record = Record::new(
            raw.record_name.clone(),
            Time::from_rate_and_count(fs, raw.sample_count)?,
        );
        for lead in leads {
            if raw.samples[lead].len() != raw.sample_count {
                return Err(EcgError::ShapeMismatch(format!(
                    "lead {} of {} has {} samples, expected {}",
                    raw.channel_names[lead],
                    raw.record_name,
                    raw.samples[lead].len(),
                    raw.sample_count
                )));
            }
            let signal = RecordSignalLoader::new(loader.clone(), lead, raw.sample_count);
            record.add_signal(Signal::from_loader(raw.channel_names[lead].clone(), signal))?;
        }
        record.annotations = match annotations {
            Some(loader) => RecordAnnotations::Deferred(loader),
            None => RecordAnnotations::Absent,
        };
        record.info = raw.info.clone();
        Ok(record)
    }

    /// Append a lead; its length must match the time axis.
    pub fn add_signal(&mut self, signal: Signal) -> Result<()> {
        if signal.len() != self.time.len() {
            return Err(EcgError::ShapeMismatch(format!(
                "signal {} has {} samples, record {} has {}",
                signal.lead_name(),
                signal.len(),
                self.record_name,
                self.time.len()
            )));
        }
        self.signals.push(signal);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.record_name
    }

    pub fn time(&self) -> &Time {
        &self.time
    }

    /// Last timestamp of the view, 0 when empty.
    pub fn duration(&self) -> f64 {
        self.time.max().unwrap_or(0.0)
    }

    pub fn n_sig(&self) -> usize {
        self.signals.len()
    }

    pub fn lead_names(&self) -> Vec<&str> {
        self.signals.iter().map(Signal::lead_name).collect()
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    /// First lead called `name`.
    pub fn get_lead(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.lead_name() == name)
    }

    /// `[lead][sample]` matrix of this view.
    pub fn p_signal(&self) -> Result<Vec<Vec<f64>>> {
        self.signals.iter().map(Signal::values).collect()
    }

    /// Position of this view's first sample in the source recording.
    pub fn origin(&self) -> i64 {
        self.origin
    }

    /// Annotations of this view, indexed from its first sample.
    pub fn annotations(&self) -> Result<Option<Annotation>> {
        let loaded;
        let base: &Annotation = match &self.annotations {
            RecordAnnotations::Absent => return Ok(None),
            RecordAnnotations::Loaded(ann) => ann,
            RecordAnnotations::Deferred(loader) => {
                loaded = loader.load()?;
                match &*loaded {
                    Some(ann) => ann,
                    None => return Ok(None),
                }
            }
        };
        Ok(Some(base.shift(-self.origin)?.with_max_index(self.len())))
    }

    /// Replace the annotations; they are taken as indexed from this view.
    pub fn set_annotations(&mut self, annotations: Option<Annotation>) {
        self.annotations = match annotations {
            Some(ann) => RecordAnnotations::Loaded(Arc::new(ann)),
            None => RecordAnnotations::Absent,
        };
        self.origin = 0;
    }

    pub fn info(&self) -> &SubjectInfo {
        &self.info
    }

    pub fn with_info(mut self, info: SubjectInfo) -> Self {
        self.info = info;
        self
    }

    /// Compare everything a reader can observe, materializing lazy parts.
    pub fn content_eq(&self, other: &Record) -> Result<bool> {
        if self.record_name != other.record_name
            || self.time != other.time
            || self.lead_names() != other.lead_names()
        {
            return Ok(false);
        }
        for (a, b) in self.signals.iter().zip(&other.signals) {
            if !a.content_eq(b)? {
                return Ok(false);
            }
        }
        Ok(self.annotations()? == other.annotations()?)
    }
}

impl Sliceable for Record {
    fn len(&self) -> usize {
        self.time.len()
    }

    fn slice_range(&self, range: Range<usize>) -> Self {
        Self {
            record_name: self.record_name.clone(),
            time: self.time.slice_range(range.clone()),
            signals: self
                .signals
                .iter()
                .map(|s| s.slice_range(range.clone()))
                .collect(),
            annotations: self.annotations.clone(),
            origin: self.origin + range.start as i64,
            info: self.info.clone(),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record {}: [{}]", self.record_name, self.lead_names().join(", "))
    }
}
