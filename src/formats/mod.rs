//! On-disk record formats.
//!
//! Each format turns a path into a [`RawRecord`] (sample matrix plus
//! metadata) and, optionally, a flat list of annotation events. Everything
//! above this layer is format-agnostic.

pub mod ishne;
pub mod wfdb;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::data::record::SubjectInfo;
use crate::error::{EcgError, Result};

pub use ishne::IshneParser;
pub use wfdb::WfdbParser;

// ---------------------------------------------------------------------------
// Parser outputs
// ---------------------------------------------------------------------------

/// Metadata answerable without reading the sample data.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub record_name: String,
    pub n_signals: usize,
    pub sampling_rate: f64,
    pub sample_count: usize,
}

/// A fully parsed recording: `samples[channel][sample]` in physical units.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecord {
    pub record_name: String,
    /// `None` for in-memory arrays that carry explicit timestamps.
    pub sampling_rate: Option<f64>,
    pub sample_count: usize,
    pub channel_names: Vec<String>,
    pub samples: Vec<Vec<f64>>,
    pub info: SubjectInfo,
}

/// One `(sample index, label)` event as read from an annotation stream.
pub type AnnotationEvent = (i64, String);

// ---------------------------------------------------------------------------
// FormatParser – the seam every concrete format plugs into
// ---------------------------------------------------------------------------

pub trait FormatParser: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    fn read_header(&self, path: &Path) -> Result<RecordHeader>;

    fn read_record(&self, path: &Path) -> Result<RawRecord>;

    /// `Ok(None)` when there is no annotation stream for this record.
    fn read_annotations(&self, path: &Path) -> Result<Option<Vec<AnnotationEvent>>>;
}

/// Formats recognised by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordFormat {
    Wfdb,
    Ishne,
}

impl RecordFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "hea" => Some(RecordFormat::Wfdb),
            "ecg" => Some(RecordFormat::Ishne),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            RecordFormat::Wfdb => "hea",
            RecordFormat::Ishne => "ecg",
        }
    }

    pub fn parser(&self) -> Arc<dyn FormatParser> {
        match self {
            RecordFormat::Wfdb => Arc::new(WfdbParser),
            RecordFormat::Ishne => Arc::new(IshneParser),
        }
    }
}

/// A record file whose format has been decided.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub format: RecordFormat,
}

/// Decide which file and format `path` refers to.
///
/// A path with a known extension is taken as-is (existence is checked when
/// it is read). Anything else is treated as a basename (`ECG_P28.01` has a
/// dot but no record extension) and matched against `<base>*.hea` and
/// `<base>*.ecg` siblings; exactly one must exist.
pub fn resolve(path: &Path) -> Result<ResolvedFile> {
    let known = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(RecordFormat::from_extension);
    match known {
        Some(format) => Ok(ResolvedFile {
            path: path.to_path_buf(),
            format,
        }),
        None => resolve_basename(path),
    }
}

fn resolve_basename(base: &Path) -> Result<ResolvedFile> {
    let dir = match base.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = base
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EcgError::NotFound(base.to_path_buf()))?;

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(EcgError::NotFound(base.to_path_buf()))
        }
        Err(e) => return Err(EcgError::io(&dir, e)),
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| EcgError::io(&dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with(prefix) {
            continue;
        }
        // Case-sensitive like a shell glob on `<base>*.hea` / `<base>*.ecg`.
        let format = if name.ends_with(".hea") {
            RecordFormat::Wfdb
        } else if name.ends_with(".ecg") {
            RecordFormat::Ishne
        } else {
            continue;
        };
        candidates.push(ResolvedFile {
            path: dir.join(name),
            format,
        });
    }

    match candidates.len() {
        0 => Err(EcgError::NotFound(base.to_path_buf())),
        1 => {
            let resolved = candidates.remove(0);
            debug!("resolved {} to {}", base.display(), resolved.path.display());
            Ok(resolved)
        }
        count => Err(EcgError::Ambiguous {
            base: base.to_path_buf(),
            count,
        }),
    }
}

// -- shared binary helpers --

pub(crate) fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| EcgError::io(path, e))
}

pub(crate) fn le_i16(bytes: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([bytes[at], bytes[at + 1]])
}

pub(crate) fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

pub(crate) fn le_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}
