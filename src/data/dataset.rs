use std::fmt;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{BufReader, BufWriter};
use std::ops::Add;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::thread;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{EcgError, Result};
use crate::formats::{self, RecordHeader, ResolvedFile};

use super::loader::{LoadCache, CACHE_CAPACITY};
use super::record::Record;
use super::rng::SimpleRng;
use super::sequence::Selector;

/// Workers used for header-only bulk reads (`sig_lens`, `durations`).
pub const RECORD_LOAD_THREADS: usize = 2;
/// Workers used when materializing a range of records.
pub const RECORD_THAW_THREADS: usize = 4;

// ---------------------------------------------------------------------------
// RecordTicket – a lazy, memoized handle to one record file
// ---------------------------------------------------------------------------

type TicketKey = (PathBuf, Option<Vec<String>>);

fn ticket_cache() -> &'static LoadCache<TicketKey, Record> {
    static CACHE: OnceLock<LoadCache<TicketKey, Record>> = OnceLock::new();
    CACHE.get_or_init(|| LoadCache::new(CACHE_CAPACITY))
}

/// Identifies a record file (plus an optional lead filter) without reading it.
///
/// The format is resolved on first use and header metadata is read once;
/// both are forgotten when the ticket is relocated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordTicket {
    record_file: PathBuf,
    dataset_dir: PathBuf,
    selected_leads: Option<Vec<String>>,
    #[serde(skip)]
    resolved: OnceLock<ResolvedFile>,
    #[serde(skip)]
    header: OnceLock<RecordHeader>,
}

impl RecordTicket {
    /// `record_file` is a `.hea`/`.ecg` path or an extension-less basename.
    pub fn new(record_file: impl Into<PathBuf>, selected_leads: Option<Vec<String>>) -> Self {
        let record_file = record_file.into();
        let dataset_dir = record_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            record_file,
            dataset_dir,
            selected_leads,
            resolved: OnceLock::new(),
            header: OnceLock::new(),
        }
    }

    /// File name as given, e.g. `100.hea`.
    pub fn record_base(&self) -> String {
        self.record_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name without its extension, e.g. `ECG_P28.01`.
    pub fn record_name(&self) -> String {
        Path::new(&self.record_base())
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Current location: the dataset directory joined with the base name.
    pub fn record_file(&self) -> PathBuf {
        self.dataset_dir.join(self.record_base())
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    pub fn selected_leads(&self) -> Option<&[String]> {
        self.selected_leads.as_deref()
    }

    /// Point the ticket at another directory holding the same file name.
    pub fn set_dataset_dir(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(EcgError::NotFound(dir.to_path_buf()));
        }
        self.dataset_dir = dir.to_path_buf();
        self.resolved = OnceLock::new();
        self.header = OnceLock::new();
        Ok(())
    }

    pub fn resolved(&self) -> Result<&ResolvedFile> {
        if let Some(resolved) = self.resolved.get() {
            return Ok(resolved);
        }
        let resolved = formats::resolve(&self.record_file())?;
        Ok(self.resolved.get_or_init(|| resolved))
    }

    /// Header metadata only; the sample data is not read.
    pub fn header(&self) -> Result<&RecordHeader> {
        if let Some(header) = self.header.get() {
            return Ok(header);
        }
        let resolved = self.resolved()?;
        let header = resolved.format.parser().read_header(&resolved.path)?;
        Ok(self.header.get_or_init(|| header))
    }

    pub fn fs(&self) -> Result<f64> {
        Ok(self.header()?.sampling_rate)
    }

    pub fn sig_len(&self) -> Result<usize> {
        Ok(self.header()?.sample_count)
    }

    /// `(sig_len - 1) / fs`, from the header alone.
    pub fn duration(&self) -> Result<f64> {
        let header = self.header()?;
        Ok((header.sample_count as f64 - 1.0) / header.sampling_rate)
    }

    /// Materialize the record. Repeated calls, from this ticket or an equal
    /// one, return the same shared record.
    /// Tickets naming the same file by basename or full name share the record.
    pub fn load(&self) -> Result<Arc<Record>> {
        let resolved = self.resolved()?;
        let key = (resolved.path.clone(), self.selected_leads.clone());
        ticket_cache().get_or_load(&key, || {
            debug!("thawing {}", resolved.path.display());
            Record::from_resolved(resolved, self.selected_leads())
        })
    }

    fn key(&self) -> TicketKey {
        (self.record_file(), self.selected_leads.clone())
    }
}

impl PartialEq for RecordTicket {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for RecordTicket {}

impl Hash for RecordTicket {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for RecordTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.record_base())
    }
}

// ---------------------------------------------------------------------------
// Dataset – an ordered list of tickets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    dataset_name: String,
    dataset_dir: PathBuf,
    record_tickets: Vec<RecordTicket>,
}

impl Dataset {
    /// `dataset_dir` must exist. The name defaults to its last component.
    pub fn new(
        dataset_name: Option<&str>,
        dataset_dir: impl AsRef<Path>,
        record_tickets: Vec<RecordTicket>,
    ) -> Result<Self> {
        let dataset_dir = dataset_dir.as_ref();
        if !dataset_dir.is_dir() {
            return Err(EcgError::NotFound(dataset_dir.to_path_buf()));
        }
        let dataset_name = match dataset_name {
            Some(name) => name.to_string(),
            None => dataset_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| dataset_dir.display().to_string()),
        };
        Ok(Self {
            dataset_name,
            dataset_dir: dataset_dir.to_path_buf(),
            record_tickets,
        })
    }

    /// Every `*.hea`, then every `*.ecg`, in `dataset_dir`; each group sorted.
    pub fn from_dir(
        dataset_dir: impl AsRef<Path>,
        selected_leads: Option<Vec<String>>,
    ) -> Result<Self> {
        let dataset_dir = dataset_dir.as_ref();
        if !dataset_dir.is_dir() {
            return Err(EcgError::NotFound(dataset_dir.to_path_buf()));
        }

        let mut hea = Vec::new();
        let mut ecg = Vec::new();
        for entry in fs::read_dir(dataset_dir).map_err(|e| EcgError::io(dataset_dir, e))? {
            let path = entry.map_err(|e| EcgError::io(dataset_dir, e))?.path();
            if !path.is_file() {
                continue;
            }
            match path.extension().and_then(|e| e.to_str()) {
                Some("hea") => hea.push(path),
                Some("ecg") => ecg.push(path),
                _ => {}
            }
        }
        hea.sort();
        ecg.sort();

        let record_tickets: Vec<RecordTicket> = hea
            .into_iter()
            .chain(ecg)
            .map(|f| RecordTicket::new(f, selected_leads.clone()))
            .collect();
        if record_tickets.is_empty() {
            return Err(EcgError::NotFound(dataset_dir.to_path_buf()));
        }
        info!(
            "found {} records in {}",
            record_tickets.len(),
            dataset_dir.display()
        );
        Self::new(None, dataset_dir, record_tickets)
    }

    pub fn name(&self) -> &str {
        &self.dataset_name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.dataset_name = name.into();
    }

    pub fn dataset_dir(&self) -> &Path {
        &self.dataset_dir
    }

    /// Relocate the dataset and every ticket in it.
    pub fn set_dataset_dir(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(EcgError::NotFound(dir.to_path_buf()));
        }
        for ticket in &mut self.record_tickets {
            ticket.set_dataset_dir(dir)?;
        }
        self.dataset_dir = dir.to_path_buf();
        Ok(())
    }

    pub fn record_tickets(&self) -> &[RecordTicket] {
        &self.record_tickets
    }

    pub fn len(&self) -> usize {
        self.record_tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_tickets.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<Arc<Record>> {
        self.record_tickets
            .get(index)
            .ok_or(EcgError::OutOfBounds {
                index,
                len: self.len(),
            })?
            .load()
    }

    /// Materialize a range of records in parallel, in ticket order.
    pub fn load_range(&self, selector: impl Into<Selector>) -> Result<Vec<Arc<Record>>> {
        let range = selector.into().resolve(self.len())?;
        parallel_map(
            &self.record_tickets[range],
            RECORD_THAW_THREADS,
            "record-thaw",
            RecordTicket::load,
        )
    }

    /// Every record, loaded one after another.
    pub fn records(&self) -> Result<Vec<Arc<Record>>> {
        self.record_tickets.iter().map(RecordTicket::load).collect()
    }

    pub fn iter_records(&self) -> impl Iterator<Item = Result<Arc<Record>>> + '_ {
        self.record_tickets.iter().map(RecordTicket::load)
    }

    pub fn sig_lens(&self) -> Result<Vec<usize>> {
        parallel_map(
            &self.record_tickets,
            RECORD_LOAD_THREADS,
            "record-load",
            RecordTicket::sig_len,
        )
    }

    pub fn durations(&self) -> Result<Vec<f64>> {
        parallel_map(
            &self.record_tickets,
            RECORD_LOAD_THREADS,
            "record-load",
            RecordTicket::duration,
        )
    }

    /// Reorder tickets in place; the same seed gives the same order.
    pub fn shuffle(&mut self, seed: u64) {
        SimpleRng::new(seed).shuffle(&mut self.record_tickets);
    }

    /// A dataset holding a sub-range of the tickets. Nothing is loaded.
    pub fn slice(&self, selector: impl Into<Selector>) -> Result<Dataset> {
        let range = selector.into().resolve(self.len())?;
        Ok(Dataset {
            dataset_name: self.dataset_name.clone(),
            dataset_dir: self.dataset_dir.clone(),
            record_tickets: self.record_tickets[range].to_vec(),
        })
    }

    /// Partition into `names.len()` consecutive datasets.
    ///
    /// Each ratio takes `floor(len * ratio)` tickets; the last name gets the
    /// rest.
    pub fn split(&self, names: &[&str], ratios: &[f64]) -> Result<Vec<Dataset>> {
        if ratios.iter().any(|r| !r.is_finite() || *r < 0.0) {
            return Err(EcgError::Config(format!(
                "split ratios must be non-negative, got {ratios:?}"
            )));
        }
        if ratios.iter().sum::<f64>() > 1.0 {
            return Err(EcgError::Config(
                "sum of ratios must be less than or equal to 1".into(),
            ));
        }
        if names.len() != ratios.len() + 1 {
            return Err(EcgError::Config(format!(
                "{} names given for {} ratios, expected {}",
                names.len(),
                ratios.len(),
                ratios.len() + 1
            )));
        }

        let total = self.len();
        let mut counts: Vec<usize> = ratios
            .iter()
            .map(|r| (total as f64 * r) as usize)
            .collect();
        counts.push(total.saturating_sub(counts.iter().sum()));

        let mut start = 0;
        let mut parts = Vec::with_capacity(names.len());
        for (name, count) in names.iter().zip(counts) {
            let end = (start + count).min(total);
            let mut part = self.slice(start..end)?;
            part.dataset_name = name.to_string();
            parts.push(part);
            start = end;
        }
        Ok(parts)
    }

    /// Write the per-record summary.
    ///
    /// `output` ending in `.csv` is the file itself; anything else is a
    /// directory receiving `<dataset_name>_records.csv`.
    pub fn save_csv(&self, output: impl AsRef<Path>) -> Result<PathBuf> {
        let output = output.as_ref();
        let path = if has_extension(output, "csv") {
            output.to_path_buf()
        } else {
            output.join(format!("{}_records.csv", self.dataset_name))
        };
        create_parent(&path)?;

        let sig_lens = self.sig_lens()?;
        let durations = self.durations()?;

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["", "Dataset_Directory", "Base_Name", "sig_len", "duration"])?;
        for (index, ((ticket, sig_len), duration)) in self
            .record_tickets
            .iter()
            .zip(sig_lens)
            .zip(durations)
            .enumerate()
        {
            writer.write_record([
                index.to_string(),
                ticket.dataset_dir().display().to_string(),
                ticket.record_base(),
                sig_len.to_string(),
                format!("{duration:?}"),
            ])?;
        }
        writer.flush().map_err(|e| EcgError::io(&path, e))?;
        info!("wrote {} rows to {}", self.len(), path.display());
        Ok(path)
    }

    /// Persist the dataset as JSON, with the CSV summary next to it.
    ///
    /// `output` is either a `.json` file or a directory receiving
    /// `<dataset_name>.json`.
    pub fn to_json(&self, output: impl AsRef<Path>) -> Result<PathBuf> {
        let output = output.as_ref();
        let (json_path, csv_target) = match output.extension() {
            None => (
                output.join(format!("{}.json", self.dataset_name)),
                output.to_path_buf(),
            ),
            Some(_) if has_extension(output, "json") => {
                (output.to_path_buf(), output.with_extension("csv"))
            }
            Some(ext) => {
                return Err(EcgError::Config(format!(
                    "dataset output must end in .json, got .{}",
                    ext.to_string_lossy()
                )))
            }
        };

        self.save_csv(&csv_target)?;
        create_parent(&json_path)?;
        let file = File::create(&json_path).map_err(|e| EcgError::io(&json_path, e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        info!("saved dataset {} to {}", self.dataset_name, json_path.display());
        Ok(json_path)
    }

    pub fn from_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| EcgError::io(path, e))?;
        let dataset: Dataset = serde_json::from_reader(BufReader::new(file))?;
        debug!(
            "restored dataset {} with {} records",
            dataset.dataset_name,
            dataset.len()
        );
        Ok(dataset)
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.record_tickets == other.record_tickets
    }
}

impl Add for Dataset {
    type Output = Dataset;

    /// Tickets of `other` appended; name and directory of `self` kept.
    fn add(mut self, other: Dataset) -> Dataset {
        self.record_tickets.extend(other.record_tickets);
        self
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.record_tickets.iter().map(|t| t.to_string()).collect();
        write!(f, "Dataset with records\n{}", names.join("\n"))
    }
}

// -- helpers --

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| EcgError::io(parent, e))
        }
        _ => Ok(()),
    }
}

/// Run `f` over `items` on up to `workers` named threads, keeping order.
///
/// A chunk whose thread cannot be spawned runs on the calling thread.
fn parallel_map<T, R, F>(items: &[T], workers: usize, label: &str, f: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let chunk_len = items.len().div_ceil(workers.max(1));
    let f = &f;
    thread::scope(|scope| {
        let pending: Vec<_> = items
            .chunks(chunk_len)
            .enumerate()
            .map(|(i, chunk)| {
                thread::Builder::new()
                    .name(format!("{label}-{i}"))
                    .spawn_scoped(scope, move || chunk.iter().map(f).collect::<Result<Vec<R>>>())
                    .map_err(|e| {
                        warn!("could not spawn {label} worker {i}: {e}");
                        chunk
                    })
            })
            .collect();

        let mut out = Vec::with_capacity(items.len());
        for p in pending {
            let part = match p {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|payload| std::panic::resume_unwind(payload)),
                Err(chunk) => chunk.iter().map(f).collect::<Result<Vec<R>>>(),
            };
            out.extend(part?);
        }
        Ok(out)
    })
}
