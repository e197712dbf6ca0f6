use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::{debug, trace};

use crate::error::{EcgError, Result};
use crate::formats::{FormatParser, RawRecord, ResolvedFile};

use super::annotation::{Annotation, AnnotationSample};

/// Entries kept per cache before the oldest is dropped.
pub const CACHE_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// LoadCache – bounded, single-flight memoization
// ---------------------------------------------------------------------------

type Slot<V> = Arc<Mutex<Option<Arc<V>>>>;

struct CacheSlots<K, V> {
    map: HashMap<K, Slot<V>>,
    order: VecDeque<K>,
}

/// Keyed memo of shared, immutable values.
///
/// Each key owns a slot with its own lock: the first caller for a key runs
/// the loader while later callers for the same key wait on that slot and then
/// see the stored value. Failed loads leave the slot empty so a later call
/// retries. Beyond `capacity` keys the oldest slot is forgotten.
pub struct LoadCache<K, V> {
    capacity: usize,
    slots: Mutex<CacheSlots<K, V>>,
}

impl<K, V> LoadCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Mutex::new(CacheSlots {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn get_or_load<F>(&self, key: &K, load: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        let slot = self.slot(key);
        let mut value = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(v) = value.as_ref() {
            trace!("cache hit for {key:?}");
            return Ok(Arc::clone(v));
        }
        debug!("cache miss for {key:?}");
        let loaded = Arc::new(load()?);
        *value = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Whether `key` currently holds a loaded value.
    pub fn contains(&self, key: &K) -> bool {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .get(key)
            .cloned();
        slot.is_some_and(|slot| {
            slot.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        })
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.map.clear();
        slots.order.clear();
    }

    fn slot(&self, key: &K) -> Slot<V> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = slots.map.get(key) {
            return Arc::clone(slot);
        }
        let slot: Slot<V> = Arc::new(Mutex::new(None));
        slots.map.insert(key.clone(), Arc::clone(&slot));
        slots.order.push_back(key.clone());
        while slots.map.len() > self.capacity {
            match slots.order.pop_front() {
                Some(oldest) => {
                    trace!("evicting {oldest:?}");
                    slots.map.remove(&oldest);
                }
                None => break,
            }
        }
        slot
    }
}

fn record_cache() -> &'static LoadCache<PathBuf, RawRecord> {
    static CACHE: OnceLock<LoadCache<PathBuf, RawRecord>> = OnceLock::new();
    CACHE.get_or_init(|| LoadCache::new(CACHE_CAPACITY))
}

fn annotation_cache() -> &'static LoadCache<PathBuf, Option<Annotation>> {
    static CACHE: OnceLock<LoadCache<PathBuf, Option<Annotation>>> = OnceLock::new();
    CACHE.get_or_init(|| LoadCache::new(CACHE_CAPACITY))
}

// ---------------------------------------------------------------------------
// RecordLoader – path → raw sample matrix, parsed once
// ---------------------------------------------------------------------------

/// Access to the raw matrix of one record.
///
/// File-backed loaders only store the path; the file is parsed on the first
/// [`RecordLoader::load`] and shared through the process-wide cache, so two
/// loaders for the same path count as the same entry.
#[derive(Clone)]
pub enum RecordLoader {
    File {
        path: PathBuf,
        parser: Arc<dyn FormatParser>,
    },
    /// An in-memory matrix; never touches the cache.
    Fixed(Arc<RawRecord>),
}

impl RecordLoader {
    pub fn new(path: impl Into<PathBuf>, parser: Arc<dyn FormatParser>) -> Self {
        RecordLoader::File {
            path: path.into(),
            parser,
        }
    }

    pub fn for_file(resolved: &ResolvedFile) -> Self {
        Self::new(resolved.path.clone(), resolved.format.parser())
    }

    pub fn fixed(raw: RawRecord) -> Self {
        RecordLoader::Fixed(Arc::new(raw))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            RecordLoader::File { path, .. } => Some(path),
            RecordLoader::Fixed(_) => None,
        }
    }

    pub fn load(&self) -> Result<Arc<RawRecord>> {
        match self {
            RecordLoader::File { path, parser } => record_cache().get_or_load(path, || {
                debug!("parsing {} as {}", path.display(), parser.name());
                parser.read_record(path)
            }),
            RecordLoader::Fixed(raw) => Ok(Arc::clone(raw)),
        }
    }

    /// Whether the backing matrix is already in memory.
    pub fn is_loaded(&self) -> bool {
        match self {
            RecordLoader::File { path, .. } => record_cache().contains(path),
            RecordLoader::Fixed(_) => true,
        }
    }
}

impl fmt::Debug for RecordLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordLoader::File { path, parser } => f
                .debug_struct("RecordLoader")
                .field("path", path)
                .field("format", &parser.name())
                .finish(),
            RecordLoader::Fixed(raw) => f
                .debug_tuple("RecordLoader::Fixed")
                .field(&raw.record_name)
                .finish(),
        }
    }
}

impl PartialEq for RecordLoader {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RecordLoader::File { path: a, .. }, RecordLoader::File { path: b, .. }) => a == b,
            (RecordLoader::Fixed(a), RecordLoader::Fixed(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for RecordLoader {}

impl Hash for RecordLoader {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            RecordLoader::File { path, .. } => path.hash(state),
            RecordLoader::Fixed(raw) => (Arc::as_ptr(raw) as usize).hash(state),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordSignalLoader – one row of a record, optionally windowed
// ---------------------------------------------------------------------------

/// One lead of a shared [`RecordLoader`], restricted to `window`.
///
/// Windows compose: slicing a windowed loader narrows the existing window
/// rather than replacing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordSignalLoader {
    record: RecordLoader,
    lead_index: usize,
    window: Range<usize>,
}

impl RecordSignalLoader {
    /// Full row `lead_index` of a record with `len` samples.
    pub fn new(record: RecordLoader, lead_index: usize, len: usize) -> Self {
        Self {
            record,
            lead_index,
            window: 0..len,
        }
    }

    pub fn record(&self) -> &RecordLoader {
        &self.record
    }

    pub fn lead_index(&self) -> usize {
        self.lead_index
    }

    pub fn window(&self) -> Range<usize> {
        self.window.clone()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Narrow to `range`, given relative to the current window.
    pub fn slice(&self, range: Range<usize>) -> Self {
        let start = (self.window.start + range.start).min(self.window.end);
        let end = (self.window.start + range.end).clamp(start, self.window.end);
        Self {
            record: self.record.clone(),
            lead_index: self.lead_index,
            window: start..end,
        }
    }

    /// Materialize the windowed row.
    pub fn load(&self) -> Result<Vec<f64>> {
        let raw = self.record.load()?;
        let row = raw.samples.get(self.lead_index).ok_or_else(|| {
            EcgError::ShapeMismatch(format!(
                "record {} has no lead {}",
                raw.record_name, self.lead_index
            ))
        })?;
        row.get(self.window.clone())
            .map(<[f64]>::to_vec)
            .ok_or_else(|| {
                EcgError::ShapeMismatch(format!(
                    "window {:?} exceeds {} samples of record {}",
                    self.window,
                    row.len(),
                    raw.record_name
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// AnnotationLoader – path → Annotation, parsed once
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AnnotationLoader {
    path: PathBuf,
    parser: Arc<dyn FormatParser>,
}

impl AnnotationLoader {
    pub fn new(path: impl Into<PathBuf>, parser: Arc<dyn FormatParser>) -> Self {
        Self {
            path: path.into(),
            parser,
        }
    }

    pub fn for_file(resolved: &ResolvedFile) -> Self {
        Self::new(resolved.path.clone(), resolved.format.parser())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` inside when the record has no annotation stream.
    pub fn load(&self) -> Result<Arc<Option<Annotation>>> {
        annotation_cache().get_or_load(&self.path, || {
            debug!("reading annotations of {}", self.path.display());
            let events = self.parser.read_annotations(&self.path)?;
            Ok(events.map(|events| {
                events
                    .into_iter()
                    .map(|(index, label)| AnnotationSample::new(index, label))
                    .collect()
            }))
        })
    }
}

impl fmt::Debug for AnnotationLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationLoader")
            .field("path", &self.path)
            .field("format", &self.parser.name())
            .finish()
    }
}

impl PartialEq for AnnotationLoader {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for AnnotationLoader {}

impl Hash for AnnotationLoader {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}
