/// Data layer: the lazily-loaded record model.
///
/// Architecture:
/// ```text
///  .hea / .dat / .atr      .ecg
///        │                  │
///        ▼                  ▼
///   ┌────────────────────────────┐
///   │  formats::FormatParser     │  path → RawRecord, annotation events
///   └────────────────────────────┘
///        │
///        ▼
///   ┌────────────────────────────┐
///   │  loader                    │  LoadCache: one parse per path, shared Arc
///   └────────────────────────────┘
///        │
///        ▼
///   ┌────────────────────────────┐
///   │  record                    │  Time + Signal per lead + Annotation,
///   └────────────────────────────┘  sliced into views over the same loaders
///        │
///        ▼
///   ┌────────────────────────────┐
///   │  dataset                   │  RecordTicket → memoized Record, splits,
///   └────────────────────────────┘  CSV / JSON summaries
/// ```

pub mod annotation;
pub mod dataset;
pub mod loader;
pub mod record;
pub mod rng;
pub mod sequence;
pub mod signal;
pub mod time;

pub use annotation::{Annotation, AnnotationSample};
pub use dataset::{Dataset, RecordTicket};
pub use record::{Record, Sex, SubjectInfo};
pub use sequence::{Selector, Sequence, Sliceable};
pub use signal::Signal;
pub use time::Time;
