pub mod data;
pub mod error;
pub mod formats;

pub use data::{
    Annotation, AnnotationSample, Dataset, Record, RecordTicket, Selector, Sequence, Sex, Signal,
    Sliceable, SubjectInfo, Time,
};
pub use error::{EcgError, Result};
