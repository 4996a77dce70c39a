pub mod any_model;
pub mod corpus;
pub mod error;
pub mod loader;
pub mod mmap_slice;
pub mod model;
pub mod occurrence;
pub mod options;
pub mod pattern;
pub mod util;
pub mod vocabulary;

pub use any_model::AnyPatternModel;
pub use corpus::{IndexReference, IndexedCorpus};
pub use error::{Error, Result};
pub use mmap_slice::MmapSlice;
pub use model::{IndexedPatternModel, ModelReport, PatternModel, UnindexedPatternModel};
pub use occurrence::{IndexedData, OccurrenceData};
pub use options::PatternModelOptions;
pub use pattern::{Category, Pattern};
pub use vocabulary::ClassCodec;
