use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Write};
use std::path::Path;

use crate::corpus::IndexedCorpus;
use crate::error::Result;
use crate::model::{
    read_preamble, IndexedPatternModel, ModelReport, UnindexedPatternModel, FORMAT_VERSION,
    INDEXED_MODEL, MAGIC,
};
use crate::options::PatternModelOptions;
use crate::pattern::Pattern;
use crate::vocabulary::ClassCodec;

/// A pattern model whose variant is picked at runtime, by the
/// `do_reverse_index` option when training or by the file when loading.
#[derive(Clone, Debug)]
pub enum AnyPatternModel {
    Unindexed(UnindexedPatternModel),
    Indexed(IndexedPatternModel),
}

macro_rules! dispatch {
    ($self:expr, $model:ident => $body:expr) => {
        match $self {
            AnyPatternModel::Unindexed($model) => $body,
            AnyPatternModel::Indexed($model) => $body,
        }
    };
}

impl AnyPatternModel {
    pub fn train(corpus: &IndexedCorpus, options: PatternModelOptions) -> Result<Self> {
        Ok(if options.do_reverse_index {
            Self::Indexed(IndexedPatternModel::train(corpus, options)?)
        } else {
            Self::Unindexed(UnindexedPatternModel::train(corpus, options)?)
        })
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        // The preamble is validated here and replayed for the typed reader.
        let model_type = read_preamble(&mut reader)?;
        let mut preamble = MAGIC.to_vec();
        preamble.extend([model_type, FORMAT_VERSION]);
        let reader = Cursor::new(preamble).chain(reader);
        Ok(if model_type == INDEXED_MODEL {
            Self::Indexed(IndexedPatternModel::read_from(reader)?)
        } else {
            Self::Unindexed(UnindexedPatternModel::read_from(reader)?)
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read_from(BufReader::new(File::open(path)?))
    }

    pub fn as_indexed(&self) -> Option<&IndexedPatternModel> {
        match self {
            Self::Indexed(model) => Some(model),
            Self::Unindexed(_) => None,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.as_indexed().is_some()
    }

    pub fn options(&self) -> &PatternModelOptions {
        dispatch!(self, m => m.options())
    }

    pub fn len(&self) -> usize {
        dispatch!(self, m => m.len())
    }

    pub fn is_empty(&self) -> bool {
        dispatch!(self, m => m.is_empty())
    }

    pub fn tokens(&self) -> u64 {
        dispatch!(self, m => m.tokens())
    }

    pub fn types(&self) -> u64 {
        dispatch!(self, m => m.types())
    }

    pub fn occurrence_count(&self, pattern: &Pattern) -> u32 {
        dispatch!(self, m => m.occurrence_count(pattern))
    }

    pub fn sub_children(&self, pattern: &Pattern) -> Vec<(Pattern, u32)> {
        dispatch!(self, m => m.sub_children(pattern))
    }

    pub fn sub_parents(&self, pattern: &Pattern) -> Vec<(Pattern, u32)> {
        dispatch!(self, m => m.sub_parents(pattern))
    }

    pub fn templates(&self, pattern: &Pattern) -> Vec<(Pattern, u32)> {
        dispatch!(self, m => m.templates(pattern))
    }

    pub fn instances(&self, template: &Pattern) -> Vec<(Pattern, u32)> {
        dispatch!(self, m => m.instances(template))
    }

    pub fn histogram(&self) -> BTreeMap<u32, usize> {
        dispatch!(self, m => m.histogram())
    }

    pub fn report(&self) -> ModelReport {
        dispatch!(self, m => m.report())
    }

    pub fn print<W: Write>(&self, writer: W, codec: &ClassCodec) -> Result<()> {
        dispatch!(self, m => m.print(writer, codec))
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        dispatch!(self, m => m.write_to(writer))
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        dispatch!(self, m => m.write(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_variant_follows_file() {
        let corpus = IndexedCorpus::from_codes(&[4, 5, 4, 5, 0, 4, 6, 0]).unwrap();
        let options = PatternModelOptions { do_reverse_index: true, ..Default::default() };
        let model = AnyPatternModel::train(&corpus, options).unwrap();
        assert!(model.is_indexed());

        let mut buf = Vec::new();
        model.write_to(&mut buf).unwrap();
        let loaded = AnyPatternModel::read_from(buf.as_slice()).unwrap();
        assert!(loaded.is_indexed());
        assert_eq!(loaded.len(), model.len());
        assert_eq!(loaded.occurrence_count(&Pattern::new([4, 5])), 2);
    }

    #[test]
    fn test_reject_garbage() {
        assert!(matches!(
            AnyPatternModel::read_from(&b"nope"[..]),
            Err(Error::Format(_))
        ));
    }
}
