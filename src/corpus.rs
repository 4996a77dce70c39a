use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::mmap_slice::MmapSlice;
use crate::pattern::{is_gap, match_codes, Pattern, BOUNDARY};

/// Position of a token: zero-based sentence index and offset within the sentence.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct IndexReference {
    pub sentence: u32,
    pub token: u32,
}

impl IndexReference {
    pub fn new(sentence: u32, token: u32) -> Self {
        Self { sentence, token }
    }

    /// The reference `n` tokens further in the same sentence.
    pub fn shift(&self, n: u32) -> Self {
        Self::new(self.sentence, self.token + n)
    }
}

impl Display for IndexReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sentence, self.token)
    }
}

/// A class-encoded corpus split into sentences.
///
/// Tokens of all sentences are stored back to back without boundary markers;
/// `offsets[i]..offsets[i + 1]` is the span of sentence `i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexedCorpus {
    tokens: Vec<u32>,
    offsets: Vec<usize>,
}

impl IndexedCorpus {
    /// Splits an encoded stream on boundary markers. A final sentence without
    /// a trailing boundary is kept.
    pub fn from_codes(codes: &[u32]) -> Result<Self> {
        let mut tokens = Vec::with_capacity(codes.len());
        let mut offsets = vec![0];
        for (i, &code) in codes.iter().enumerate() {
            if code == BOUNDARY {
                offsets.push(tokens.len());
            } else if is_gap(code) {
                return Err(Error::CorpusFormat(format!(
                    "gap marker {} at position {}",
                    code, i
                )));
            } else {
                tokens.push(code);
            }
        }
        if tokens.len() > offsets[offsets.len() - 1] {
            offsets.push(tokens.len());
        }
        if offsets.len() - 1 > u32::MAX as usize {
            return Err(Error::CorpusFormat("too many sentences".into()));
        }
        Ok(Self { tokens, offsets })
    }

    /// Loads a file of native-endian `u32` codes as written by
    /// [`ClassCodec::encode_file`](crate::ClassCodec::encode_file).
    pub fn from_encoded_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let codes = MmapSlice::<u32>::new(&File::open(path)?).map_err(|e| match e.kind() {
            std::io::ErrorKind::InvalidData => Error::CorpusFormat(e.to_string()),
            _ => Error::Io(e),
        })?;
        let corpus = Self::from_codes(&codes)?;
        debug!(
            sentences = corpus.sentence_count(),
            tokens = corpus.len(),
            "loaded encoded corpus"
        );
        Ok(corpus)
    }

    pub fn sentence_count(&self) -> usize {
        self.offsets.len() - 1
    }

    /// Total number of tokens, boundaries excluded.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn sentence_codes(&self, i: usize) -> Result<&[u32]> {
        if i >= self.sentence_count() {
            return Err(Error::Range(format!(
                "sentence {} of {}",
                i,
                self.sentence_count()
            )));
        }
        Ok(&self.tokens[self.offsets[i]..self.offsets[i + 1]])
    }

    /// The whole sentence as an n-gram.
    pub fn sentence(&self, i: usize) -> Result<Pattern> {
        Ok(Pattern::new(self.sentence_codes(i)?.iter().copied()))
    }

    pub fn sentences(&self) -> impl Iterator<Item = &[u32]> + '_ {
        self.offsets
            .windows(2)
            .map(move |w| &self.tokens[w[0]..w[1]])
    }

    pub fn token_at(&self, r: IndexReference) -> Result<u32> {
        self.sentence_codes(r.sentence as usize)?
            .get(r.token as usize)
            .copied()
            .ok_or_else(|| Error::Range(format!("no token at {}", r)))
    }

    /// The `len` tokens starting at `r`.
    pub fn get_pattern(&self, r: IndexReference, len: usize) -> Result<Pattern> {
        let sentence = self.sentence_codes(r.sentence as usize)?;
        let start = r.token as usize;
        match start.checked_add(len).and_then(|end| sentence.get(start..end)) {
            Some(codes) => Ok(Pattern::new(codes.iter().copied())),
            None => Err(Error::Range(format!("{} tokens at {}", len, r))),
        }
    }

    /// Every token with its reference, in corpus order.
    pub fn iter(&self) -> impl Iterator<Item = (IndexReference, u32)> + '_ {
        self.sentences().enumerate().flat_map(|(s, codes)| {
            codes
                .iter()
                .enumerate()
                .map(move |(t, &code)| (IndexReference::new(s as u32, t as u32), code))
        })
    }

    /// Lazily yields the start of every occurrence of `pattern`, sentence by
    /// sentence. Occurrences never cross sentence boundaries.
    pub fn find_pattern<'a>(&'a self, pattern: &Pattern) -> impl Iterator<Item = IndexReference> + 'a {
        let needle = pattern.to_codes();
        self.sentences().enumerate().flat_map(move |(s, codes)| {
            let needle = needle.clone();
            (0..codes.len()).filter_map(move |t| {
                if needle.is_empty() {
                    return None;
                }
                match_codes(&needle, &codes[t..]).map(|_| IndexReference::new(s as u32, t as u32))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{FLEX, SKIP};

    fn corpus() -> IndexedCorpus {
        // "4 5 6 | 5 6 | | 7"
        IndexedCorpus::from_codes(&[4, 5, 6, 0, 5, 6, 0, 0, 7]).unwrap()
    }

    #[test]
    fn test_sentences() {
        let corpus = corpus();
        assert_eq!(corpus.sentence_count(), 4);
        assert_eq!(corpus.len(), 6);
        assert_eq!(corpus.sentence_codes(2).unwrap(), &[] as &[u32]);
        assert_eq!(corpus.sentence(3).unwrap(), Pattern::new([7]));
        assert!(matches!(corpus.sentence(4), Err(Error::Range(_))));
    }

    #[test]
    fn test_token_at() {
        let corpus = corpus();
        assert_eq!(corpus.token_at(IndexReference::new(1, 1)).unwrap(), 6);
        assert!(matches!(corpus.token_at(IndexReference::new(1, 2)), Err(Error::Range(_))));
        assert!(matches!(corpus.token_at(IndexReference::new(9, 0)), Err(Error::Range(_))));
        assert_eq!(
            corpus.get_pattern(IndexReference::new(0, 1), 2).unwrap(),
            Pattern::new([5, 6])
        );
        assert!(corpus.get_pattern(IndexReference::new(0, 2), 2).is_err());
        assert!(matches!(
            corpus.get_pattern(IndexReference::new(0, 1), usize::MAX),
            Err(Error::Range(_))
        ));
    }

    #[test]
    fn test_iter_matches_len() {
        let corpus = corpus();
        let refs: Vec<_> = corpus.iter().collect();
        assert_eq!(refs.len(), corpus.len());
        assert_eq!(refs[3], (IndexReference::new(1, 0), 5));
        assert_eq!(refs[5], (IndexReference::new(3, 0), 7));
    }

    #[test]
    fn test_find_pattern() {
        let corpus = corpus();
        let found: Vec<_> = corpus.find_pattern(&Pattern::new([5, 6])).collect();
        assert_eq!(found, vec![IndexReference::new(0, 1), IndexReference::new(1, 0)]);

        let found: Vec<_> = corpus.find_pattern(&Pattern::new([4, SKIP, 6])).collect();
        assert_eq!(found, vec![IndexReference::new(0, 0)]);

        let found: Vec<_> = corpus.find_pattern(&Pattern::new([4, FLEX])).collect();
        assert_eq!(found, vec![IndexReference::new(0, 0)]);

        assert_eq!(corpus.find_pattern(&Pattern::new([6, 5])).count(), 0);
    }

    #[test]
    fn test_reject_gaps() {
        assert!(matches!(
            IndexedCorpus::from_codes(&[4, SKIP, 0]),
            Err(Error::CorpusFormat(_))
        ));
    }

    #[test]
    fn test_display_reference() {
        assert_eq!(IndexReference::new(3, 12).to_string(), "3:12");
        assert!(IndexReference::new(0, 9) < IndexReference::new(1, 0));
    }
}
