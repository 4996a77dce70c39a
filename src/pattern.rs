use std::fmt::{self, Debug, Formatter};
use std::ops::Add;

use serde::{Deserialize, Serialize};

use crate::error::{syntax_error, Error, Result};
use crate::vocabulary::ClassCodec;

/// Sentence boundary marker.
pub const BOUNDARY: u32 = 0;
/// Out-of-vocabulary token.
pub const UNKNOWN: u32 = 1;
/// One slot of a fixed-length gap. A gap of arity K is K consecutive skip slots.
pub const SKIP: u32 = 2;
/// A gap matching one or more tokens.
pub const FLEX: u32 = 3;
/// The first code handed out to a token class.
pub const FIRST_CLASS: u32 = 4;

/// Kind of a pattern, derived from its gap structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Ngram,
    Skipgram,
    Flexgram,
}

#[inline]
pub fn is_gap(code: u32) -> bool {
    code == SKIP || code == FLEX
}

/// An immutable sequence of class codes, possibly containing gaps.
///
/// Codes are stored as unsigned LEB128 varints, so frequent classes (low codes)
/// take a single byte. Equality, hashing and ordering work directly on the
/// encoded bytes.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct Pattern {
    data: Box<[u8]>,
}

fn push_code(buf: &mut Vec<u8>, mut code: u32) {
    while code >= 0x80 {
        buf.push((code & 0x7f) as u8 | 0x80);
        code >>= 7;
    }
    buf.push(code as u8);
}

impl Pattern {
    pub fn new<I: IntoIterator<Item = u32>>(codes: I) -> Self {
        let mut buf = Vec::new();
        for code in codes {
            push_code(&mut buf, code);
        }
        Pattern { data: buf.into() }
    }

    /// Wraps an already encoded buffer, checking that it holds whole varints.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut run = 0;
        for &b in bytes {
            run += 1;
            // the fifth byte of a varint carries the top four bits
            if run > 5 || (run == 5 && b > 0x0f) {
                return Err(Error::Format("pattern code overflows 32 bits".into()));
            }
            if b < 0x80 {
                run = 0;
            }
        }
        if run != 0 {
            return Err(Error::Format("truncated pattern encoding".into()));
        }
        Ok(Pattern { data: bytes.into() })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Iterates over the codes of the pattern.
    pub fn codes(&self) -> Codes<'_> {
        Codes { bytes: &self.data }
    }

    pub fn to_codes(&self) -> Vec<u32> {
        self.codes().collect()
    }

    /// Number of slots. Each skip slot and each flexible gap counts as one.
    pub fn len(&self) -> usize {
        self.data.iter().filter(|&&b| b < 0x80).count()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Size of the binary encoding in bytes.
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn category(&self) -> Category {
        let mut category = Category::Ngram;
        for code in self.codes() {
            match code {
                FLEX => return Category::Flexgram,
                SKIP => category = Category::Skipgram,
                _ => {}
            }
        }
        category
    }

    /// Gaps as `(offset, length)` pairs. A flexible gap has length 0.
    pub fn gaps(&self) -> Vec<(usize, usize)> {
        let mut gaps = Vec::new();
        let mut run: Option<usize> = None;
        for (i, code) in self.codes().enumerate() {
            if code != SKIP {
                if let Some(start) = run.take() {
                    gaps.push((start, i - start));
                }
            }
            match code {
                SKIP if run.is_none() => run = Some(i),
                FLEX => gaps.push((i, 0)),
                _ => {}
            }
        }
        if let Some(start) = run {
            gaps.push((start, self.len() - start));
        }
        gaps
    }

    /// Number of gaps.
    pub fn skip_count(&self) -> usize {
        self.gaps().len()
    }

    /// Concrete runs between gaps as `(offset, length)` pairs.
    pub fn part_offsets(&self) -> Vec<(usize, usize)> {
        let mut parts = Vec::new();
        let mut start = None;
        let mut n = 0;
        for (i, code) in self.codes().enumerate() {
            n = i + 1;
            match (is_gap(code), start) {
                (true, Some(s)) => {
                    parts.push((s, i - s));
                    start = None;
                }
                (false, None) => start = Some(i),
                _ => {}
            }
        }
        if let Some(s) = start {
            parts.push((s, n - s));
        }
        parts
    }

    pub fn parts(&self) -> Vec<Pattern> {
        let codes = self.to_codes();
        self.part_offsets()
            .into_iter()
            .map(|(offset, len)| Pattern::new(codes[offset..offset + len].iter().copied()))
            .collect()
    }

    /// Returns `len` slots starting at slot `start`.
    pub fn slice(&self, start: usize, len: usize) -> Result<Pattern> {
        let size = self.len();
        match start.checked_add(len) {
            Some(end) if end <= size => {
                Ok(Pattern::new(self.codes().skip(start).take(len)))
            }
            _ => Err(Error::Range(format!(
                "slice {}+{} of a pattern of length {}",
                start, len, size
            ))),
        }
    }

    /// Every contiguous sub-pattern shorter than the pattern itself, by
    /// ascending length and then ascending offset.
    pub fn subpatterns(&self) -> Subpatterns {
        Subpatterns {
            codes: self.to_codes(),
            len: 1,
            offset: 0,
        }
    }

    /// Slot offset of the first occurrence of `other`. Gap slots only match
    /// identical gap slots.
    pub fn find(&self, other: &Pattern) -> Option<usize> {
        if other.is_empty() {
            return None;
        }
        let haystack = self.to_codes();
        let needle = other.to_codes();
        haystack.windows(needle.len()).position(|w| w == needle.as_slice())
    }

    pub fn contains(&self, other: &Pattern) -> bool {
        self.find(other).is_some()
    }

    /// Literal juxtaposition of both code sequences.
    pub fn concat(&self, other: &Pattern) -> Pattern {
        let mut buf = Vec::with_capacity(self.data.len() + other.data.len());
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&other.data);
        Pattern { data: buf.into() }
    }

    /// Replaces every run of skip slots by a single flexible gap.
    pub fn to_flexgram(&self) -> Pattern {
        let mut prev = None;
        let codes = self.codes().filter_map(|code| {
            let out = match (code, prev) {
                (SKIP, Some(SKIP)) => None,
                (SKIP, _) => Some(FLEX),
                _ => Some(code),
            };
            prev = Some(code);
            out
        });
        Pattern::new(codes.collect::<Vec<_>>())
    }

    /// True when `template` is a skip-gram or flex-gram that matches the whole
    /// of this pattern. Skip slots match any one slot, flexible gaps one or more.
    pub fn instance_of(&self, template: &Pattern) -> bool {
        if template.category() == Category::Ngram || template == self {
            return false;
        }
        matches_whole(&template.to_codes(), &self.to_codes())
    }

    /// Replaces the given `(offset, length)` spans with skip slots.
    pub fn with_skips(&self, gaps: &[(usize, usize)]) -> Result<Pattern> {
        let mut codes = self.to_codes();
        for &(offset, len) in gaps {
            if offset + len > codes.len() {
                return Err(Error::Range(format!(
                    "gap {}+{} in a pattern of length {}",
                    offset,
                    len,
                    codes.len()
                )));
            }
            codes[offset..offset + len].fill(SKIP);
        }
        Ok(Pattern::new(codes))
    }

    /// Parses whitespace separated tokens. `{*}` is a flexible gap, `{?}` a
    /// single skip slot and `{*K*}` a gap of K slots.
    pub fn from_text(text: &str, codec: &ClassCodec) -> Result<Pattern> {
        let mut codes = Vec::new();
        for token in text.split_whitespace() {
            match token {
                "{*}" => codes.push(FLEX),
                "{?}" => codes.push(SKIP),
                _ if token.starts_with("{*") || token.starts_with("{?") => {
                    let arity = token
                        .strip_prefix("{*")
                        .and_then(|t| t.strip_suffix("*}"))
                        .ok_or_else(|| syntax_error(token, "unterminated gap"))?;
                    let arity: usize = arity
                        .parse()
                        .map_err(|_| syntax_error(token, "gap arity is not a number"))?;
                    if arity == 0 {
                        return Err(syntax_error(token, "gap arity must be positive"));
                    }
                    codes.extend(std::iter::repeat(SKIP).take(arity));
                }
                _ => codes.push(codec.encode_token(token)),
            }
        }
        Ok(Pattern::new(codes))
    }

    /// Renders the pattern with the gap notation accepted by [`Pattern::from_text`].
    pub fn to_text(&self, codec: &ClassCodec) -> Result<String> {
        let codes = self.to_codes();
        let mut words: Vec<String> = Vec::with_capacity(codes.len());
        let mut i = 0;
        while i < codes.len() {
            match codes[i] {
                SKIP => {
                    let run = codes[i..].iter().take_while(|&&c| c == SKIP).count();
                    words.push(format!("{{*{}*}}", run));
                    i += run;
                    continue;
                }
                FLEX => words.push("{*}".to_string()),
                code => words.push(codec.decode_token(code)?.to_string()),
            }
            i += 1;
        }
        Ok(words.join(" "))
    }

    /// Length of the shortest match of this pattern at the start of `text`.
    /// Skip slots match any single token; a flexible gap matches one or more.
    pub fn match_prefix(&self, text: &[u32]) -> Option<usize> {
        match_codes(&self.to_codes(), text)
    }
}

/// See [`Pattern::match_prefix`].
pub(crate) fn match_codes(pattern: &[u32], text: &[u32]) -> Option<usize> {
    let (&head, rest) = match pattern.split_first() {
        Some(split) => split,
        None => return Some(0),
    };
    match head {
        FLEX => (1..=text.len()).find_map(|skip| Some(skip + match_codes(rest, &text[skip..])?)),
        _ => {
            let (&token, tail) = text.split_first()?;
            if head == SKIP || head == token {
                Some(1 + match_codes(rest, tail)?)
            } else {
                None
            }
        }
    }
}

/// True when `pattern` matches all of `text`, see [`Pattern::instance_of`].
fn matches_whole(pattern: &[u32], text: &[u32]) -> bool {
    let (&head, rest) = match pattern.split_first() {
        Some(split) => split,
        None => return text.is_empty(),
    };
    match head {
        FLEX => (1..=text.len()).any(|skip| matches_whole(rest, &text[skip..])),
        _ => match text.split_first() {
            Some((&token, tail)) => (head == SKIP || head == token) && matches_whole(rest, tail),
            None => false,
        },
    }
}

impl TryFrom<Vec<u8>> for Pattern {
    type Error = Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        Pattern::from_bytes(&bytes)
    }
}

impl From<Pattern> for Vec<u8> {
    fn from(pattern: Pattern) -> Vec<u8> {
        pattern.data.into_vec()
    }
}

impl Debug for Pattern {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.to_codes())
    }
}

impl<'a> Add<&'a Pattern> for &'a Pattern {
    type Output = Pattern;

    fn add(self, other: &'a Pattern) -> Pattern {
        self.concat(other)
    }
}

/// Iterator over the codes of a [`Pattern`].
pub struct Codes<'a> {
    bytes: &'a [u8],
}

impl<'a> Iterator for Codes<'a> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let mut code = 0u32;
        let mut shift = 0;
        for (i, &b) in self.bytes.iter().enumerate() {
            code |= ((b & 0x7f) as u32) << shift;
            if b < 0x80 {
                self.bytes = &self.bytes[i + 1..];
                return Some(code);
            }
            shift += 7;
        }
        None
    }
}

/// Lazy enumeration of sub-patterns, see [`Pattern::subpatterns`].
pub struct Subpatterns {
    codes: Vec<u32>,
    len: usize,
    offset: usize,
}

impl Iterator for Subpatterns {
    type Item = Pattern;

    fn next(&mut self) -> Option<Pattern> {
        if self.offset + self.len > self.codes.len() {
            self.len += 1;
            self.offset = 0;
        }
        if self.len >= self.codes.len() {
            return None;
        }
        let sub = Pattern::new(self.codes[self.offset..self.offset + self.len].iter().copied());
        self.offset += 1;
        Some(sub)
    }
}

/// Gap placements for skip-grams of length `n`: every non-empty set of interior
/// slots forming at most `max_skips` runs, as `(offset, length)` spans, in
/// ascending order of the bit mask of covered slots.
pub fn skip_configurations(n: usize, max_skips: usize) -> Vec<Vec<(usize, usize)>> {
    if n < 3 {
        return Vec::new();
    }
    let mut configs = Vec::new();
    place_gaps(1, n - 1, max_skips, &mut Vec::new(), &mut configs);
    configs.sort_by_key(|gaps| gap_mask(gaps));
    configs
}

/// Extends `gaps` with runs placed in `from..end`, at most `budget` more.
fn place_gaps(
    from: usize,
    end: usize,
    budget: usize,
    gaps: &mut Vec<(usize, usize)>,
    configs: &mut Vec<Vec<(usize, usize)>>,
) {
    if budget == 0 {
        return;
    }
    for offset in from..end {
        for len in 1..=end - offset {
            gaps.push((offset, len));
            configs.push(gaps.clone());
            // runs are separated by at least one concrete slot
            place_gaps(offset + len + 1, end, budget - 1, gaps, configs);
            gaps.pop();
        }
    }
}

fn gap_mask(gaps: &[(usize, usize)]) -> u64 {
    gaps.iter()
        .fold(0, |mask, &(offset, len)| mask | (((1u64 << len) - 1) << (offset - 1)))
}
