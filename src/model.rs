use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use ahash::{AHashMap, AHashSet};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::corpus::{IndexReference, IndexedCorpus};
use crate::error::{handle_bincode_error, Error, Result};
use crate::occurrence::{IndexedData, OccurrenceData};
use crate::options::PatternModelOptions;
use crate::pattern::{skip_configurations, Category, Pattern, SKIP, UNKNOWN};
use crate::util::par_bincount;
use crate::vocabulary::ClassCodec;

pub(crate) const MAGIC: &[u8; 4] = b"PGMD";
pub(crate) const UNINDEXED_MODEL: u8 = 10;
pub(crate) const INDEXED_MODEL: u8 = 20;
pub(crate) const FORMAT_VERSION: u8 = 1;

pub type UnindexedPatternModel = PatternModel<u32>;
pub type IndexedPatternModel = PatternModel<IndexedData>;

/// Counts or indexes every pattern of a corpus that reaches the occurrence
/// threshold.
///
/// The model is filled by a single call to [`PatternModel::train`] or
/// [`PatternModel::load`] and is read-only afterwards.
#[derive(Clone, Debug)]
pub struct PatternModel<V: OccurrenceData> {
    data: AHashMap<Pattern, V>,
    /// Iteration order of ordered models.
    order: Option<Vec<Pattern>>,
    /// Patterns starting at each reference; indexed models only.
    reverse_index: BTreeMap<IndexReference, Vec<Pattern>>,
    total_tokens: u64,
    total_types: u64,
    options: PatternModelOptions,
}

/// Per-pattern accumulator used while counting one level.
#[derive(Clone, Debug)]
struct Entry<V> {
    data: V,
    first: IndexReference,
    /// Distinct n-grams a derived skip-gram was built from.
    variety: u32,
}

#[derive(Debug)]
struct Tally<V> {
    table: AHashMap<Pattern, Entry<V>>,
}

impl<V> Default for Tally<V> {
    fn default() -> Self {
        Self {
            table: AHashMap::new(),
        }
    }
}

impl<V: OccurrenceData> Tally<V> {
    fn add(&mut self, pattern: Pattern, r: IndexReference) {
        let entry = self.table.entry(pattern).or_insert_with(|| Entry {
            data: V::default(),
            first: r,
            variety: 0,
        });
        entry.data.add(r);
        entry.first = entry.first.min(r);
    }

    fn add_data(&mut self, pattern: Pattern, data: &V, first: IndexReference) {
        let entry = self.table.entry(pattern).or_insert_with(|| Entry {
            data: V::default(),
            first,
            variety: 0,
        });
        entry.data.merge(data.clone());
        entry.first = entry.first.min(first);
        entry.variety += 1;
    }

    fn merge(mut self, mut other: Self) -> Self {
        if other.table.len() > self.table.len() {
            std::mem::swap(&mut self, &mut other);
        }
        for (pattern, theirs) in other.table {
            match self.table.get_mut(&pattern) {
                Some(ours) => {
                    ours.data.merge(theirs.data);
                    ours.first = ours.first.min(theirs.first);
                    ours.variety += theirs.variety;
                }
                None => {
                    self.table.insert(pattern, theirs);
                }
            }
        }
        self
    }
}

/// Replaces the gap spans of `codes` with skip slots.
fn apply_skips(codes: &[u32], gaps: &[(usize, usize)]) -> Vec<u32> {
    let mut out = codes.to_vec();
    for &(offset, len) in gaps {
        out[offset..offset + len].fill(SKIP);
    }
    out
}

/// Concrete spans left over by the gaps of a skip configuration.
fn parts_of(n: usize, gaps: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut parts = Vec::with_capacity(gaps.len() + 1);
    let mut start = 0;
    for &(offset, len) in gaps {
        parts.push((start, offset - start));
        start = offset + len;
    }
    parts.push((start, n - start));
    parts
}

fn progress_bar(len: u64, verbose: bool) -> ProgressBar {
    if !verbose {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    if let Ok(style) =
        ProgressStyle::with_template("[{elapsed}/{eta}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
    {
        pb.set_style(style);
    }
    pb
}

impl<V: OccurrenceData> PatternModel<V> {
    fn empty(options: PatternModelOptions) -> Self {
        Self {
            data: AHashMap::new(),
            order: None,
            reverse_index: BTreeMap::new(),
            total_tokens: 0,
            total_types: 0,
            options,
        }
    }

    /// Trains a model over a corpus.
    ///
    /// Patterns are mined level by level, from length 1 up to `max_length`.
    /// Sentences of one level are scanned in parallel and their tallies are
    /// merged before the level is pruned. With `min_tokens > 1`, an n-gram is
    /// only counted when both of its (n-1)-grams survived the previous level,
    /// so the resulting model is downward closed.
    pub fn train(corpus: &IndexedCorpus, options: PatternModelOptions) -> Result<Self> {
        options.validate()?;
        let min_tokens = options.min_tokens;
        let check_parts = min_tokens > 1;
        let exhaustive = options.do_skipgrams_exhaustive;
        let heuristic = options.do_skipgrams && !exhaustive;

        let sentences: Vec<&[u32]> = corpus.sentences().collect();
        let mut model = Self::empty(options.clone());
        model.total_tokens = corpus.len() as u64;
        let mut first_seen: AHashMap<Pattern, IndexReference> = AHashMap::new();

        let pb = progress_bar(options.max_length as u64, options.verbose);
        for n in 1..=options.max_length {
            let configs = if exhaustive {
                skip_configurations(n, options.max_skips)
            } else {
                Vec::new()
            };
            let data = &model.data;
            let has = |codes: &[u32]| data.contains_key(&Pattern::new(codes.iter().copied()));

            let tally = sentences
                .par_iter()
                .enumerate()
                .fold(Tally::<V>::default, |mut tally, (s, codes)| {
                    for (i, window) in codes.windows(n).enumerate() {
                        if window.contains(&UNKNOWN) {
                            continue;
                        }
                        if n > 1 && check_parts && !(has(&window[..n - 1]) && has(&window[1..])) {
                            continue;
                        }
                        let r = IndexReference::new(s as u32, i as u32);
                        tally.add(Pattern::new(window.iter().copied()), r);

                        for gaps in &configs {
                            let supported = !check_parts
                                || parts_of(n, gaps)
                                    .iter()
                                    .all(|&(o, l)| has(&window[o..o + l]));
                            if supported {
                                tally.add(Pattern::new(apply_skips(window, gaps)), r);
                            }
                        }
                    }
                    tally
                })
                .reduce(Tally::default, Tally::merge);

            if n == 1 {
                model.total_types = tally.table.len() as u64;
            }
            let candidates = tally.table.len();
            let mut retained = model.absorb(tally, &mut first_seen, |e| e.data.count() >= min_tokens);

            if heuristic && n >= 3 {
                retained += model.derive_skipgrams(n, &mut first_seen);
            }

            info!(n, candidates, retained, "counted level");
            pb.inc(1);
            pb.set_message(format!("{} patterns", model.data.len()));
            if retained == 0 {
                break;
            }
        }
        pb.finish_and_clear();

        if options.do_flexgrams {
            let flexgrams = model.derive_flexgrams(&mut first_seen);
            info!(flexgrams, "derived flex-grams");
        }

        if options.do_ordered {
            let mut order: Vec<(usize, IndexReference, Pattern)> = first_seen
                .into_iter()
                .map(|(p, r)| (p.len(), r, p))
                .collect();
            order.par_sort_unstable();
            model.order = Some(order.into_iter().map(|(_, _, p)| p).collect());
        }
        model.data.par_iter_mut().for_each(|(_, v)| v.finish());
        model.build_reverse_index();

        info!(
            patterns = model.len(),
            tokens = model.total_tokens,
            types = model.total_types,
            "trained pattern model"
        );
        Ok(model)
    }

    /// Trains a model over an encoded corpus file.
    pub fn train_file<P: AsRef<Path>>(path: P, options: PatternModelOptions) -> Result<Self> {
        let corpus = IndexedCorpus::from_encoded_file(path)?;
        Self::train(&corpus, options)
    }

    /// Moves the tally entries passing `keep` into the model.
    fn absorb<F>(
        &mut self,
        tally: Tally<V>,
        first_seen: &mut AHashMap<Pattern, IndexReference>,
        keep: F,
    ) -> usize
    where
        F: Fn(&Entry<V>) -> bool,
    {
        let mut retained = 0;
        for (pattern, entry) in tally.table {
            if keep(&entry) {
                first_seen.insert(pattern.clone(), entry.first);
                self.data.insert(pattern, entry.data);
                retained += 1;
            }
        }
        retained
    }

    /// Derives skip-grams from the retained n-grams of length `n`. A skip-gram
    /// is kept when it reaches the occurrence threshold and was built from at
    /// least `min_skip_types` distinct n-grams.
    fn derive_skipgrams(
        &mut self,
        n: usize,
        first_seen: &mut AHashMap<Pattern, IndexReference>,
    ) -> usize {
        let configs = skip_configurations(n, self.options.max_skips);
        let tally = {
            let data = &self.data;
            let first = &*first_seen;
            let ngrams: Vec<(&Pattern, &V)> = data
                .iter()
                .filter(|(p, _)| p.len() == n && p.category() == Category::Ngram)
                .collect();
            let tally = ngrams
                .par_iter()
                .fold(Tally::<V>::default, |mut tally, &(pattern, value)| {
                    let codes = pattern.to_codes();
                    let r = first.get(pattern).copied().unwrap_or_default();
                    for gaps in &configs {
                        let supported = parts_of(n, gaps).iter().all(|&(o, l)| {
                            data.contains_key(&Pattern::new(codes[o..o + l].iter().copied()))
                        });
                        if supported {
                            tally.add_data(Pattern::new(apply_skips(&codes, gaps)), value, r);
                        }
                    }
                    tally
                })
                .reduce(Tally::default, Tally::merge);
            tally
        };

        let min_tokens = self.options.min_tokens;
        let min_skip_types = self.options.min_skip_types;
        let candidates = tally.table.len();
        let retained = self.absorb(tally, first_seen, |e| {
            e.data.count() >= min_tokens && e.variety >= min_skip_types
        });
        debug!(n, candidates, retained, "derived skip-grams");
        retained
    }

    /// Collapses every skip-gram into its flex-gram. A flex-gram gathers the
    /// occurrences of all skip-grams collapsing to it; counts of unindexed
    /// models are summed, so an occurrence reached through two skip-grams
    /// counts twice there.
    fn derive_flexgrams(&mut self, first_seen: &mut AHashMap<Pattern, IndexReference>) -> usize {
        let tally = {
            let first = &*first_seen;
            (&*self.data)
                .par_iter()
                .filter(|(p, _)| p.category() == Category::Skipgram)
                .fold(Tally::<V>::default, |mut tally, (pattern, value)| {
                    let r = first.get(pattern).copied().unwrap_or_default();
                    tally.add_data(pattern.to_flexgram(), value, r);
                    tally
                })
                .reduce(Tally::default, Tally::merge)
        };
        self.absorb(tally, first_seen, |_| true)
    }

    fn build_reverse_index(&mut self) {
        self.reverse_index.clear();
        if !V::INDEXED {
            return;
        }
        for (pattern, value) in &self.data {
            for &r in value.references() {
                self.reverse_index.entry(r).or_default().push(pattern.clone());
            }
        }
        self.reverse_index.par_iter_mut().for_each(|(_, patterns)| patterns.sort_unstable());
    }

    pub fn options(&self) -> &PatternModelOptions {
        &self.options
    }

    /// Number of tokens in the training corpus.
    pub fn tokens(&self) -> u64 {
        self.total_tokens
    }

    /// Number of distinct tokens in the training corpus.
    pub fn types(&self) -> u64 {
        self.total_types
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn has(&self, pattern: &Pattern) -> bool {
        self.data.contains_key(pattern)
    }

    pub fn get(&self, pattern: &Pattern) -> Option<&V> {
        self.data.get(pattern)
    }

    /// Number of occurrences, 0 for absent patterns.
    pub fn occurrence_count(&self, pattern: &Pattern) -> u32 {
        self.data.get(pattern).map_or(0, |v| v.count())
    }

    /// Iterates over the patterns, in first-occurrence order for ordered models.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (&Pattern, &V)> + '_> {
        match &self.order {
            Some(order) => Box::new(order.iter().filter_map(|p| self.data.get_key_value(p))),
            None => Box::new(self.data.iter()),
        }
    }

    pub fn min_length(&self) -> usize {
        self.data.keys().map(Pattern::len).min().unwrap_or(0)
    }

    pub fn max_length(&self) -> usize {
        self.data.keys().map(Pattern::len).max().unwrap_or(0)
    }

    fn with_counts<I: IntoIterator<Item = Pattern>>(&self, patterns: I) -> Vec<(Pattern, u32)> {
        let mut out: Vec<(Pattern, u32)> = Vec::new();
        for p in patterns {
            let count = self.occurrence_count(&p);
            if count > 0 && !out.iter().any(|(q, _)| *q == p) {
                out.push((p, count));
            }
        }
        out
    }

    /// Patterns one slot shorter that start or end this pattern.
    pub fn sub_children(&self, pattern: &Pattern) -> Vec<(Pattern, u32)> {
        let n = pattern.len();
        if n < 2 {
            return Vec::new();
        }
        let children = [pattern.slice(0, n - 1), pattern.slice(1, n - 1)];
        self.with_counts(children.into_iter().flatten())
    }

    /// Patterns one slot longer that start or end with this pattern.
    pub fn sub_parents(&self, pattern: &Pattern) -> Vec<(Pattern, u32)> {
        let n = pattern.len();
        let is_parent = |q: &Pattern| {
            q.len() == n + 1
                && (q.slice(0, n).ok().as_ref() == Some(pattern)
                    || q.slice(1, n).ok().as_ref() == Some(pattern))
        };
        let mut parents: Vec<Pattern> = match self.data.get(pattern) {
            Some(value) if V::INDEXED => {
                let mut found = Vec::new();
                for r in value.references() {
                    found.extend(self.patterns_at(*r).filter(|&q| is_parent(q)).cloned());
                    if r.token > 0 {
                        let before = IndexReference::new(r.sentence, r.token - 1);
                        found.extend(self.patterns_at(before).filter(|&q| is_parent(q)).cloned());
                    }
                }
                found
            }
            _ => self.data.keys().filter(|&q| is_parent(q)).cloned().collect(),
        };
        parents.sort_unstable();
        parents.dedup();
        self.with_counts(parents)
    }

    /// Skip-grams of which this pattern is an instance.
    pub fn templates(&self, pattern: &Pattern) -> Vec<(Pattern, u32)> {
        let mut templates: Vec<Pattern> = match self.data.get(pattern) {
            Some(value) if V::INDEXED => value
                .references()
                .iter()
                .flat_map(|r| self.patterns_at(*r))
                .filter(|q| pattern.instance_of(q))
                .cloned()
                .collect(),
            _ => self
                .data
                .keys()
                .filter(|q| pattern.instance_of(q))
                .cloned()
                .collect(),
        };
        templates.sort_unstable();
        templates.dedup();
        self.with_counts(templates)
    }

    /// N-grams of the model matching a skip-gram or flex-gram.
    pub fn instances(&self, template: &Pattern) -> Vec<(Pattern, u32)> {
        let is_instance = |q: &Pattern| q.category() == Category::Ngram && q.instance_of(template);
        let mut instances: Vec<Pattern> = match self.data.get(template) {
            Some(value) if V::INDEXED => value
                .references()
                .iter()
                .flat_map(|r| self.patterns_at(*r))
                .filter(|&q| is_instance(q))
                .cloned()
                .collect(),
            _ => self.data.keys().filter(|&q| is_instance(q)).cloned().collect(),
        };
        instances.sort_unstable();
        instances.dedup();
        self.with_counts(instances)
    }

    fn patterns_at(&self, r: IndexReference) -> impl Iterator<Item = &Pattern> + '_ {
        self.reverse_index.get(&r).into_iter().flatten()
    }

    /// Number of patterns per occurrence count.
    pub fn histogram(&self) -> BTreeMap<u32, usize> {
        let counts: Vec<u32> = self.data.values().map(|v| v.count()).collect();
        par_bincount(&counts)
            .into_iter()
            .enumerate()
            .filter(|&(_, n)| n > 0)
            .map(|(count, n)| (count as u32, n))
            .collect()
    }

    /// Aggregate statistics of the model.
    pub fn report(&self) -> ModelReport {
        let (categories, lengths) = (&*self.data)
            .par_iter()
            .fold(
                || (BTreeMap::<Category, PatternStats>::new(), BTreeMap::<usize, PatternStats>::new()),
                |(mut categories, mut lengths), (pattern, value)| {
                    let count = value.count() as u64;
                    categories.entry(pattern.category()).or_default().add(count);
                    lengths.entry(pattern.len()).or_default().add(count);
                    (categories, lengths)
                },
            )
            .reduce(
                || (BTreeMap::<Category, PatternStats>::new(), BTreeMap::<usize, PatternStats>::new()),
                |(a_cat, a_len), (b_cat, b_len)| {
                    (PatternStats::merge_maps(a_cat, b_cat), PatternStats::merge_maps(a_len, b_len))
                },
            );

        ModelReport {
            indexed: V::INDEXED,
            total_tokens: self.total_tokens,
            total_types: self.total_types,
            patterns: self.len(),
            categories,
            lengths,
            coverage: if V::INDEXED { Some(self.coverage()) } else { None },
        }
    }

    /// Number of distinct corpus tokens covered by at least one pattern.
    /// Always 0 for models without references.
    pub fn coverage(&self) -> u64 {
        let mut covered: AHashSet<IndexReference> = AHashSet::new();
        // flex-grams cover what their skip-grams cover
        for (pattern, value) in self.data.iter().filter(|(p, _)| p.category() != Category::Flexgram) {
            let n = pattern.len() as u32;
            for r in value.references() {
                covered.extend((0..n).map(|k| r.shift(k)));
            }
        }
        covered.len() as u64
    }

    /// Writes one tab separated line per pattern.
    pub fn print<W: Write>(&self, mut writer: W, codec: &ClassCodec) -> Result<()> {
        writeln!(writer, "PATTERN\tCOUNT\tTOKENS\tCOVERAGE\tCATEGORY")?;
        for (pattern, value) in self.iter() {
            let count = value.count() as u64;
            let tokens = count * pattern.len() as u64;
            let coverage = if self.total_tokens > 0 {
                tokens as f64 / self.total_tokens as f64
            } else {
                0.0
            };
            writeln!(
                writer,
                "{}\t{}\t{}\t{:.6}\t{:?}",
                pattern.to_text(codec)?,
                count,
                tokens,
                coverage,
                pattern.category()
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Serializes the model: magic bytes, model type, format version, a
    /// header, then one `(pattern, data)` record per pattern.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        let model_type = if V::INDEXED { INDEXED_MODEL } else { UNINDEXED_MODEL };
        writer.write_all(MAGIC)?;
        writer.write_all(&[model_type, FORMAT_VERSION])?;

        let header = Header {
            options: self.options.clone(),
            total_tokens: self.total_tokens,
            total_types: self.total_types,
            patterns: self.len() as u64,
        };
        bincode::serialize_into(&mut writer, &header).map_err(handle_bincode_error)?;
        for record in self.iter() {
            bincode::serialize_into(&mut writer, &record).map_err(handle_bincode_error)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_to(BufWriter::new(File::create(path)?))?;
        debug!(patterns = self.len(), "wrote pattern model");
        Ok(())
    }

    /// Reads a model written by [`PatternModel::write_to`]. An indexed model
    /// may be read as an unindexed one, but not the other way around.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let model_type = read_preamble(&mut reader)?;
        if model_type == UNINDEXED_MODEL && V::INDEXED {
            return Err(Error::Format(
                "an unindexed model cannot be loaded as an indexed one".into(),
            ));
        }
        let header: Header =
            bincode::deserialize_from(&mut reader).map_err(handle_bincode_error)?;

        let mut options = header.options;
        options.do_reverse_index = V::INDEXED;
        let mut model = Self::empty(options);
        model.total_tokens = header.total_tokens;
        model.total_types = header.total_types;

        let mut order = Vec::new();
        for _ in 0..header.patterns {
            let (pattern, value): (Pattern, V) = if model_type == INDEXED_MODEL && !V::INDEXED {
                let (pattern, value): (Pattern, IndexedData) =
                    bincode::deserialize_from(&mut reader).map_err(handle_bincode_error)?;
                (pattern, V::from_references(value.references().to_vec()))
            } else {
                bincode::deserialize_from(&mut reader).map_err(handle_bincode_error)?
            };
            if model.options.do_ordered {
                order.push(pattern.clone());
            }
            model.data.insert(pattern, value);
        }
        if model.options.do_ordered {
            model.order = Some(order);
        }
        model.build_reverse_index();
        Ok(model)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let model = Self::read_from(BufReader::new(File::open(path)?))?;
        debug!(patterns = model.len(), "loaded pattern model");
        Ok(model)
    }
}

impl PatternModel<IndexedData> {
    /// Occurrence references of a pattern.
    pub fn references(&self, pattern: &Pattern) -> &[IndexReference] {
        self.data.get(pattern).map_or(&[], |v| v.references())
    }

    /// Patterns ending right before an occurrence of `pattern`, with the
    /// number of such co-occurrences.
    pub fn left_neighbours(&self, pattern: &Pattern) -> Vec<(Pattern, u32)> {
        let max_length = self.options.max_length as u32;
        let mut counts: AHashMap<&Pattern, u32> = AHashMap::new();
        for r in self.references(pattern) {
            for start in r.token.saturating_sub(max_length)..r.token {
                let len = (r.token - start) as usize;
                for q in self.patterns_at(IndexReference::new(r.sentence, start)) {
                    if q.len() == len && q.category() != Category::Flexgram {
                        *counts.entry(q).or_insert(0) += 1;
                    }
                }
            }
        }
        sorted_counts(counts)
    }

    /// Patterns starting right after an occurrence of `pattern`, with the
    /// number of such co-occurrences. Empty for flex-grams, whose extent varies.
    pub fn right_neighbours(&self, pattern: &Pattern) -> Vec<(Pattern, u32)> {
        let n = pattern.len() as u32;
        if pattern.category() == Category::Flexgram {
            return Vec::new();
        }
        let mut counts: AHashMap<&Pattern, u32> = AHashMap::new();
        for r in self.references(pattern) {
            for q in self.patterns_at(r.shift(n)) {
                *counts.entry(q).or_insert(0) += 1;
            }
        }
        sorted_counts(counts)
    }

    /// N-grams of the model filling the gaps of a skip-gram, with the number
    /// of occurrences at which they do. The content of a flex-gram is that of
    /// the skip-grams it was collapsed from.
    pub fn skip_content(&self, pattern: &Pattern) -> Vec<(Pattern, u32)> {
        let mut counts: AHashMap<&Pattern, u32> = AHashMap::new();
        match pattern.category() {
            Category::Skipgram => self.count_skip_content(pattern, &mut counts),
            Category::Flexgram => {
                let mut sources: Vec<&Pattern> = self
                    .references(pattern)
                    .iter()
                    .flat_map(|r| self.patterns_at(*r))
                    .filter(|q| q.category() == Category::Skipgram && q.to_flexgram() == *pattern)
                    .collect();
                sources.sort_unstable();
                sources.dedup();
                for skipgram in sources {
                    self.count_skip_content(skipgram, &mut counts);
                }
            }
            Category::Ngram => {}
        }
        sorted_counts(counts)
    }

    fn count_skip_content<'a>(&'a self, skipgram: &Pattern, counts: &mut AHashMap<&'a Pattern, u32>) {
        let gaps = skipgram.gaps();
        for r in self.references(skipgram) {
            for &(offset, len) in &gaps {
                for q in self.patterns_at(r.shift(offset as u32)) {
                    if q.len() == len && q.category() == Category::Ngram {
                        *counts.entry(q).or_insert(0) += 1;
                    }
                }
            }
        }
    }

    /// Patterns occurring in the same sentence as `pattern` without
    /// overlapping any of its occurrences there, with the number of such
    /// occurrences. Flex-grams are left out on both sides.
    pub fn cooccurrences(&self, pattern: &Pattern) -> Vec<(Pattern, u32)> {
        if pattern.category() == Category::Flexgram {
            return Vec::new();
        }
        let mut counts: AHashMap<&Pattern, u32> = AHashMap::new();
        let n = pattern.len() as u32;
        let mut by_sentence: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for r in self.references(pattern) {
            by_sentence.entry(r.sentence).or_default().push(r.token);
        }

        for (sentence, starts) in by_sentence {
            let range = IndexReference::new(sentence, 0)..=IndexReference::new(sentence, u32::MAX);
            for (r, patterns) in self.reverse_index.range(range) {
                for q in patterns.iter().filter(|q| q.category() != Category::Flexgram) {
                    let len = q.len() as u32;
                    if starts.iter().all(|&t| r.token + len <= t || t + n <= r.token) {
                        *counts.entry(q).or_insert(0) += 1;
                    }
                }
            }
        }
        sorted_counts(counts)
    }
}

/// Highest counts first, then pattern order.
fn sorted_counts(counts: AHashMap<&Pattern, u32>) -> Vec<(Pattern, u32)> {
    let mut out: Vec<(Pattern, u32)> = counts.into_iter().map(|(p, c)| (p.clone(), c)).collect();
    out.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

/// Reads and checks the magic bytes and version; returns the model type.
pub(crate) fn read_preamble<R: Read>(reader: &mut R) -> Result<u8> {
    let mut preamble = [0u8; 6];
    reader.read_exact(&mut preamble).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::Format("file too short".into()),
        _ => Error::Io(e),
    })?;
    if &preamble[..4] != MAGIC {
        return Err(Error::Format("not a pattern model file".into()));
    }
    let (model_type, version) = (preamble[4], preamble[5]);
    if model_type != UNINDEXED_MODEL && model_type != INDEXED_MODEL {
        return Err(Error::Format(format!("unknown model type {}", model_type)));
    }
    if version != FORMAT_VERSION {
        return Err(Error::Format(format!(
            "format version {} is not supported (expected {})",
            version, FORMAT_VERSION
        )));
    }
    Ok(model_type)
}

#[derive(Serialize, Deserialize)]
struct Header {
    options: PatternModelOptions,
    total_tokens: u64,
    total_types: u64,
    patterns: u64,
}

/// Number of patterns and their summed occurrences.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PatternStats {
    pub patterns: usize,
    pub occurrences: u64,
}

impl PatternStats {
    fn add(&mut self, count: u64) {
        self.patterns += 1;
        self.occurrences += count;
    }

    fn merge_maps<K: Ord>(mut a: BTreeMap<K, Self>, b: BTreeMap<K, Self>) -> BTreeMap<K, Self> {
        for (k, stats) in b {
            let ours = a.entry(k).or_default();
            ours.patterns += stats.patterns;
            ours.occurrences += stats.occurrences;
        }
        a
    }
}

/// Summary of a model, serializable to JSON.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModelReport {
    pub indexed: bool,
    pub total_tokens: u64,
    pub total_types: u64,
    pub patterns: usize,
    pub categories: BTreeMap<Category, PatternStats>,
    pub lengths: BTreeMap<usize, PatternStats>,
    /// Distinct tokens covered by some pattern; indexed models only.
    pub coverage: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::FLEX;

    fn corpus() -> IndexedCorpus {
        // a b c a b | a b c | c a b
        IndexedCorpus::from_codes(&[4, 5, 6, 4, 5, 0, 4, 5, 6, 0, 6, 4, 5, 0]).unwrap()
    }

    fn p(codes: &[u32]) -> Pattern {
        Pattern::new(codes.iter().copied())
    }

    #[test]
    fn test_unpruned_counts() {
        let model = UnindexedPatternModel::train(
            &corpus(),
            PatternModelOptions { max_length: 2, ..Default::default() },
        )
        .unwrap();
        assert_eq!(model.tokens(), 11);
        assert_eq!(model.types(), 3);
        assert_eq!(model.occurrence_count(&p(&[4, 5])), 4);
        assert_eq!(model.occurrence_count(&p(&[5, 6])), 2);
        assert_eq!(model.occurrence_count(&p(&[6, 4])), 2);
        assert_eq!(model.occurrence_count(&p(&[4, 5, 6])), 0);
        assert_eq!(model.len(), 6);
    }

    #[test]
    fn test_threshold() {
        let options = PatternModelOptions { min_tokens: 3, ..Default::default() };
        let model = UnindexedPatternModel::train(&corpus(), options).unwrap();
        // a b is the only bigram occurring three times or more
        assert_eq!(model.len(), 4);
        assert!(model.has(&p(&[4, 5])));
        assert!(model.iter().all(|(_, &c)| c >= 3));
    }

    #[test]
    fn test_invalid_options() {
        let options = PatternModelOptions { min_tokens: 0, ..Default::default() };
        assert!(matches!(
            UnindexedPatternModel::train(&corpus(), options),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_indexed_references() {
        let model = IndexedPatternModel::train(&corpus(), PatternModelOptions::default()).unwrap();
        assert_eq!(
            model.references(&p(&[5, 6])),
            &[IndexReference::new(0, 1), IndexReference::new(1, 1)]
        );
        assert_eq!(model.right_neighbours(&p(&[4, 5]))[0], (p(&[6]), 2));
        assert_eq!(model.coverage(), 11);
    }

    #[test]
    fn test_ordered_iteration() {
        let options = PatternModelOptions { do_ordered: true, max_length: 2, ..Default::default() };
        let model = UnindexedPatternModel::train(&corpus(), options).unwrap();
        let order: Vec<Pattern> = model.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(
            order,
            vec![p(&[4]), p(&[5]), p(&[6]), p(&[4, 5]), p(&[5, 6]), p(&[6, 4])]
        );
    }

    #[test]
    fn test_heuristic_skipgrams_need_variety() {
        // x a y | x b y | x a y
        let corpus = IndexedCorpus::from_codes(&[4, 5, 6, 0, 4, 7, 6, 0, 4, 5, 6, 0]).unwrap();
        let options = PatternModelOptions { do_skipgrams: true, ..Default::default() };
        let model = IndexedPatternModel::train(&corpus, options.clone()).unwrap();
        assert_eq!(model.occurrence_count(&p(&[4, SKIP, 6])), 3);
        assert_eq!(
            model.skip_content(&p(&[4, SKIP, 6])),
            vec![(p(&[5]), 2), (p(&[7]), 1)]
        );

        let strict = PatternModelOptions { min_skip_types: 3, ..options };
        let model = IndexedPatternModel::train(&corpus, strict).unwrap();
        assert!(!model.has(&p(&[4, SKIP, 6])));
    }

    #[test]
    fn test_flexgrams() {
        // x a y | x b y | x a y
        let corpus = IndexedCorpus::from_codes(&[4, 5, 6, 0, 4, 7, 6, 0, 4, 5, 6, 0]).unwrap();
        let options = PatternModelOptions {
            do_skipgrams: true,
            do_flexgrams: true,
            ..Default::default()
        };
        let model = IndexedPatternModel::train(&corpus, options.clone()).unwrap();
        let flex = p(&[4, FLEX, 6]);
        assert_eq!(model.len(), 12);
        assert_eq!(model.occurrence_count(&flex), 3);
        assert_eq!(model.skip_content(&flex), vec![(p(&[5]), 2), (p(&[7]), 1)]);
        assert_eq!(
            model.instances(&flex),
            vec![(p(&[4, 5, 6]), 2), (p(&[4, 7, 6]), 1)]
        );
        assert_eq!(model.coverage(), 9);

        let unindexed = UnindexedPatternModel::train(&corpus, options).unwrap();
        assert_eq!(unindexed.len(), 12);
        assert_eq!(unindexed.occurrence_count(&flex), 3);
        assert_eq!(unindexed.instances(&flex), model.instances(&flex));
    }

    #[test]
    fn test_corrupt_pattern_record() {
        let mut buf = MAGIC.to_vec();
        buf.extend([UNINDEXED_MODEL, FORMAT_VERSION]);
        let header = Header {
            options: PatternModelOptions::default(),
            total_tokens: 1,
            total_types: 1,
            patterns: 1,
        };
        bincode::serialize_into(&mut buf, &header).unwrap();
        bincode::serialize_into(&mut buf, &(vec![0x80u8; 6], 1u32)).unwrap();
        assert!(matches!(
            UnindexedPatternModel::read_from(buf.as_slice()),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_preamble() {
        let model = UnindexedPatternModel::train(&corpus(), PatternModelOptions::default()).unwrap();
        let mut buf = Vec::new();
        model.write_to(&mut buf).unwrap();
        assert_eq!(&buf[..4], MAGIC);
        assert_eq!(buf[4], UNINDEXED_MODEL);

        let mut bad = buf.clone();
        bad[5] = 99;
        assert!(matches!(UnindexedPatternModel::read_from(bad.as_slice()), Err(Error::Format(_))));
        assert!(matches!(
            IndexedPatternModel::read_from(buf.as_slice()),
            Err(Error::Format(_))
        ));
        assert!(matches!(
            UnindexedPatternModel::read_from(&buf[..buf.len() - 1]),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn test_histogram() {
        let model = UnindexedPatternModel::train(
            &corpus(),
            PatternModelOptions { max_length: 1, ..Default::default() },
        )
        .unwrap();
        // a: 4, b: 4, c: 3
        assert_eq!(model.histogram(), BTreeMap::from([(3, 1), (4, 2)]));
    }
}
