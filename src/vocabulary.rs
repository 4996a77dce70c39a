use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use ahash::AHashMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::loader;
use crate::mmap_slice::MmapSlice;
use crate::pattern::{BOUNDARY, FIRST_CLASS, UNKNOWN};
use crate::util::transmute_slice;

/// Bijection between token strings and class codes.
///
/// Classes are numbered from [`FIRST_CLASS`] upwards by descending corpus
/// frequency; ties keep the order in which tokens were first seen. Codes
/// below [`FIRST_CLASS`] are reserved for the structural markers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassCodec {
    map: AHashMap<String, u32>,
    tokens: Vec<String>,
}

impl ClassCodec {
    /// Creates an empty codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the classes of a pre-tokenized corpus, one sentence per line.
    pub fn build<R: BufRead>(reader: R) -> Result<Self> {
        let mut counter = FrequencyCounter::default();
        counter.update_from(reader)?;
        Ok(counter.into_codec())
    }

    pub fn build_from_str(text: &str) -> Result<Self> {
        Self::build(text.as_bytes())
    }

    /// Builds one codec over several corpus files. Gzip and zstd compressed
    /// files are decompressed on the fly.
    pub fn build_from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut counter = FrequencyCounter::default();
        for path in paths {
            counter.update_from(loader::open(path)?)?;
        }
        Ok(counter.into_codec())
    }

    fn from_tokens(tokens: Vec<String>) -> Result<Self> {
        let mut map = AHashMap::with_capacity(tokens.len());
        for (i, token) in tokens.iter().enumerate() {
            if let Some(v) = map.insert(token.clone(), FIRST_CLASS + i as u32) {
                return Err(Error::Format(format!("Duplicated token: {:?} => {}", token, v)));
            }
        }
        Ok(Self { map, tokens })
    }

    /// Number of token classes, excluding the reserved codes.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Looks up a token.
    pub fn get(&self, token: &str) -> Option<u32> {
        self.map.get(token).copied()
    }

    /// Iterates over `(code, token)` pairs in code order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> + '_ {
        self.tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (FIRST_CLASS + i as u32, t.as_str()))
    }

    /// Class of a token, or [`UNKNOWN`] when it was never seen.
    pub fn encode_token(&self, token: &str) -> u32 {
        self.get(token).unwrap_or(UNKNOWN)
    }

    pub fn encode_line(&self, line: &str) -> Vec<u32> {
        line.split_whitespace().map(|t| self.encode_token(t)).collect()
    }

    /// Encodes a corpus; every line is terminated by [`BOUNDARY`].
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let mut codes = Vec::new();
        for line in text.lines() {
            codes.extend(self.encode_line(line));
            codes.push(BOUNDARY);
        }
        codes
    }

    /// Streams an encoded corpus into `writer` as native-endian `u32`s and
    /// returns the number of codes written.
    pub fn encode_into<R: BufRead, W: Write>(&self, reader: R, mut writer: W) -> Result<usize> {
        let mut written = 0;
        for line in reader.split(b'\n') {
            let line = line?;
            let line = std::str::from_utf8(&line).map_err(|e| Error::Encoding(e.to_string()))?;
            let mut codes = self.encode_line(line);
            codes.push(BOUNDARY);
            writer.write_all(transmute_slice::<u32, u8>(&codes))?;
            written += codes.len();
        }
        writer.flush()?;
        Ok(written)
    }

    /// Encodes a (possibly compressed) text file into an encoded corpus file.
    pub fn encode_file<P: AsRef<Path>, Q: AsRef<Path>>(&self, input: P, output: Q) -> Result<usize> {
        let writer = BufWriter::new(File::create(output)?);
        let written = self.encode_into(loader::open(input)?, writer)?;
        debug!(codes = written, "encoded corpus");
        Ok(written)
    }

    /// Token of a class. [`UNKNOWN`] renders as `{UNKNOWN}`.
    pub fn decode_token(&self, code: u32) -> Result<&str> {
        if code == UNKNOWN {
            return Ok("{UNKNOWN}");
        }
        code.checked_sub(FIRST_CLASS)
            .and_then(|i| self.tokens.get(i as usize))
            .map(String::as_str)
            .ok_or(Error::Decoding(code))
    }

    /// Inverse of [`ClassCodec::encode`]: boundaries become newlines.
    pub fn decode(&self, codes: &[u32]) -> Result<String> {
        let mut text = String::new();
        let mut line_start = true;
        for &code in codes {
            if code == BOUNDARY {
                text.push('\n');
                line_start = true;
                continue;
            }
            if !line_start {
                text.push(' ');
            }
            text.push_str(self.decode_token(code)?);
            line_start = false;
        }
        Ok(text)
    }

    pub fn decode_file<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        let codes = MmapSlice::<u32>::new(&File::open(path)?)
            .map_err(|e| Error::CorpusFormat(e.to_string()))?;
        self.decode(&codes)
    }

    /// Writes the class file: one `CODE<TAB>TOKEN` line per class.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        for (code, token) in self.iter() {
            writeln!(writer, "{}\t{}", code, token)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_to(BufWriter::new(File::create(path)?))
    }

    /// Reads a class file written by [`ClassCodec::write_to`].
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut entries: Vec<(u32, String)> = Vec::new();
        for (lineno, line) in BufReader::new(reader).lines().enumerate() {
            let line = line.map_err(|e| match e.kind() {
                std::io::ErrorKind::InvalidData => Error::Encoding(e.to_string()),
                _ => Error::Io(e),
            })?;
            if line.is_empty() {
                continue;
            }
            let (code, token) = line
                .split_once('\t')
                .ok_or_else(|| Error::Format(format!("line {}: missing tab", lineno + 1)))?;
            let code: u32 = code
                .parse()
                .map_err(|_| Error::Format(format!("line {}: bad class {:?}", lineno + 1, code)))?;
            if code < FIRST_CLASS || token.is_empty() || token.contains(char::is_whitespace) {
                return Err(Error::Format(format!("line {}: invalid class entry", lineno + 1)));
            }
            entries.push((code, token.to_string()));
        }
        entries.sort_unstable_by_key(|(code, _)| *code);

        let mut tokens = Vec::with_capacity(entries.len());
        for (i, (code, token)) in entries.into_iter().enumerate() {
            if code != FIRST_CLASS + i as u32 {
                return Err(Error::Format(format!("classes are not dense at {}", code)));
            }
            tokens.push(token);
        }
        Self::from_tokens(tokens)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read_from(File::open(path)?)
    }
}

/// Token frequencies in first-seen order.
#[derive(Default)]
struct FrequencyCounter {
    index: AHashMap<String, usize>,
    counts: Vec<(String, u64)>,
}

impl FrequencyCounter {
    fn update_from<R: BufRead>(&mut self, reader: R) -> Result<()> {
        for line in reader.split(b'\n') {
            let line = line?;
            let line = std::str::from_utf8(&line).map_err(|e| Error::Encoding(e.to_string()))?;
            for token in line.split_whitespace() {
                match self.index.get(token) {
                    Some(&i) => self.counts[i].1 += 1,
                    None => {
                        self.index.insert(token.to_string(), self.counts.len());
                        self.counts.push((token.to_string(), 1));
                    }
                }
            }
        }
        Ok(())
    }

    fn into_codec(mut self) -> ClassCodec {
        // Stable sort keeps first-seen order among equal counts.
        self.counts.sort_by(|a, b| b.1.cmp(&a.1));
        let tokens: Vec<String> = self.counts.into_iter().map(|(t, _)| t).collect();
        let map = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), FIRST_CLASS + i as u32))
            .collect();
        debug!(classes = tokens.len(), "built class codec");
        ClassCodec { map, tokens }
    }
}
