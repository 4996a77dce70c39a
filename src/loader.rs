use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use flate2::read::MultiGzDecoder;
use zstd::stream::read::Decoder;

use crate::error::Result;

/// File formats supported for plain-text corpora.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextFileFormat {
    Plain,
    Gzip,
    Zstd,
}

impl TextFileFormat {
    /// Guesses the format from the file extension.
    pub fn detect<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("gz") => Self::Gzip,
            Some("zst") => Self::Zstd,
            _ => Self::Plain,
        }
    }
}

impl FromStr for TextFileFormat {
    type Err = &'static str;

    fn from_str(fmt: &str) -> std::result::Result<Self, Self::Err> {
        match fmt {
            "plain" => Ok(Self::Plain),
            "gzip" => Ok(Self::Gzip),
            "zstd" => Ok(Self::Zstd),
            _ => Err("Invalid format"),
        }
    }
}

/// Opens a corpus file in the given format.
pub fn open_as<P: AsRef<Path>>(path: P, format: TextFileFormat) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    Ok(match format {
        TextFileFormat::Plain => Box::new(BufReader::new(file)),
        TextFileFormat::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        TextFileFormat::Zstd => Box::new(BufReader::new(Decoder::new(file)?)),
    })
}

/// Opens a corpus file, decompressing `.gz` and `.zst` files.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let format = TextFileFormat::detect(&path);
    open_as(path, format)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn test_detect() {
        assert_eq!(TextFileFormat::detect("a/b.txt"), TextFileFormat::Plain);
        assert_eq!(TextFileFormat::detect("b.txt.gz"), TextFileFormat::Gzip);
        assert_eq!(TextFileFormat::detect("b.zst"), TextFileFormat::Zstd);
        assert_eq!("zstd".parse(), Ok(TextFileFormat::Zstd));
    }

    #[test]
    fn test_open_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let text = "to be or not to be\n";

        let gz = dir.path().join("corpus.txt.gz");
        let mut enc = flate2::write::GzEncoder::new(File::create(&gz).unwrap(), flate2::Compression::default());
        enc.write_all(text.as_bytes()).unwrap();
        enc.finish().unwrap();

        let zst = dir.path().join("corpus.txt.zst");
        std::fs::write(&zst, zstd::encode_all(text.as_bytes(), 0).unwrap()).unwrap();

        for path in [gz, zst] {
            let mut out = String::new();
            open(&path).unwrap().read_to_string(&mut out).unwrap();
            assert_eq!(out, text);
        }
    }
}
