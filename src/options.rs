use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest pattern for which skip-grams can be generated.
pub const MAX_SKIPGRAM_LENGTH: usize = 32;

/// Training configuration of a pattern model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternModelOptions {
    /// Patterns occurring fewer times are pruned.
    pub min_tokens: u32,
    /// Maximum pattern length in slots.
    pub max_length: usize,
    /// Keep the occurrence references of every pattern.
    pub do_reverse_index: bool,
    /// Derive skip-grams from the retained n-grams.
    pub do_skipgrams: bool,
    /// Count skip-grams at every n-gram occurrence instead.
    pub do_skipgrams_exhaustive: bool,
    /// Distinct gap fillers a derived skip-gram needs.
    pub min_skip_types: u32,
    /// Maximum number of gaps in a skip-gram.
    pub max_skips: usize,
    /// Collapse the trained skip-grams into flex-grams.
    pub do_flexgrams: bool,
    /// Iterate in first-occurrence order.
    pub do_ordered: bool,
    #[serde(skip)]
    pub verbose: bool,
}

impl Default for PatternModelOptions {
    fn default() -> Self {
        Self {
            min_tokens: 1,
            max_length: 8,
            do_reverse_index: false,
            do_skipgrams: false,
            do_skipgrams_exhaustive: false,
            min_skip_types: 2,
            max_skips: 3,
            do_flexgrams: false,
            do_ordered: false,
            verbose: false,
        }
    }
}

impl PatternModelOptions {
    pub fn skipgrams_enabled(&self) -> bool {
        self.do_skipgrams || self.do_skipgrams_exhaustive
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_tokens < 1 {
            return Err(Error::Config("min_tokens must be at least 1".into()));
        }
        if self.max_length < 1 {
            return Err(Error::Config("max_length must be at least 1".into()));
        }
        if self.do_flexgrams && !self.skipgrams_enabled() {
            return Err(Error::Config("flex-grams are built from skip-grams".into()));
        }
        if self.skipgrams_enabled() {
            if self.max_skips < 1 {
                return Err(Error::Config("max_skips must be at least 1".into()));
            }
            if self.max_length > MAX_SKIPGRAM_LENGTH {
                return Err(Error::Config(format!(
                    "max_length may not exceed {} with skip-grams",
                    MAX_SKIPGRAM_LENGTH
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(PatternModelOptions::default().validate().is_ok());

        let bad = [
            PatternModelOptions { min_tokens: 0, ..Default::default() },
            PatternModelOptions { max_length: 0, ..Default::default() },
            PatternModelOptions { do_skipgrams: true, max_skips: 0, ..Default::default() },
            PatternModelOptions { do_skipgrams_exhaustive: true, max_length: 40, ..Default::default() },
            PatternModelOptions { do_flexgrams: true, ..Default::default() },
        ];
        for options in bad {
            assert!(matches!(options.validate(), Err(Error::Config(_))));
        }

        let long = PatternModelOptions { max_length: 40, ..Default::default() };
        assert!(long.validate().is_ok());
    }

    #[test]
    fn test_json_defaults() {
        let options: PatternModelOptions =
            serde_json::from_str(r#"{"min_tokens": 2, "do_skipgrams": true}"#).unwrap();
        assert_eq!(options.min_tokens, 2);
        assert_eq!(options.max_length, 8);
        assert!(options.skipgrams_enabled());
    }
}
