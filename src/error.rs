use thiserror::Error;

/// Errors raised by the codec, the corpus and the pattern models.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid training options.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A malformed encoded corpus.
    #[error("malformed corpus: {0}")]
    CorpusFormat(String),

    /// A corrupt or incompatible class or model file.
    #[error("malformed file: {0}")]
    Format(String),

    /// Out-of-bounds pattern slice or corpus reference.
    #[error("out of range: {0}")]
    Range(String),

    #[error("invalid pattern syntax at {token:?}: {reason}")]
    PatternSyntax { token: String, reason: String },

    #[error("input is not valid UTF-8: {0}")]
    Encoding(String),

    #[error("no token registered for class {0}")]
    Decoding(u32),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn handle_bincode_error(e: Box<bincode::ErrorKind>) -> Error {
    match *e {
        bincode::ErrorKind::Io(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
            Error::Format("unexpected end of file".into())
        }
        bincode::ErrorKind::Io(err) => Error::Io(err),
        other => Error::Format(format!("{:?}", other)),
    }
}

pub(crate) fn syntax_error(token: &str, reason: &str) -> Error {
    Error::PatternSyntax {
        token: token.to_string(),
        reason: reason.to_string(),
    }
}
