use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by pipeline stages.
///
/// `Parse` and `Decode` are record-level: stages configured with
/// `abort_on_error = false` log them and keep going. Every other kind is
/// fatal to the stage that hit it.
#[derive(Debug, Error)]
pub enum Error {
    /// Opening a URL through the transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// Reading or writing local bytes failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Opening or enumerating an archive failed.
    #[error("archive error: {0}")]
    Archive(String),

    /// The raw input disagrees with its own format.
    #[error("parse error: {0}")]
    Parse(String),

    /// A well-formed value could not be coerced into the target field.
    #[error("decode error: {0}")]
    Decode(String),

    /// The user-supplied record shape or stage configuration is unusable.
    #[error("schema error: {0}")]
    Schema(String),

    /// The run was aborted.
    #[error("run was aborted")]
    Aborted,

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Whether this error concerns a single record rather than the stage.
    pub fn is_record_level(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Decode(_))
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
