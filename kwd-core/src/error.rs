use thiserror::Error;

/// All errors produced by kwd-core.
#[derive(Debug, Error)]
pub enum KwdError {
    #[error("hardware controller initialization failed: {0}")]
    ControllerInit(String),

    #[error("hardware transport error: {0}")]
    Transport(String),

    #[error("malformed detection payload: {0}")]
    Decode(String),

    #[error("failed to create stream reader: {0}")]
    StreamReader(String),

    #[error("stream seek failed: {0}")]
    Seek(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KwdError {
    /// `true` for failures the detection loop treats as "no detection this
    /// iteration" rather than a transport fault.
    pub fn is_decode(&self) -> bool {
        matches!(self, KwdError::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, KwdError>;
