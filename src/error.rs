pub type ExportResult<T> = Result<T, ExportError>;

/// Every failure is fatal to the export that raised it.
#[derive(thiserror::Error, Debug)]
pub enum ExportError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("container error: {0}")]
    Container(String),

    #[error("probe error: {0}")]
    Probe(String),

    #[error("export cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExportError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }

    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    pub fn container(msg: impl Into<String>) -> Self {
        Self::Container(msg.into())
    }

    pub fn probe(msg: impl Into<String>) -> Self {
        Self::Probe(msg.into())
    }

    /// Maps a wrapper-crate failure into the codec kind, keeping its context chain.
    pub fn from_codec(err: anyhow::Error) -> Self {
        Self::Codec(format!("{:#}", err))
    }

    pub fn from_container(err: anyhow::Error) -> Self {
        Self::Container(format!("{:#}", err))
    }

    pub fn from_probe(err: anyhow::Error) -> Self {
        Self::Probe(format!("{:#}", err))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
