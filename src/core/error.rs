use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid time range: from {from} is after to {to}")]
    InvalidRange { from: i64, to: i64 },

    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("cannot write value to buffer from the past")]
    WriteFromPast,

    #[error("no data for this metric/level")]
    NoData,

    #[error("data from lower levels does not align")]
    DataDoesNotAlign,

    #[error("invalid aggregation for metric with data from multiple levels")]
    InvalidAggregation,

    #[error("all data in this range is already archived")]
    NoNewData,

    #[error("checkpoint buffers out of chronological order")]
    BackwardsTime,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("resampling error: {0}")]
    Resample(String),

    #[error("{errors} errors while writing checkpoints ({files} files written)")]
    PartialCheckpoint { errors: usize, files: usize },

    #[error("{errors} errors while archiving checkpoints ({files} files archived)")]
    PartialArchive { errors: usize, files: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("binary encoding error: {0}")]
    Binary(#[from] bincode::Error),

    #[error("async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Creates a new decode error
    pub fn decode<S: Into<String>>(msg: S) -> Self {
        Self::Decode(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRange { .. } | Self::UnknownMetric(_) | Self::InvalidAggregation => {
                "query"
            },
            Self::WriteFromPast => "write",
            Self::NoData | Self::DataDoesNotAlign => "read",
            Self::NoNewData
            | Self::BackwardsTime
            | Self::PartialCheckpoint { .. }
            | Self::PartialArchive { .. } => "persistence",
            Self::Decode(_) => "ingest",
            Self::Config(_) => "config",
            Self::Resample(_) => "resample",
            Self::Io(_) => "io",
            Self::Serialization(_) | Self::Binary(_) => "serialization",
            Self::Join(_) => "async",
        }
    }
}
