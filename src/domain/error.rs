// Error taxonomy shared by every layer of the trend engine
use thiserror::Error;

pub type TrendResult<T> = Result<T, TrendError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TrendError {
    /// Network, auth or protocol failure reported by one recorder group.
    #[error("datasource error ({group}): {message}")]
    Source { group: String, message: String },

    /// More than one recorder group failed in the same operation.
    #[error("{} datasource groups failed", .0.len())]
    MultiSource(Vec<TrendError>),

    #[error("invalid mode `{0}`")]
    InvalidMode(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("time span must be set for live and mixed mode")]
    TimeSpanMissing,

    #[error("live frame rate must give an update interval of at least 1 ms (got {0} fps)")]
    FrameRateTooHigh(f64),

    #[error("history lower bound not set or not a number")]
    HistoryMinInvalid,

    #[error("history upper bound not set or not a number")]
    HistoryMaxInvalid,

    #[error("series type `{0}` is not supported")]
    UnsupportedSeriesType(String),

    /// The host has no code for this rejection; it takes 20108, the next
    /// free notification code after the query limit.
    #[error("a history load is already in progress")]
    LoadInProgress,

    #[error("live mode already started")]
    LiveAlreadyRunning,

    #[error("live mode not started")]
    LiveNotRunning,

    #[error("query limit exceeded, not all data could be queried")]
    QueryLimitExceeded,
}

impl TrendError {
    pub fn source(group: impl Into<String>, message: impl Into<String>) -> Self {
        TrendError::Source {
            group: group.into(),
            message: message.into(),
        }
    }

    /// Folds per-group failures into one error: none, the single failure,
    /// or a `MultiSource` aggregate.
    pub fn aggregate(mut errors: Vec<TrendError>) -> Option<TrendError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(TrendError::MultiSource(errors)),
        }
    }

    /// Stable numeric code as understood by operators of the host runtime.
    pub fn code(&self) -> u32 {
        match self {
            TrendError::LiveAlreadyRunning => 10000,
            TrendError::LiveNotRunning => 10001,
            TrendError::UnsupportedSeriesType(_) => 20100,
            TrendError::Source { .. } | TrendError::MultiSource(_) => 20103,
            TrendError::TimeSpanMissing => 20105,
            TrendError::QueryLimitExceeded => 20107,
            TrendError::LoadInProgress => 20108,
            TrendError::Configuration(_) => 30001,
            TrendError::InvalidMode(_) => 30005,
            TrendError::FrameRateTooHigh(_) => 30006,
            TrendError::HistoryMinInvalid => 30101,
            TrendError::HistoryMaxInvalid => 30102,
        }
    }

    /// Blocking errors are shown as an overlay, everything else as a
    /// dismissible notification.
    pub fn is_blocking(&self) -> bool {
        self.code() >= 30000
    }
}
