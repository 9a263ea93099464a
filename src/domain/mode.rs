// Rendering modes of a trend
use super::error::TrendError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Streaming only, no backfill.
    Live,
    /// Pinned window loaded once.
    History,
    /// Backfill the window, then stream.
    Mixed,
}

impl Mode {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Mode::Live | Mode::Mixed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::History => "history",
            Mode::Mixed => "mixed",
        }
    }
}

impl FromStr for Mode {
    type Err = TrendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "live" => Ok(Mode::Live),
            "history" => Ok(Mode::History),
            "mixed" => Ok(Mode::Mixed),
            other => Err(TrendError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!("mixed".parse::<Mode>(), Ok(Mode::Mixed));
        assert_eq!(
            "paused".parse::<Mode>(),
            Err(TrendError::InvalidMode("paused".into()))
        );
        assert!(Mode::Live.is_streaming());
        assert!(!Mode::History.is_streaming());
    }
}
