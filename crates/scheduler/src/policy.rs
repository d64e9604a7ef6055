//! What happens to in-flight work when a new extraction request arrives.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Submission-time policy, applied under the manager's queue lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyPolicy {
    /// Append to the queue; jobs run in submission order.
    #[default]
    Queue,
    /// Cancel running jobs and discard pending ones before enqueueing.
    Replace,
    /// Let running jobs finish but discard pending ones, so at most one waits.
    DropOld,
}

impl ConcurrencyPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queue => "queue",
            Self::Replace => "replace",
            Self::DropOld => "drop_old",
        }
    }

    pub fn cancels_running(self) -> bool {
        matches!(self, Self::Replace)
    }

    pub fn discards_pending(self) -> bool {
        matches!(self, Self::Replace | Self::DropOld)
    }
}

impl fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPolicy(pub String);

impl fmt::Display for UnknownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown concurrency policy '{}' (expected queue, replace or drop_old)", self.0)
    }
}

impl std::error::Error for UnknownPolicy {}

impl FromStr for ConcurrencyPolicy {
    type Err = UnknownPolicy;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "queue" => Ok(Self::Queue),
            "replace" => Ok(Self::Replace),
            "drop_old" => Ok(Self::DropOld),
            _ => Err(UnknownPolicy(value.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_spellings() {
        assert_eq!("queue".parse(), Ok(ConcurrencyPolicy::Queue));
        assert_eq!("Replace".parse(), Ok(ConcurrencyPolicy::Replace));
        assert_eq!("drop-old".parse(), Ok(ConcurrencyPolicy::DropOld));
        assert!("newest".parse::<ConcurrencyPolicy>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ConcurrencyPolicy::DropOld).unwrap();
        assert_eq!(json, "\"drop_old\"");
        let back: ConcurrencyPolicy = serde_json::from_str("\"replace\"").unwrap();
        assert_eq!(back, ConcurrencyPolicy::Replace);
    }

    #[test]
    fn default_is_queue() {
        assert_eq!(ConcurrencyPolicy::default(), ConcurrencyPolicy::Queue);
        assert!(!ConcurrencyPolicy::Queue.discards_pending());
        assert!(ConcurrencyPolicy::DropOld.discards_pending());
        assert!(!ConcurrencyPolicy::DropOld.cancels_running());
    }
}
