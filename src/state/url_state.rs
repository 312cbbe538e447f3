/// URL state definitions for tracking download progress
use std::fmt;

/// Where a URL stands in its download lifecycle
///
/// Legal transitions: `Unknown -> Pending`, `Pending -> Completed`,
/// `Pending -> Failed`. Nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlState {
    /// Never submitted
    Unknown,

    /// Dispatched; outcome not yet known
    Pending,

    /// Downloaded successfully
    Completed,

    /// Gave up after a terminal error, exhausted retries, or an overflow drop
    Failed,
}

impl UrlState {
    /// Returns true if the tracker has seen this URL
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Returns true if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true if `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: UrlState) -> bool {
        matches!(
            (self, next),
            (Self::Unknown, Self::Pending)
                | (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for UrlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
