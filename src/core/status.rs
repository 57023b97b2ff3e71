//! Projected status of versioned entities and reviewable events.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::CoreError;

/// Status of one entity revision. Projected from the event log, never
/// stored on the entity record itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Accepted,
    Rejected,
    /// Terminal status for schemas.
    Deprecated,
    /// Terminal status for objects and annotations.
    Deleted,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Accepted => "accepted",
            Status::Rejected => "rejected",
            Status::Deprecated => "deprecated",
            Status::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "pending" => Ok(Status::Pending),
            "accepted" => Ok(Status::Accepted),
            "rejected" => Ok(Status::Rejected),
            "deprecated" => Ok(Status::Deprecated),
            "deleted" => Ok(Status::Deleted),
            other => Err(CoreError::validation(
                "status",
                format!("unknown status `{other}`"),
            )),
        }
    }

    /// Terminal revisions accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Deprecated | Status::Deleted)
    }

    /// A live revision may be referenced, deleted, or deprecated.
    pub fn is_live(self) -> bool {
        matches!(self, Status::Pending | Status::Accepted)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review state of a reviewable event. Terminal once accepted or rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Accepted => "accepted",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        match raw {
            "pending" => Ok(ReviewStatus::Pending),
            "accepted" => Ok(ReviewStatus::Accepted),
            "rejected" => Ok(ReviewStatus::Rejected),
            other => Err(CoreError::validation(
                "status",
                format!("unknown review status `{other}`"),
            )),
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_str() {
        for status in [
            Status::Pending,
            Status::Accepted,
            Status::Rejected,
            Status::Deprecated,
            Status::Deleted,
        ] {
            assert_eq!(Status::parse(status.as_str()).unwrap(), status);
        }
        assert!(Status::parse("bogus").is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(Status::Deleted.is_terminal());
        assert!(Status::Deprecated.is_terminal());
        assert!(!Status::Rejected.is_terminal());
        assert!(Status::Pending.is_live());
        assert!(!Status::Rejected.is_live());
    }
}
