//! Human-readable health of the overlay, one entry per category

use std::fmt;

use fxhash::FxHashMap;
use serde::Serialize;

use crate::core::constants::{ERROR_RATE_ERROR_THRESHOLD, ERROR_RATE_WARN_THRESHOLD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum StatusLevel {
    Ok,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum StatusCategory {
    /// Subscription to the position fix topic
    Topic,
    /// Reception of position fixes
    Message,
    /// Tile server connectivity
    TileRequest,
    Transform,
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCategory::Topic => "Topic",
            StatusCategory::Message => "Message",
            StatusCategory::TileRequest => "TileRequest",
            StatusCategory::Transform => "Transform",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub level: StatusLevel,
    pub message: String,
}

/// Map a tile source's error rate to a tile request status
pub fn status_for_error_rate(error_rate: f64) -> Status {
    if error_rate > ERROR_RATE_ERROR_THRESHOLD {
        Status {
            level: StatusLevel::Error,
            message: "Few or no tiles received".to_string(),
        }
    } else if error_rate > ERROR_RATE_WARN_THRESHOLD {
        Status {
            level: StatusLevel::Warning,
            message: "Not all requested tiles have been received. Possibly the server is throttling?"
                .to_string(),
        }
    } else {
        Status {
            level: StatusLevel::Ok,
            message: "OK".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    entries: FxHashMap<StatusCategory, Status>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the status of `category`. Returns true if it changed.
    pub fn set(&mut self, category: StatusCategory, level: StatusLevel, message: impl Into<String>) -> bool {
        self.put(
            category,
            Status {
                level,
                message: message.into(),
            },
        )
    }

    pub fn put(&mut self, category: StatusCategory, status: Status) -> bool {
        if self.entries.get(&category) == Some(&status) {
            return false;
        }
        match status.level {
            StatusLevel::Ok => log::debug!("{}: {}", category, status.message),
            StatusLevel::Warning => log::warn!("{}: {}", category, status.message),
            StatusLevel::Error => log::error!("{}: {}", category, status.message),
        }
        self.entries.insert(category, status);
        true
    }

    pub fn get(&self, category: StatusCategory) -> Option<&Status> {
        self.entries.get(&category)
    }

    pub fn level(&self, category: StatusCategory) -> Option<StatusLevel> {
        self.get(category).map(|status| status.level)
    }

    pub fn remove(&mut self, category: StatusCategory) -> Option<Status> {
        self.entries.remove(&category)
    }

    /// The most severe level on the board, Ok when empty
    pub fn worst(&self) -> StatusLevel {
        self.entries
            .values()
            .map(|status| status.level)
            .max()
            .unwrap_or(StatusLevel::Ok)
    }

    /// Entries ordered by category
    pub fn iter(&self) -> impl Iterator<Item = (StatusCategory, &Status)> {
        let mut entries: Vec<_> = self.entries.iter().map(|(c, s)| (*c, s)).collect();
        entries.sort_by_key(|(category, _)| *category);
        entries.into_iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rate_thresholds() {
        assert_eq!(status_for_error_rate(0.0).level, StatusLevel::Ok);
        assert_eq!(status_for_error_rate(0.3).level, StatusLevel::Ok);
        assert_eq!(status_for_error_rate(0.31).level, StatusLevel::Warning);
        assert_eq!(status_for_error_rate(0.95).level, StatusLevel::Warning);
        assert_eq!(status_for_error_rate(0.96).level, StatusLevel::Error);
        assert_eq!(status_for_error_rate(1.0).message, "Few or no tiles received");
    }

    #[test]
    fn test_board_tracks_worst() {
        let mut board = StatusBoard::new();
        assert_eq!(board.worst(), StatusLevel::Ok);

        assert!(board.set(StatusCategory::Message, StatusLevel::Warning, "No map received yet"));
        assert!(!board.set(StatusCategory::Message, StatusLevel::Warning, "No map received yet"));
        board.set(StatusCategory::Transform, StatusLevel::Error, "lost");
        assert_eq!(board.worst(), StatusLevel::Error);

        board.set(StatusCategory::Transform, StatusLevel::Ok, "Transform OK");
        assert_eq!(board.worst(), StatusLevel::Warning);

        let categories: Vec<_> = board.iter().map(|(c, _)| c).collect();
        assert_eq!(categories, vec![StatusCategory::Message, StatusCategory::Transform]);
    }
}
