//! Core projection trait and position tracking.

use async_trait::async_trait;
use events::EventEnvelope;

use crate::Result;

/// Tracks how many events a projection has handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionPosition {
    /// Events handled, whatever their outcome.
    pub events_processed: u64,
    /// Events that were ignored, duplicates, or stale.
    pub events_skipped: u64,
}

impl ProjectionPosition {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn advance(&self, outcome: ApplyOutcome) -> Self {
        Self {
            events_processed: self.events_processed + 1,
            events_skipped: self.events_skipped + u64::from(!outcome.changed_row()),
        }
    }
}

impl std::fmt::Display for ProjectionPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "position({}, skipped {})",
            self.events_processed, self.events_skipped
        )
    }
}

/// What handling one event did to the read model.
///
/// Every variant is a success: the message carrying the event can be
/// acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A row was inserted or changed.
    Applied,
    /// A "created" event for a row that already exists; the row was kept.
    Duplicate,
    /// Every column the event touches already held a newer write; nothing changed.
    Stale,
    /// The event kind is not handled by this projection.
    Ignored,
}

impl ApplyOutcome {
    pub fn changed_row(&self) -> bool {
        matches!(self, Self::Applied)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Stale => "stale",
            Self::Ignored => "ignored",
        }
    }
}

/// A projection that applies events to a read model.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handles a single event.
    ///
    /// An `Err` means the event was not applied and should be retried,
    /// unless [`crate::ProjectionError::is_malformed`] says retrying is futile.
    async fn handle(&self, event: &EventEnvelope) -> Result<ApplyOutcome>;

    async fn position(&self) -> ProjectionPosition;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_starts_at_zero() {
        let pos = ProjectionPosition::zero();
        assert_eq!(pos.events_processed, 0);
        assert_eq!(pos.events_skipped, 0);
    }

    #[test]
    fn position_counts_skips_separately() {
        let pos = ProjectionPosition::zero()
            .advance(ApplyOutcome::Applied)
            .advance(ApplyOutcome::Stale)
            .advance(ApplyOutcome::Ignored);
        assert_eq!(pos.events_processed, 3);
        assert_eq!(pos.events_skipped, 2);
    }

    #[test]
    fn position_display() {
        let pos = ProjectionPosition {
            events_processed: 42,
            events_skipped: 2,
        };
        assert_eq!(pos.to_string(), "position(42, skipped 2)");
    }
}
