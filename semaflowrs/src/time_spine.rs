//! The time-spine collaborator: a calendar table the compiler can join
//! against for cumulative metrics and grain-to-date transforms.

use crate::error::{CompileError, Result};
use crate::specs::TimeGranularity;

/// Describes one configured spine table: its physical name, the column
/// holding the calendar date, and the finest granularity it's populated at.
/// A spine can only be queried at its base granularity or coarser — a
/// request for a finer grain is `CompileError::UnsupportedInput`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeSpineDescription {
    pub table_name: String,
    pub time_column_name: String,
    pub base_granularity: TimeGranularity,
}

impl TimeSpineDescription {
    pub fn new(
        table_name: impl Into<String>,
        time_column_name: impl Into<String>,
        base_granularity: TimeGranularity,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            time_column_name: time_column_name.into(),
            base_granularity,
        }
    }
}

/// The collaborator join-to-time-spine and the cumulative form of
/// join-over-time-range ask for a spine to join against. Implementations
/// choose which table serves which granularity; this crate ships one
/// reference implementation backed by a single configured table.
pub trait TimeSpineSource: Send + Sync {
    /// The best spine available for `requested_granularity`, or an error if
    /// none can serve it (no spine is ever finer than requested; a spine at
    /// or coarser than day level is always assumed to exist in practice).
    fn spine_for_granularity(&self, requested_granularity: TimeGranularity) -> Result<TimeSpineDescription>;
}

/// A single spine table, queryable at its own granularity or any coarser one
/// (truncation narrows; it never invents finer rows than the source has).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SingleTableTimeSpineSource {
    pub description: TimeSpineDescription,
}

impl SingleTableTimeSpineSource {
    pub fn new(description: TimeSpineDescription) -> Self {
        Self { description }
    }
}

impl TimeSpineSource for SingleTableTimeSpineSource {
    fn spine_for_granularity(&self, requested_granularity: TimeGranularity) -> Result<TimeSpineDescription> {
        if requested_granularity < self.description.base_granularity {
            return Err(CompileError::UnsupportedInput(format!(
                "requested granularity {:?} is finer than the time spine's base granularity {:?}",
                requested_granularity, self.description.base_granularity
            )));
        }
        Ok(self.description.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day_spine() -> SingleTableTimeSpineSource {
        SingleTableTimeSpineSource::new(TimeSpineDescription::new(
            "time_spine_day",
            "ds",
            TimeGranularity::Day,
        ))
    }

    #[test]
    fn coarser_granularity_is_served_by_the_same_spine() {
        let spine = day_spine();
        let resolved = spine.spine_for_granularity(TimeGranularity::Month).unwrap();
        assert_eq!(resolved.table_name, "time_spine_day");
    }

    #[test]
    fn finer_than_base_granularity_is_unsupported() {
        let spine = SingleTableTimeSpineSource::new(TimeSpineDescription::new(
            "time_spine_month",
            "ds",
            TimeGranularity::Month,
        ));
        let err = spine.spine_for_granularity(TimeGranularity::Day).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedInput(_)));
    }
}
