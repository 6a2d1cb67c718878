//! # Flow status of polled data sources
//!
//! All sources read by the controller are "newest wins": anything written between two polls
//! except the latest value is discarded by the source.

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Result of polling a data source for its newest value.
#[derive(Debug, Clone, PartialEq)]
pub enum Poll<T> {
    /// The source has never produced any data.
    NoData,

    /// The source has produced data before, but nothing new since the last poll.
    OldData,

    /// New data since the last poll.
    NewData(T),
}
