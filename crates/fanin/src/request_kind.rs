// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::LatencyMetric;

/// The kind of logical I/O request tracked by a [`Completion`][crate::Completion].
///
/// The kind is fixed when the completion is first associated with a session. It selects
/// the latency metric recorded at completion time and decides whether the completion is
/// responsible for tearing down the session (close requests, and open requests that fail).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RequestKind {
    /// A request that is not any of the more specific kinds. Not latency-tracked.
    Generic,

    /// Opens the session. If the request fails, the completion destroys the
    /// partially-constructed session before notifying the caller.
    Open,

    /// Closes the session. The completion destroys the session before notifying
    /// the caller.
    Close,

    /// Reads data from the storage target.
    Read,

    /// Writes data to the storage target.
    Write,

    /// Discards (unmaps) a range of the storage target.
    Discard,

    /// Flushes previously written data to durable storage.
    Flush,

    /// Writes the same payload repeatedly across a range.
    WriteSame,

    /// Atomically compares a range against an expected payload and writes if it matches.
    CompareAndWrite,
}

impl RequestKind {
    /// The latency metric recorded for this request kind, if any.
    ///
    /// Generic, open and close requests are not latency-tracked.
    pub(crate) fn latency_metric(self) -> Option<LatencyMetric> {
        match self {
            Self::Generic | Self::Open | Self::Close => None,
            Self::Read => Some(LatencyMetric::Read),
            Self::Write => Some(LatencyMetric::Write),
            Self::Discard => Some(LatencyMetric::Discard),
            Self::Flush => Some(LatencyMetric::Flush),
            Self::WriteSame => Some(LatencyMetric::WriteSame),
            Self::CompareAndWrite => Some(LatencyMetric::CompareAndWrite),
        }
    }

    /// Whether requests of this kind register with the session's in-flight tracker.
    ///
    /// Open and close requests are what create and destroy the session, so the tracker
    /// cannot gate them.
    pub(crate) fn is_tracked(self) -> bool {
        !matches!(self, Self::Open | Self::Close)
    }
}
