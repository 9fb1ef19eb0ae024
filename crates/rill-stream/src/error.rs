//! Stream-specific error types.
//!
//! Every variant except [`StreamError::InvalidConfig`] indicates a caller
//! bug, not a runtime condition. They carry enough context (lane index,
//! expected vs. actual state) to locate the offending call site.

use std::error::Error;
use std::fmt;

use crate::stream::LaneLayout;

/// Errors that can occur during stream operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamError {
    /// Configuration failed validation.
    InvalidConfig {
        /// Human-readable description of the problem.
        reason: String,
    },
    /// A lane index beyond the stream's lane table.
    LaneOutOfRange {
        /// The requested lane.
        lane: usize,
        /// Number of lanes in the stream.
        lane_count: usize,
    },
    /// Another writer or reader currently holds the lane.
    LaneBusy {
        /// The contended lane.
        lane: usize,
        /// What the current holder is doing (`"writing"` or `"reading"`).
        held_for: &'static str,
    },
    /// The lane lies outside the writer's restriction range.
    LaneOutsideRestriction {
        /// The requested lane.
        lane: usize,
        /// First lane the writer may open.
        min: usize,
        /// One past the last lane the writer may open.
        max: usize,
    },
    /// The lane already completed a write session this tick.
    LaneAlreadyWritten {
        /// The lane.
        lane: usize,
        /// Records it already holds.
        element_count: u32,
    },
    /// `begin_lane` while the same writer or reader has a lane open.
    SessionAlreadyOpen {
        /// The lane currently open.
        open: usize,
        /// The lane the caller tried to open.
        requested: usize,
    },
    /// An operation that needs an open lane session was called without one.
    NoSessionOpen {
        /// The operation that was attempted.
        operation: &'static str,
    },
    /// A single allocation larger than one block's usable payload.
    AllocationTooLarge {
        /// Bytes requested.
        requested: usize,
        /// Usable bytes per block.
        max: usize,
    },
    /// A read beyond the records the lane holds.
    ReadPastEnd {
        /// The lane being read.
        lane: usize,
        /// Bytes the caller asked for.
        requested: usize,
    },
    /// A reader closed a lane without consuming every record.
    LaneNotConsumed {
        /// The lane.
        lane: usize,
        /// Records left unread.
        remaining: u32,
    },
    /// A reader consumed the recorded count but its cursor does not sit at
    /// the recorded end (read sizes differed from write sizes).
    CursorMismatch {
        /// The lane.
        lane: usize,
        /// Recorded end offset in the last block.
        expected_offset: u32,
        /// Offset the reader's cursor reached.
        actual_offset: u32,
    },
    /// The writer kind does not match how the stream's lanes are laid out.
    WrongLayout {
        /// Layout the writer requires.
        expected: &'static str,
        /// The stream's actual layout.
        actual: LaneLayout,
    },
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid stream config: {reason}"),
            Self::LaneOutOfRange { lane, lane_count } => {
                write!(f, "lane {lane} out of range (stream has {lane_count} lanes)")
            }
            Self::LaneBusy { lane, held_for } => {
                write!(f, "lane {lane} is busy: already claimed for {held_for}")
            }
            Self::LaneOutsideRestriction { lane, min, max } => {
                write!(f, "lane {lane} outside writer restriction {min}..{max}")
            }
            Self::LaneAlreadyWritten {
                lane,
                element_count,
            } => {
                write!(
                    f,
                    "lane {lane} already written this tick ({element_count} records)"
                )
            }
            Self::SessionAlreadyOpen { open, requested } => {
                write!(
                    f,
                    "cannot open lane {requested}: lane {open} is still open on this instance"
                )
            }
            Self::NoSessionOpen { operation } => {
                write!(f, "{operation} called without an open lane session")
            }
            Self::AllocationTooLarge { requested, max } => {
                write!(
                    f,
                    "allocation of {requested} bytes exceeds block capacity of {max} bytes; chunk the payload"
                )
            }
            Self::ReadPastEnd { lane, requested } => {
                write!(f, "read of {requested} bytes past the end of lane {lane}")
            }
            Self::LaneNotConsumed { lane, remaining } => {
                write!(f, "lane {lane} closed with {remaining} unread records")
            }
            Self::CursorMismatch {
                lane,
                expected_offset,
                actual_offset,
            } => {
                write!(
                    f,
                    "lane {lane} cursor at offset {actual_offset}, recorded end is {expected_offset}"
                )
            }
            Self::WrongLayout { expected, actual } => {
                write!(f, "writer requires {expected} lanes, stream is {actual}")
            }
        }
    }
}

impl Error for StreamError {}
