//! Internal invariant violations
//!
//! These never originate from guest behavior that real hardware would
//! answer; they indicate a collaborator bug or an unmodeled guest sequence.
//! They travel inside `anyhow::Error` so callers can `downcast_ref` them.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterFault {
    #[error("command started on target {target} LUN {lun} while another is in progress")]
    CommandInProgress { target: u8, lun: u8 },

    #[error("target {target} LUN {lun} disappeared during command execution")]
    TargetVanished { target: u8, lun: u8 },

    #[error("transfer of {requested} bytes overruns {available} byte target buffer")]
    BufferOverrun { requested: usize, available: usize },

    #[error("transfer of {requested} bytes underruns {expected} byte target buffer")]
    BufferUnderrun { requested: usize, expected: usize },
}
