//! Error types shared by the whole crate.

use std::time::Duration;

use thiserror::Error;

use crate::types::{ChannelId, Pid};

/// Errors reported by the external model checker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    /// The oracle did not answer within the given bound.
    /// The invariant status is undetermined.
    #[error("model checker timed out after {bound:?}")]
    Timeout { bound: Duration },

    /// The oracle could not be started or reached.
    #[error("model checker unavailable: {0}")]
    Unavailable(String),

    /// The oracle answered with something we could not interpret.
    #[error("unexpected model checker output: {0}")]
    Protocol(String),
}

/// Which of the two mandatory state sets is missing in a projected FSM.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MissingStates {
    Initial,
    Accept,
}

impl std::fmt::Display for MissingStates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingStates::Initial => write!(f, "initial"),
            MissingStates::Accept => write!(f, "accepting"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CfsmError {
    /// Replaying a receive did not find the expected label at the head of the channel.
    #[error("replay inconsistency on channel {channel}: expected `{expected}`, found {found:?}")]
    ReplayInconsistency {
        channel: ChannelId,
        expected: String,
        found: Option<String>,
    },

    /// A projected FSM has no initial or no accepting states.
    /// This always means the partition graph itself is malformed.
    #[error("projection for {pid} has no {missing} states")]
    EmptyProjection { pid: Pid, missing: MissingStates },

    #[error("invalid invariant {kind}: first and second event are both `{event}`")]
    InvalidInvariant { kind: &'static str, event: String },

    #[error("invalid split: {0}")]
    InvalidSplit(String),

    /// The longest partial counterexample path did not get past the initial partition.
    #[error("longest partial path has length {length}, expected more than 1")]
    PartialPathTooShort { length: usize },

    #[error("partition graph has no initial partition")]
    NoInitialPartition,

    #[error("invalid trace: {0}")]
    InvalidTrace(String),

    #[error("malformed partition graph: {0}")]
    MalformedGfsm(String),

    /// Two distinct events would be written to the verifier with the same symbol.
    #[error("events `{first}` and `{second}` are both encoded as `{symbol}`")]
    SymbolClash {
        first: String,
        second: String,
        symbol: String,
    },

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("formatting error")]
    Fmt(#[from] std::fmt::Error),
}

pub type Result<T> = std::result::Result<T, CfsmError>;
