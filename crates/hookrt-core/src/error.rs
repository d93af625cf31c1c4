#![forbid(unsafe_code)]

//! Error types for the reactive engine.
//!
//! # Failure Modes
//!
//! | Failure | Cause | Behavior |
//! |---------|-------|----------|
//! | Hook order drift | `use_state`/`use_effect` sequence differs between passes | [`RuntimeError::HookOrderViolation`] |
//! | Hook count drift | fewer calls than the first pass | [`RuntimeError::HookCountMismatch`] (when checked) |
//! | Nested flush | an effect calls `flush_now` | [`RuntimeError::ReentrantFlush`] |
//! | Orphaned handle | handle used after its runtime was dropped | [`RuntimeError::Detached`] |
//! | Callback panic | effect or handler panics | propagates unchanged; never caught here |

use std::fmt;

/// Errors reported by the runtime and hook cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// A hook call at `position` did not match the call recorded there on
    /// the first pass.
    HookOrderViolation {
        position: usize,
        expected: &'static str,
        found: &'static str,
    },
    /// A pass finished after a different number of hook calls than the
    /// first pass recorded.
    HookCountMismatch { expected: usize, found: usize },
    /// A flush was requested synchronously from inside a running flush.
    ReentrantFlush,
    /// The runtime that owned this handle has been dropped.
    Detached,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HookOrderViolation {
                position,
                expected,
                found,
            } => write!(
                f,
                "hook order violation at position {position}: expected {expected}, found {found}"
            ),
            Self::HookCountMismatch { expected, found } => {
                write!(f, "hook count mismatch: expected {expected} calls, found {found}")
            }
            Self::ReentrantFlush => write!(f, "flush requested while a flush is running"),
            Self::Detached => write!(f, "runtime has been dropped"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Errors from loading [`RuntimeConfig`](crate::RuntimeConfig).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    InvalidValue { key: String, value: String },
    /// A policy document could not be parsed.
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value } => write!(f, "invalid value for {key}: {value:?}"),
            Self::Parse(msg) => write!(f, "config parse error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
