//! Bridge errors.
use std::path::PathBuf;

use displaydoc::Display;
use thiserror::Error;

/// Errors raised while constructing a plan.
///
/// These stop the walker; they are never surfaced to clients directly but
/// end up encoded into the fetch input as a diagnostic.
#[derive(Error, Display, Debug)]
pub enum PlanError {
    /// datasource configuration is malformed: {0}
    Configuration(#[from] serde_json::Error),

    /// parsing the {document} document failed: {reason}
    Parse {
        /// Which document failed, `operation` or `definition`.
        document: &'static str,
        /// Parser diagnostics.
        reason: String,
    },

    /// normalization failed: {0}
    Normalization(String),

    /// '{0}' is not a valid GraphQL name
    InvalidName(String),

    /// {0}
    Internal(String),
}

/// Errors from the query-engine subprocess and its supervisor.
#[derive(Error, Display, Debug)]
pub enum EngineError {
    /// engine closed
    Closed,

    /// engine failed to start: {reason}
    StartFailed {
        /// Why the subprocess never became ready.
        reason: String,
    },

    /// engine binary missing at {path}, install it through the binary bootstrap first
    BinaryMissing {
        /// Expected location of the binary.
        path: PathBuf,
    },

    /// engine request failed: {0}
    Transport(#[from] reqwest::Error),

    /// engine responded with http status {0}
    Status(u16),

    /// introspection failed: {0}
    Introspection(String),

    /// engine io failed: {0}
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the execution source at request time.
#[derive(Error, Display, Debug)]
pub enum FetchError {
    /// request deadline exceeded
    DeadlineExceeded,

    /// {0}
    Engine(#[from] EngineError),

    /// writing the response failed: {0}
    Write(#[source] std::io::Error),
}
