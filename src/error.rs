// Copyright 2021 TiKV Project Authors. TSC reliability/calibration algorithms
// adapted from Andrey Nevolin's wtmlib. Licensed under MIT.

use std::fmt;

/// The three ways a top-level operation can fail.
///
/// This mirrors the non-zero return codes of the C library this crate is
/// based on: a generic error (allocation, OS-call, or worker-lifecycle
/// failure), a TSC inconsistency (an observed invariant violation, including
/// suspected wraparound), and poor statistics (the measurement succeeded but
/// didn't show enough structure for its significance gate).
#[derive(Debug, thiserror::Error)]
pub enum WtmError {
    #[error("{0}")]
    Generic(String),
    #[error("TSC inconsistency: {0}")]
    TscInconsistency(String),
    #[error("insufficient statistical significance: {0}")]
    PoorStatistics(String),
}

impl WtmError {
    pub fn generic(msg: impl Into<String>) -> Self {
        WtmError::Generic(msg.into())
    }

    pub fn inconsistency(msg: impl Into<String>) -> Self {
        WtmError::TscInconsistency(msg.into())
    }

    pub fn poor_statistics(msg: impl Into<String>) -> Self {
        WtmError::PoorStatistics(msg.into())
    }
}

impl From<std::io::Error> for WtmError {
    fn from(e: std::io::Error) -> Self {
        WtmError::Generic(e.to_string())
    }
}

/// A short, descriptive summary list joined the way the original library's
/// bounded error-message buffer composed multiple partial-failure causes.
pub(crate) struct ErrorDetail(Vec<String>);

impl ErrorDetail {
    pub(crate) fn new() -> Self {
        ErrorDetail(Vec::new())
    }

    pub(crate) fn push(&mut self, detail: impl Into<String>) {
        self.0.push(detail.into());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("; "))
    }
}
