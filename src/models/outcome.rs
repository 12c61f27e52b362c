use serde::Serialize;

use super::Candidate;

/// Terminal classification of one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// The probe succeeded through the candidate
    Valid,
    /// The probe ran and failed
    Invalid,
    /// The pipeline could not get as far as a meaningful probe
    Errored,
    /// Not attempted, or abandoned, because the run is terminating
    Skipped,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Valid => "valid",
            Classification::Invalid => "invalid",
            Classification::Errored => "errored",
            Classification::Skipped => "skipped",
        }
    }

    /// Invalid and errored candidates both count as failed
    pub fn is_failure(&self) -> bool {
        matches!(self, Classification::Invalid | Classification::Errored)
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of validating one candidate
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub candidate: Candidate,
    pub classification: Classification,
    /// Port the candidate was bound to, if one was leased
    pub port: Option<u16>,
    /// Human readable cause for anything but `Valid`
    pub reason: Option<String>,
}

impl ValidationOutcome {
    pub fn valid(candidate: Candidate, port: u16) -> Self {
        Self {
            candidate,
            classification: Classification::Valid,
            port: Some(port),
            reason: None,
        }
    }

    pub fn invalid(candidate: Candidate, port: u16, reason: impl Into<String>) -> Self {
        Self {
            candidate,
            classification: Classification::Invalid,
            port: Some(port),
            reason: Some(reason.into()),
        }
    }

    pub fn errored(candidate: Candidate, port: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            candidate,
            classification: Classification::Errored,
            port,
            reason: Some(reason.into()),
        }
    }

    pub fn skipped(candidate: Candidate, reason: impl Into<String>) -> Self {
        Self {
            candidate,
            classification: Classification::Skipped,
            port: None,
            reason: Some(reason.into()),
        }
    }
}

/// Aggregate counts reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Candidates read from the input
    pub total: usize,
    /// Candidates persisted to the output
    pub valid: usize,
    /// Invalid plus errored
    pub failed: usize,
    /// Subset of `failed` that never reached a meaningful probe
    pub errored: usize,
    /// Candidates short-circuited by the cap or an interrupt
    pub skipped: usize,
}

impl RunSummary {
    /// Every candidate is accounted for exactly once
    pub fn is_balanced(&self) -> bool {
        self.valid + self.failed + self.skipped == self.total
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={} valid={} failed={} (errored={}) skipped={}",
            self.total, self.valid, self.failed, self.errored, self.skipped
        )
    }
}
