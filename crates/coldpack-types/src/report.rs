use std::fmt;

use crate::dataset::DatasetCode;

/// Outcome of one dataset within a batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetOutcome {
    Ok,
    /// The request was accepted but deferred (delayed unarchiving).
    Deferred,
    Error(String),
}

/// Per-dataset result of an archive or unarchive call.
///
/// Batch entry points never fail halfway in silence: every submitted code
/// gets exactly one outcome.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    entries: Vec<(DatasetCode, DatasetOutcome)>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the same outcome for every code in the batch.
    pub fn all(codes: &[DatasetCode], outcome: DatasetOutcome) -> Self {
        Self {
            entries: codes.iter().map(|c| (c.clone(), outcome.clone())).collect(),
        }
    }

    pub fn push(&mut self, code: DatasetCode, outcome: DatasetOutcome) {
        self.entries.push((code, outcome));
    }

    pub fn entries(&self) -> &[(DatasetCode, DatasetOutcome)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when no entry carries an error.
    pub fn is_ok(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|(_, o)| matches!(o, DatasetOutcome::Error(_)))
    }

    pub fn outcome_of(&self, code: &DatasetCode) -> Option<&DatasetOutcome> {
        self.entries
            .iter()
            .find(|(c, _)| c == code)
            .map(|(_, o)| o)
    }

    pub fn merge(&mut self, other: BatchReport) {
        self.entries.extend(other.entries);
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (code, outcome) in &self.entries {
            match outcome {
                DatasetOutcome::Ok => writeln!(f, "{code}: ok")?,
                DatasetOutcome::Deferred => writeln!(f, "{code}: deferred")?,
                DatasetOutcome::Error(msg) => writeln!(f, "{code}: error: {msg}")?,
            }
        }
        Ok(())
    }
}
