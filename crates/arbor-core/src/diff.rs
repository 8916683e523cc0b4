//! Diagnostic diff between two compilation states

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::DiagnosticRecord;

/// Identity of a diagnostic across two states. Severity and project are
/// not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DiagnosticKey {
    pub rule_id: String,
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl From<&DiagnosticRecord> for DiagnosticKey {
    fn from(record: &DiagnosticRecord) -> Self {
        DiagnosticKey {
            rule_id: record.rule_id.clone(),
            file: record.file.clone(),
            line: record.line,
            column: record.column,
            message: record.message.clone(),
        }
    }
}

/// Three-way partition of diagnostics between a "before" and an "after" state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticDelta {
    /// Present before, gone after.
    pub resolved: Vec<DiagnosticRecord>,
    /// Absent before, present after.
    pub introduced: Vec<DiagnosticRecord>,
    /// Present in both (the "after" instance is kept).
    pub unchanged: Vec<DiagnosticRecord>,
}

impl DiagnosticDelta {
    /// Compute the delta. Identical diagnostics are matched as a multiset:
    /// two copies before and one after leave one copy resolved.
    pub fn compute(before: &[DiagnosticRecord], after: &[DiagnosticRecord]) -> Self {
        let mut delta = DiagnosticDelta::default();

        let mut available = count_keys(before);
        for record in after {
            match available.get_mut(&DiagnosticKey::from(record)) {
                Some(count) if *count > 0 => {
                    *count -= 1;
                    delta.unchanged.push(record.clone());
                }
                _ => delta.introduced.push(record.clone()),
            }
        }

        let mut matched = count_keys(after);
        for record in before {
            match matched.get_mut(&DiagnosticKey::from(record)) {
                Some(count) if *count > 0 => *count -= 1,
                _ => delta.resolved.push(record.clone()),
            }
        }

        delta
    }

    /// True when nothing was resolved or introduced.
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty() && self.introduced.is_empty()
    }

    /// True if the edit introduced at least one error.
    pub fn introduces_errors(&self) -> bool {
        self.introduced.iter().any(DiagnosticRecord::is_error)
    }
}

fn count_keys(records: &[DiagnosticRecord]) -> HashMap<DiagnosticKey, usize> {
    let mut counts = HashMap::with_capacity(records.len());
    for record in records {
        *counts.entry(DiagnosticKey::from(record)).or_insert(0) += 1;
    }
    counts
}
