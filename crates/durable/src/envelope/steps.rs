//! Step name normalization and the immutable pending-step sequence

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Normalize a list of step names
///
/// Names are trimmed and lowercased; blanks are dropped and duplicates
/// removed, keeping the first occurrence.
pub fn normalize_steps<I, S>(steps: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    steps
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

/// Parse a comma-separated step list (the `workflow_steps` tag format)
pub fn parse_step_list(raw: &str) -> Vec<String> {
    normalize_steps(raw.split(','))
}

/// Ordered, immutable sequence of step names still pending
///
/// There is no in-place mutation: [`StepSequence::split_first`] hands back
/// the head and a new tail, so a clone taken for a fan-out sibling can
/// never observe or affect another envelope's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepSequence(Vec<String>);

impl StepSequence {
    /// An empty sequence
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a sequence from already-normalized names
    pub(crate) fn from_normalized(steps: Vec<String>) -> Self {
        Self(steps)
    }

    /// Split into the next step and the remainder
    pub fn split_first(&self) -> Option<(String, StepSequence)> {
        self.0
            .split_first()
            .map(|(head, tail)| (head.clone(), StepSequence(tail.to_vec())))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, step: &str) -> bool {
        self.0.iter().any(|s| s == step)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}
