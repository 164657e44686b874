// Comparison Service
// Expected-vs-actual verification consumed by verifying actions

use serde::Serialize;

use std::collections::{BTreeMap, BTreeSet};

/// Comparison of a single field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldComparison {
    pub name: String,
    pub expected: String,
    pub actual: Option<String>,
    pub identical: bool,
}

/// Structured outcome of a comparison, embedded opaquely in action results
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComparisonDetails {
    pub rows: Vec<FieldComparison>,
}

impl ComparisonDetails {
    pub fn passed(&self) -> bool {
        self.rows.iter().all(|r| r.identical)
    }

    pub fn mismatches(&self) -> impl Iterator<Item = &FieldComparison> {
        self.rows.iter().filter(|r| !r.identical)
    }

    /// One-line summary naming every mismatching field
    pub fn summary(&self) -> String {
        let failed: Vec<&str> = self.mismatches().map(|r| r.name.as_str()).collect();
        if failed.is_empty() {
            format!("All {} fields match", self.rows.len())
        } else {
            format!(
                "{} of {} fields differ: {}",
                failed.len(),
                self.rows.len(),
                failed.join(", ")
            )
        }
    }
}

/// Pluggable comparison engine
pub trait ComparisonService: Send + Sync {
    fn compare(
        &self,
        expected: &BTreeMap<String, String>,
        actual: &BTreeMap<String, String>,
    ) -> ComparisonDetails;
}

/// Field-by-field exact comparison
#[derive(Debug, Clone, Default)]
pub struct FieldComparator {
    ignored: BTreeSet<String>,
    trim: bool,
}

impl FieldComparator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fields that are never compared
    pub fn ignoring<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Ignore leading and trailing whitespace
    pub fn trimmed(mut self) -> Self {
        self.trim = true;
        self
    }

    fn equal(&self, expected: &str, actual: &str) -> bool {
        if self.trim {
            expected.trim() == actual.trim()
        } else {
            expected == actual
        }
    }
}

impl ComparisonService for FieldComparator {
    fn compare(
        &self,
        expected: &BTreeMap<String, String>,
        actual: &BTreeMap<String, String>,
    ) -> ComparisonDetails {
        let rows = expected
            .iter()
            .filter(|(name, _)| !self.ignored.contains(*name))
            .map(|(name, expected_value)| {
                let actual_value = actual.get(name).cloned();
                let identical = actual_value
                    .as_deref()
                    .map(|a| self.equal(expected_value, a))
                    .unwrap_or(false);
                FieldComparison {
                    name: name.clone(),
                    expected: expected_value.clone(),
                    actual: actual_value,
                    identical,
                }
            })
            .collect();
        ComparisonDetails { rows }
    }
}
