//! Diagnostics returned by lifecycle operations.
//!
//! Operations never return `Err` to the plugin host: every failure becomes an
//! error [`Diagnostic`], and advisory conditions (commit warnings, clear
//! failures) become warnings next to it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, JunosError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// One reported condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: ErrorKind,
    pub summary: String,
    pub detail: String,
    /// Resource attribute the condition is about, when known.
    pub attribute: Option<String>,
}

/// Ordered collection of diagnostics for one operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `err` as an error, scoped to its attribute path if it has one.
    pub fn push_error(&mut self, err: &JunosError) {
        self.push(Severity::Error, err);
    }

    /// Records `err` as a warning.
    pub fn push_warning(&mut self, err: &JunosError) {
        self.push(Severity::Warning, err);
    }

    pub fn add_error(
        &mut self,
        kind: ErrorKind,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.0.push(Diagnostic {
            severity: Severity::Error,
            kind,
            summary: summary.into(),
            detail: detail.into(),
            attribute: None,
        });
    }

    pub fn add_attribute_error(
        &mut self,
        attribute: impl Into<String>,
        kind: ErrorKind,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.0.push(Diagnostic {
            severity: Severity::Error,
            kind,
            summary: summary.into(),
            detail: detail.into(),
            attribute: Some(attribute.into()),
        });
    }

    pub fn add_warning(
        &mut self,
        kind: ErrorKind,
        summary: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.0.push(Diagnostic {
            severity: Severity::Warning,
            kind,
            summary: summary.into(),
            detail: detail.into(),
            attribute: None,
        });
    }

    fn push(&mut self, severity: Severity, err: &JunosError) {
        self.0.push(Diagnostic {
            severity,
            kind: err.kind(),
            summary: err.summary().to_string(),
            detail: err.to_string(),
            attribute: err.attribute_path().map(str::to_string),
        });
    }

    pub fn has_error(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(|d| d.severity == Severity::Warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
