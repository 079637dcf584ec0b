//! Validation results shared by the servers file and host settings.

use std::fmt;

/// Issues collected while checking a configuration.
///
/// Checking never stops at the first problem; callers see every issue.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while no error-level issue has been recorded.
    pub fn is_ok(&self) -> bool {
        self.of(IssueSeverity::Error).next().is_none()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.of(IssueSeverity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.of(IssueSeverity::Warning)
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.record(IssueSeverity::Error, field.into(), message.into());
    }

    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.record(IssueSeverity::Warning, field.into(), message.into());
    }

    /// Log warnings; fail with every error-level issue.
    pub fn into_result(self) -> Result<(), ConfigValidationError> {
        for issue in self.warnings() {
            tracing::warn!(field = %issue.field, "{}", issue.message);
        }

        let errors: Vec<_> = self
            .issues
            .into_iter()
            .filter(|i| i.severity == IssueSeverity::Error)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigValidationError { issues: errors })
        }
    }

    fn of(&self, severity: IssueSeverity) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    fn record(&mut self, severity: IssueSeverity, field: String, message: String) {
        self.issues.push(ValidationIssue {
            severity,
            field,
            message,
        });
    }
}

/// One problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// Dotted path of the offending field, e.g. `mcpServers.weather.url`.
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Logged; loading goes ahead.
    Warning,
    /// Loading is refused.
    Error,
}

/// Configuration rejected at load time.
///
/// Carries every offending path, never a partially coerced configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigValidationError {
    /// Error-level issues, in discovery order.
    pub issues: Vec<ValidationIssue>,
}

impl ConfigValidationError {
    /// Build an error for a single path.
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![ValidationIssue {
                severity: IssueSeverity::Error,
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    /// Paths of all offending fields.
    pub fn paths(&self) -> Vec<&str> {
        self.issues.iter().map(|i| i.field.as_str()).collect()
    }
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Configuration validation failed:")?;
        for issue in &self.issues {
            write!(f, "\n  {}: {}", issue.field, issue.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigValidationError {}
