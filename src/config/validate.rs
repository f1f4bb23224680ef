//! Purpose: Well-formedness checks for a parsed configuration document.
//! Exports: `ValidationReport`, `ValidationStatus`, `ValidationIssue`, `Severity`, `validate`.
//! Role: Shared contract for `thamos validate` and library callers.
//! Invariants: Every failing check is reported; validation never stops at the first issue.
//! Invariants: Warnings never change the report status.
use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;

use super::schema::{RuntimeEnvironment, ThothConfig};
use crate::template;

/// Issue code for a runtime environment without `recommendation_type`.
pub const MISSING_RECOMMENDATION_TYPE: &str = "missing_recommendation_type";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Ok,
    Invalid,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub code: String,
    pub severity: Severity,
    /// Location inside the document, e.g. `managers[2].name`.
    pub path: String,
    pub message: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ValidationReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    pub status: ValidationStatus,
    pub issues: Vec<ValidationIssue>,
    pub error_count: usize,
    pub warning_count: usize,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            source: None,
            status: ValidationStatus::Ok,
            issues: Vec::new(),
            error_count: 0,
            warning_count: 0,
        }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn set_issues(mut self, issues: Vec<ValidationIssue>) -> Self {
        self.error_count = issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
            .count();
        self.warning_count = issues.len() - self.error_count;
        self.issues = issues;
        self.status = if self.error_count == 0 {
            ValidationStatus::Ok
        } else {
            ValidationStatus::Invalid
        };
        self
    }

    /// Downgrade every issue with `code` to a warning and recount.
    pub fn relax(self, code: &str) -> Self {
        let issues = self
            .issues
            .iter()
            .cloned()
            .map(|mut issue| {
                if issue.code == code {
                    issue.severity = Severity::Warning;
                }
                issue
            })
            .collect();
        self.set_issues(issues)
    }

    pub fn is_ok(&self) -> bool {
        self.status == ValidationStatus::Ok
    }
}

pub fn validate(config: &ThothConfig) -> ValidationReport {
    let mut issues = Vec::new();

    if config.host.trim().is_empty() {
        issues.push(error("empty_host", "host", "host must not be empty"));
    }
    check_placeholders(&mut issues, "host", &config.host);

    let mut env_names = HashSet::new();
    for (idx, env) in config.runtime_environments.iter().enumerate() {
        check_runtime_environment(&mut issues, idx, env, &mut env_names);
    }

    let mut manager_names = HashSet::new();
    for (idx, manager) in config.managers.iter().enumerate() {
        let path = format!("managers[{idx}]");
        if manager.name.trim().is_empty() {
            issues.push(error(
                "empty_manager_name",
                &format!("{path}.name"),
                "manager name must not be empty",
            ));
        } else if !manager_names.insert(manager.name.as_str()) {
            issues.push(error(
                "duplicate_manager",
                &format!("{path}.name"),
                &format!("manager {:?} is listed more than once", manager.name),
            ));
        }
        if let Some(configuration) = &manager.configuration {
            if !configuration.is_mapping() {
                issues.push(error(
                    "manager_configuration_not_mapping",
                    &format!("{path}.configuration"),
                    "manager configuration must be a mapping",
                ));
            }
        }
    }

    ValidationReport::ok().set_issues(issues)
}

fn check_runtime_environment<'a>(
    issues: &mut Vec<ValidationIssue>,
    idx: usize,
    env: &'a RuntimeEnvironment,
    seen: &mut HashSet<&'a str>,
) {
    let path = format!("runtime_environments[{idx}]");
    match env.name.as_deref().map(str::trim) {
        None | Some("") => issues.push(error(
            "missing_runtime_environment_name",
            &format!("{path}.name"),
            "runtime environment name must be set",
        )),
        Some(_) => {
            let name = env.name.as_deref().unwrap_or_default();
            if !seen.insert(name) {
                issues.push(error(
                    "duplicate_runtime_environment",
                    &format!("{path}.name"),
                    &format!("runtime environment {name:?} is listed more than once"),
                ));
            }
        }
    }
    if env.recommendation_type.is_none() {
        issues.push(error(
            MISSING_RECOMMENDATION_TYPE,
            &format!("{path}.recommendation_type"),
            "recommendation_type must be one of testing, stable, latest",
        ));
    }

    let fields = [
        ("name", env.name.as_deref()),
        ("operating_system.name", env.operating_system.name.as_deref()),
        (
            "operating_system.version",
            env.operating_system.version.as_deref(),
        ),
        ("python_version", env.python_version.as_deref()),
        ("cuda_version", env.cuda_version.as_deref()),
    ];
    for (field, value) in fields {
        if let Some(value) = value {
            check_placeholders(issues, &format!("{path}.{field}"), value);
        }
    }
}

fn check_placeholders(issues: &mut Vec<ValidationIssue>, path: &str, value: &str) {
    for name in template::placeholders(value) {
        issues.push(ValidationIssue {
            code: "unresolved_placeholder".to_string(),
            severity: Severity::Warning,
            path: path.to_string(),
            message: format!("value contains unresolved placeholder {{{name}}}"),
        });
    }
}

fn error(code: &str, path: &str, message: &str) -> ValidationIssue {
    ValidationIssue {
        code: code.to_string(),
        severity: Severity::Error,
        path: path.to_string(),
        message: message.to_string(),
    }
}
