//! Built-in analyzers for outline artifacts

use std::sync::LazyLock;

use anyhow::Result;
use arbor_core::{AnalyzerConfig, AnalyzerSet, DiagnosticRecord, Severity};
use regex::Regex;

use crate::bridge::AnalyzerLoader;
use crate::providers::outline::OutlineModule;

pub const TODO_COMMENT: &str = "todo-comment";
pub const EMPTY_DOCUMENT: &str = "empty-document";
pub const NAMING: &str = "naming";

pub const RULE_TODO: &str = "AR2001";
pub const RULE_EMPTY: &str = "AR2002";
pub const RULE_NAMING: &str = "AR2003";

/// Analyzers enabled when a configuration asks for defaults.
pub const DEFAULT_ANALYZERS: &[&str] = &[NAMING, TODO_COMMENT];

/// Every analyzer this crate can run.
pub const BUILTIN_ANALYZERS: &[&str] = &[EMPTY_DOCUMENT, NAMING, TODO_COMMENT];

static SNAKE_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").expect("naming regex is valid"));

/// Run one built-in analyzer. Returns `None` for unknown names.
pub fn run_builtin(name: &str, module: &OutlineModule) -> Option<Vec<DiagnosticRecord>> {
    let project = &module.project;
    let found = match name {
        TODO_COMMENT => module
            .documents
            .iter()
            .flat_map(|doc| {
                doc.comments
                    .iter()
                    .filter(|(_, text)| text.starts_with("TODO"))
                    .map(move |(line, text)| {
                        DiagnosticRecord::new(project.clone(), RULE_TODO, Severity::Info, text.clone())
                            .at(&doc.path, *line, 1)
                    })
            })
            .collect(),
        EMPTY_DOCUMENT => module
            .documents
            .iter()
            .filter(|doc| doc.is_clean() && doc.statements == 0)
            .map(|doc| {
                DiagnosticRecord::new(
                    project.clone(),
                    RULE_EMPTY,
                    Severity::Warning,
                    "document has no statements",
                )
                .at(&doc.path, 1, 1)
            })
            .collect(),
        NAMING => module
            .documents
            .iter()
            .flat_map(|doc| doc.definitions.iter())
            .filter(|symbol| !SNAKE_CASE.is_match(&symbol.name))
            .map(|symbol| {
                DiagnosticRecord::new(
                    project.clone(),
                    RULE_NAMING,
                    Severity::Warning,
                    format!("`{}` should be snake_case", symbol.name),
                )
                .at(&symbol.file, symbol.line, symbol.column)
            })
            .collect(),
        _ => return None,
    };
    Some(found)
}

/// Resolves analyzer configuration against the built-in catalogue.
#[derive(Debug, Default, Clone)]
pub struct BuiltinAnalyzerLoader;

impl BuiltinAnalyzerLoader {
    pub fn new() -> Self {
        Self
    }
}

impl AnalyzerLoader for BuiltinAnalyzerLoader {
    fn load_analyzers(&self, config: &AnalyzerConfig) -> Result<AnalyzerSet> {
        let mut names: Vec<&str> = Vec::new();
        if config.use_defaults {
            names.extend(DEFAULT_ANALYZERS);
        }
        for name in &config.additional {
            if BUILTIN_ANALYZERS.contains(&name.as_str()) {
                names.push(name);
            } else {
                tracing::warn!("Unknown analyzer {}, skipping", name);
            }
        }
        names.retain(|name| !config.disabled.iter().any(|d| d == name));

        let set = AnalyzerSet::new(names);
        tracing::debug!("Resolved analyzers: {:?}", set.names());
        Ok(set)
    }
}
