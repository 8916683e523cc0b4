//! Reference backend for the line-oriented "outline" language.
//!
//! ```text
//! // comment
//! def name     defines `name`
//! use name     requires `name` to be visible
//! {            opens a block
//! }            closes a block
//! ```
//!
//! A project sees its own definitions, everything its references export and
//! the names of its metadata references. A project exports everything it
//! sees, so definitions flow transitively to dependents. A document with a
//! syntax error contributes no definitions.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::Result;
use arbor_core::{AnalyzerSet, Artifact, DiagnosticRecord, Document, ProjectId, Severity};
use regex::Regex;

use crate::analyzers;
use crate::bridge::{CompilationUnit, CompilerBackend};

pub const RULE_SYNTAX: &str = "AR1001";
pub const RULE_UNRESOLVED: &str = "AR1002";
pub const RULE_DUPLICATE: &str = "AR1003";

const LANGUAGE_VERSION: &str = "outline/1";

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"));

/// A named occurrence in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

/// A single parsed document.
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub path: PathBuf,
    pub definitions: Vec<Symbol>,
    pub uses: Vec<Symbol>,
    /// (line, comment text without the leading `//`)
    pub comments: Vec<(u32, String)>,
    pub statements: usize,
    pub syntax_errors: Vec<DiagnosticRecord>,
}

impl ParsedDocument {
    pub fn is_clean(&self) -> bool {
        self.syntax_errors.is_empty()
    }
}

/// Artifact payload produced by [`OutlineBackend`].
#[derive(Debug, Clone)]
pub struct OutlineModule {
    pub project: ProjectId,
    pub documents: Vec<ParsedDocument>,
    /// Names visible to dependents.
    pub exports: BTreeSet<String>,
    pub diagnostics: Vec<DiagnosticRecord>,
}

/// Parse one document.
pub fn parse_document(project: &ProjectId, document: &Document) -> ParsedDocument {
    let mut parsed = ParsedDocument {
        path: document.path.clone(),
        definitions: Vec::new(),
        uses: Vec::new(),
        comments: Vec::new(),
        statements: 0,
        syntax_errors: Vec::new(),
    };
    let mut open_blocks: Vec<(u32, u32)> = Vec::new();

    for (index, line) in document.content.lines().enumerate() {
        let line_no = index as u32 + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let column = (line.len() - line.trim_start().len()) as u32 + 1;

        if let Some(comment) = trimmed.strip_prefix("//") {
            parsed.comments.push((line_no, comment.trim().to_string()));
            continue;
        }

        let syntax_error = |message: String| {
            DiagnosticRecord::new(project.clone(), RULE_SYNTAX, Severity::Error, message)
                .at(&document.path, line_no, column)
        };

        match trimmed {
            "{" => {
                open_blocks.push((line_no, column));
                parsed.statements += 1;
            }
            "}" => {
                if open_blocks.pop().is_none() {
                    parsed.syntax_errors.push(syntax_error("unexpected `}`".to_string()));
                } else {
                    parsed.statements += 1;
                }
            }
            _ => {
                let words: Vec<&str> = trimmed.split_whitespace().collect();
                let symbol = |name: &str| Symbol {
                    name: name.to_string(),
                    file: document.path.clone(),
                    line: line_no,
                    column,
                };
                match words.as_slice() {
                    ["def", name] if IDENTIFIER.is_match(name) => {
                        parsed.definitions.push(symbol(name));
                        parsed.statements += 1;
                    }
                    ["use", name] if IDENTIFIER.is_match(name) => {
                        parsed.uses.push(symbol(name));
                        parsed.statements += 1;
                    }
                    _ => parsed.syntax_errors.push(syntax_error(format!(
                        "expected `def`, `use`, `{{` or `}}`, found `{trimmed}`"
                    ))),
                }
            }
        }
    }

    for (line, column) in open_blocks {
        parsed.syntax_errors.push(
            DiagnosticRecord::new(project.clone(), RULE_SYNTAX, Severity::Error, "unclosed `{`")
                .at(&document.path, line, column),
        );
    }

    parsed
}

/// Compiler for the outline language.
pub struct OutlineBackend;

impl OutlineBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for OutlineBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CompilerBackend for OutlineBackend {
    async fn compile(&self, unit: CompilationUnit) -> Result<Artifact> {
        let documents: Vec<ParsedDocument> = unit
            .sources
            .iter()
            .map(|document| parse_document(&unit.project, document))
            .collect();
        let strict = unit.options.get("strict").is_some_and(|v| v == "true");

        let mut diagnostics: Vec<DiagnosticRecord> = documents
            .iter()
            .flat_map(|d| d.syntax_errors.iter().cloned())
            .collect();

        let mut visible: BTreeSet<String> = unit.metadata_references.iter().cloned().collect();
        for reference in &unit.references {
            match reference.payload::<OutlineModule>() {
                Some(module) => visible.extend(module.exports.iter().cloned()),
                None => tracing::warn!(
                    "Reference {} of {} was not compiled by the outline backend",
                    reference.project,
                    unit.project
                ),
            }
        }

        let mut defined: BTreeMap<&str, &Symbol> = BTreeMap::new();
        for definition in documents
            .iter()
            .filter(|d| d.is_clean())
            .flat_map(|d| d.definitions.iter())
        {
            if defined.contains_key(definition.name.as_str()) {
                let severity = if strict { Severity::Error } else { Severity::Warning };
                diagnostics.push(
                    DiagnosticRecord::new(
                        unit.project.clone(),
                        RULE_DUPLICATE,
                        severity,
                        format!("`{}` is defined more than once", definition.name),
                    )
                    .at(&definition.file, definition.line, definition.column),
                );
            } else {
                defined.insert(&definition.name, definition);
            }
        }
        visible.extend(defined.keys().map(|name| name.to_string()));

        for usage in documents
            .iter()
            .filter(|d| d.is_clean())
            .flat_map(|d| d.uses.iter())
        {
            if !visible.contains(&usage.name) {
                diagnostics.push(
                    DiagnosticRecord::new(
                        unit.project.clone(),
                        RULE_UNRESOLVED,
                        Severity::Error,
                        format!("cannot find `{}` in scope", usage.name),
                    )
                    .at(&usage.file, usage.line, usage.column),
                );
            }
        }

        tracing::debug!(
            "Compiled {}: {} documents, {} diagnostics",
            unit.project,
            documents.len(),
            diagnostics.len()
        );

        let module = OutlineModule {
            project: unit.project.clone(),
            documents,
            exports: visible,
            diagnostics,
        };
        Ok(Artifact::new(unit.project, module))
    }

    fn diagnostics(&self, artifact: &Artifact) -> Vec<DiagnosticRecord> {
        artifact
            .payload::<OutlineModule>()
            .map(|module| module.diagnostics.clone())
            .unwrap_or_default()
    }

    async fn run_analyzers(
        &self,
        artifact: &Artifact,
        analyzers: &AnalyzerSet,
    ) -> Result<Vec<DiagnosticRecord>> {
        let Some(module) = artifact.payload::<OutlineModule>() else {
            anyhow::bail!(
                "Artifact for {} was not produced by the outline backend",
                artifact.project
            );
        };

        let mut diagnostics = Vec::new();
        for name in analyzers.names() {
            match analyzers::run_builtin(name, module) {
                Some(found) => diagnostics.extend(found),
                None => tracing::warn!("Analyzer {} is not available, skipping", name),
            }
        }
        Ok(diagnostics)
    }

    fn environment(&self) -> String {
        LANGUAGE_VERSION.to_string()
    }

    fn name(&self) -> &str {
        "outline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> ParsedDocument {
        parse_document(&ProjectId::from("p"), &Document::new("/p/main.arb", content))
    }

    #[test]
    fn test_parse_statements() {
        let parsed = parse("// header\ndef alpha\n{\n  use beta\n}\n");
        assert!(parsed.is_clean());
        assert_eq!(parsed.statements, 4);
        assert_eq!(parsed.definitions[0].name, "alpha");
        assert_eq!(parsed.uses[0].name, "beta");
        assert_eq!(parsed.uses[0].line, 4);
        assert_eq!(parsed.uses[0].column, 3);
        assert_eq!(parsed.comments, vec![(1, "header".to_string())]);
    }

    #[test]
    fn test_parse_errors() {
        let parsed = parse("def alpha\n}\nlet x = 1\n{\n");
        let messages: Vec<_> = parsed.syntax_errors.iter().map(|d| (d.line, d.message.as_str())).collect();
        assert_eq!(
            messages,
            vec![
                (2, "unexpected `}`"),
                (3, "expected `def`, `use`, `{` or `}`, found `let x = 1`"),
                (4, "unclosed `{`"),
            ]
        );
    }

    #[test]
    fn test_invalid_identifier_is_syntax_error() {
        let parsed = parse("def 9lives\n");
        assert_eq!(parsed.syntax_errors.len(), 1);
        assert!(parsed.definitions.is_empty());
    }
}
