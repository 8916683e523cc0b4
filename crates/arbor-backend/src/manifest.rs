//! Project model loading from `arbor.toml` manifests
//!
//! ```toml
//! [[project]]
//! name = "core"
//! path = "core"
//! sources = ["src/**/*.arb"]
//!
//! [[project]]
//! name = "app"
//! path = "app"
//! references = ["core"]
//! metadata = ["stdlib"]
//! options = { strict = "true" }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arbor_core::{ProjectModel, ProjectNode};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::Deserialize;

use crate::bridge::ProjectModelProvider;

pub const MANIFEST_FILE: &str = "arbor.toml";
pub const DEFAULT_SOURCES: &str = "**/*.arb";

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default, rename = "project")]
    projects: Vec<ProjectEntry>,
}

#[derive(Debug, Deserialize)]
struct ProjectEntry {
    name: String,
    id: Option<String>,
    #[serde(default = "default_path")]
    path: PathBuf,
    #[serde(default = "default_sources")]
    sources: Vec<String>,
    #[serde(default)]
    references: Vec<String>,
    #[serde(default)]
    metadata: Vec<String>,
    #[serde(default)]
    options: BTreeMap<String, String>,
}

fn default_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_sources() -> Vec<String> {
    vec![DEFAULT_SOURCES.to_string()]
}

/// Loads project models from manifests on disk.
#[derive(Debug, Default, Clone)]
pub struct ManifestModelProvider;

impl ManifestModelProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ProjectModelProvider for ManifestModelProvider {
    async fn load_model(&self, root: &Path) -> Result<ProjectModel> {
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || load_manifest(&root))
            .await
            .context("Model loading task failed")?
    }

    async fn load_single_project(&self, path: &Path) -> Result<ProjectModel> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || load_directory(&path))
            .await
            .context("Model loading task failed")?
    }
}

fn load_manifest(root: &Path) -> Result<ProjectModel> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Workspace root {} does not exist", root.display()))?;
    let manifest_path = root.join(MANIFEST_FILE);
    let content = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("Failed to read {}", manifest_path.display()))?;
    let manifest: Manifest = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", manifest_path.display()))?;

    let mut projects = Vec::with_capacity(manifest.projects.len());
    for entry in manifest.projects {
        let dir = root.join(&entry.path);
        let globs = build_globset(&entry.sources)?;
        let mut node = ProjectNode::new(entry.id.unwrap_or_else(|| entry.name.clone()), entry.name);
        for path in discover_sources(&dir, &globs) {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            node = node.with_document(path, content);
        }
        node.project_references = entry.references.into_iter().map(Into::into).collect();
        node.metadata_references = entry.metadata;
        node.options = entry.options;

        tracing::debug!("Loaded project {} with {} documents", node.id, node.documents.len());
        projects.push(node);
    }

    tracing::info!("Loaded {} projects from {}", projects.len(), manifest_path.display());
    Ok(ProjectModel::new(root, projects))
}

fn load_directory(path: &Path) -> Result<ProjectModel> {
    let dir = path
        .canonicalize()
        .with_context(|| format!("Project directory {} does not exist", path.display()))?;
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string());

    let globs = build_globset(&default_sources())?;
    let mut node = ProjectNode::new(name.as_str(), name.as_str());
    for source in discover_sources(&dir, &globs) {
        let content = std::fs::read_to_string(&source)
            .with_context(|| format!("Failed to read {}", source.display()))?;
        node = node.with_document(source, content);
    }

    Ok(ProjectModel::new(dir, vec![node]))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid source glob {pattern}"))?);
    }
    Ok(builder.build()?)
}

/// Files under `dir` matching `globs`, respecting ignore files, sorted by path.
fn discover_sources(dir: &Path, globs: &GlobSet) -> Vec<PathBuf> {
    let walker = WalkBuilder::new(dir)
        .follow_links(true)
        .hidden(false)
        .git_ignore(true)
        .build();

    let mut paths: Vec<PathBuf> = walker
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(dir).ok()?;
            globs.is_match(relative).then(|| entry.path().to_path_buf())
        })
        .collect();
    paths.sort();
    paths
}
