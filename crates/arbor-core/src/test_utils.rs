//! Test utilities for Arbor core

use crate::model::{ProjectModel, ProjectNode};
use std::fs;
use tempfile::TempDir;

/// Build a project with one document per project and the given references.
pub fn project(id: &str, references: &[&str]) -> ProjectNode {
    let mut node = ProjectNode::new(id, id.to_uppercase())
        .with_document(format!("/repo/{id}/main.arb"), format!("def {id}_main\n"));
    for reference in references {
        node = node.with_reference(*reference);
    }
    node
}

/// A ← B ← C: B depends on A, C depends on B.
pub fn chain_model() -> ProjectModel {
    ProjectModel::new(
        "/repo",
        vec![project("a", &[]), project("b", &["a"]), project("c", &["b"])],
    )
}

/// base ← {left, right} ← top
pub fn diamond_model() -> ProjectModel {
    ProjectModel::new(
        "/repo",
        vec![
            project("top", &["left", "right"]),
            project("left", &["base"]),
            project("right", &["base"]),
            project("base", &[]),
        ],
    )
}

/// Create a temporary directory populated with the given files.
pub fn create_repo_with_structure(structure: &[(&str, &str)]) -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();

    for (path, content) in structure {
        let full_path = root.join(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&full_path, content).unwrap();
    }

    temp_dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_repo_with_structure() {
        let temp_dir = create_repo_with_structure(&[("engine.toml", ""), ("nested/a.arb", "def a")]);
        assert!(temp_dir.path().join("engine.toml").exists());
        assert!(temp_dir.path().join("nested/a.arb").exists());
    }

    #[test]
    fn test_chain_model_shape() {
        let model = chain_model();
        assert_eq!(model.projects.len(), 3);
        assert_eq!(model.document_count(), 3);
    }
}
