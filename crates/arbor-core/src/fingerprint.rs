//! Content fingerprints for cache staleness detection.
//!
//! A fingerprint is an XXH3-128 digest over every input that affects a
//! project's compiled output. Each field is tagged and length-prefixed so
//! that moving bytes between adjacent fields always changes the digest.

use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::model::{ProjectId, ProjectNode};

/// A 128-bit digest of a set of inputs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Fingerprint a single byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(xxhash_rust::xxh3::xxh3_128(data).to_le_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:02x}{:02x}{:02x}{:02x}..)", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Streaming builder for structured fingerprints.
pub struct FingerprintBuilder {
    hasher: Xxh3,
}

impl FingerprintBuilder {
    /// Start a fingerprint in the given domain.
    pub fn new(domain: &str) -> Self {
        let mut builder = FingerprintBuilder { hasher: Xxh3::new() };
        builder.str(domain);
        builder
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.hasher.update(&(data.len() as u64).to_le_bytes());
        self.hasher.update(data);
        self
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.bytes(value.as_bytes())
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.hasher.update(&value.to_le_bytes());
        self
    }

    pub fn fingerprint(&mut self, value: &Fingerprint) -> &mut Self {
        self.hasher.update(&value.0);
        self
    }

    pub fn finish(&self) -> Fingerprint {
        Fingerprint(self.hasher.digest128().to_le_bytes())
    }
}

/// Fingerprint of everything that affects a project's compiled output.
///
/// `environment` carries backend state outside the project itself (version,
/// locale, ...). `dependencies` are the fingerprints of the projects this one
/// compiles against, in reference order.
pub fn project_fingerprint(
    project: &ProjectNode,
    environment: &str,
    dependencies: &[(ProjectId, Fingerprint)],
) -> Fingerprint {
    let mut builder = FingerprintBuilder::new("project");
    builder.str(project.id.as_str()).str(&project.name);

    builder.str("options").u64(project.options.len() as u64);
    for (key, value) in &project.options {
        builder.str(key).str(value);
    }

    builder.str("documents").u64(project.documents.len() as u64);
    for document in &project.documents {
        builder
            .str(&document.path.to_string_lossy())
            .str(&document.content);
    }

    builder.str("references").u64(project.project_references.len() as u64);
    for reference in &project.project_references {
        builder.str(reference.as_str());
    }

    builder.str("metadata").u64(project.metadata_references.len() as u64);
    for reference in &project.metadata_references {
        builder.str(reference);
    }

    builder.str("environment").str(environment);

    builder.str("dependencies").u64(dependencies.len() as u64);
    for (id, fingerprint) in dependencies {
        builder.str(id.as_str()).fingerprint(fingerprint);
    }

    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProjectNode {
        ProjectNode::new("core", "Core")
            .with_document("/repo/core/a.arb", "def alpha")
            .with_document("/repo/core/b.arb", "use alpha")
            .with_reference("util")
            .with_metadata_reference("std")
            .with_option("strict", "true")
    }

    #[test]
    fn deterministic() {
        let project = sample();
        assert_eq!(
            project_fingerprint(&project, "env", &[]),
            project_fingerprint(&project, "env", &[])
        );
    }

    #[test]
    fn document_content_changes_fingerprint() {
        let before = sample();
        let mut after = sample();
        after.documents[1].content.push_str("\nuse beta");
        assert_ne!(
            project_fingerprint(&before, "env", &[]),
            project_fingerprint(&after, "env", &[])
        );
    }

    #[test]
    fn document_order_changes_fingerprint() {
        let before = sample();
        let mut after = sample();
        after.documents.reverse();
        assert_ne!(
            project_fingerprint(&before, "env", &[]),
            project_fingerprint(&after, "env", &[])
        );
    }

    #[test]
    fn every_input_participates() {
        let base = project_fingerprint(&sample(), "env", &[]);

        let with_reference = sample().with_reference("other");
        let with_metadata = sample().with_metadata_reference("core-lib");
        let with_option = sample().with_option("strict", "false");

        assert_ne!(base, project_fingerprint(&with_reference, "env", &[]));
        assert_ne!(base, project_fingerprint(&with_metadata, "env", &[]));
        assert_ne!(base, project_fingerprint(&with_option, "env", &[]));
        assert_ne!(base, project_fingerprint(&sample(), "env-2", &[]));

        let dependency = (ProjectId::from("util"), Fingerprint::from_bytes(b"util"));
        assert_ne!(base, project_fingerprint(&sample(), "env", &[dependency]));
    }

    #[test]
    fn field_boundaries_are_unambiguous() {
        let a = ProjectNode::new("p", "P").with_document("/x", "ab");
        let b = ProjectNode::new("p", "P").with_document("/xa", "b");
        assert_ne!(
            project_fingerprint(&a, "", &[]),
            project_fingerprint(&b, "", &[])
        );
    }

    #[test]
    fn display_is_hex() {
        let fingerprint = Fingerprint::from_bytes(b"test");
        let text = fingerprint.to_string();
        assert_eq!(text.len(), 32);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
