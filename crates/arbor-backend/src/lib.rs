//! Collaborators behind the Arbor engine
//!
//! This crate defines the interfaces the engine compiles, loads projects,
//! resolves analyzers and writes files through, together with reference
//! implementations of each and test doubles for the engine's own tests.

pub mod analyzers;
pub mod bridge;
pub mod fs;
pub mod manifest;
pub mod providers;
pub mod testing;


pub use analyzers::BuiltinAnalyzerLoader;
pub use bridge::*;
pub use fs::TokioFileSystem;
pub use manifest::ManifestModelProvider;
pub use providers::{create_backend, outline::OutlineBackend};
