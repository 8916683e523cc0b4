//! Compiler backend implementations

pub mod outline;

use std::sync::Arc;

use super::bridge::CompilerBackend;
use anyhow::Result;

/// Factory function to create compiler backends by name
pub fn create_backend(backend_name: &str) -> Result<Arc<dyn CompilerBackend>> {
    match backend_name {
        "outline" => Ok(Arc::new(outline::OutlineBackend::new())),
        _ => anyhow::bail!("Unknown compiler backend: {}", backend_name),
    }
}
