//! Session-scoped compilation cache with single-flight builds
//!
//! Artifacts are memoized per (session, project) and validated against a
//! fingerprint of every input that affects them. Concurrent requests for the
//! same key share one compile.

pub mod cache;
pub mod eviction;


pub use cache::{BuildContext, CacheStats, CompilationCache};
