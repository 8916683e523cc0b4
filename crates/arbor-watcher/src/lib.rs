//! Folds on-disk changes into live sessions

pub mod watcher;

pub use watcher::{FileWatcher, SessionWatcher, WatchEvent, WatchOutcome, apply_event};
