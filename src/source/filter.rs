//! In-memory accept-once filter for discovered paths.

use dashmap::DashSet;
use std::path::{Path, PathBuf};

/// Remembers every path it has accepted. Not persisted across restarts.
#[derive(Debug, Default)]
pub struct AcceptOnceFilter {
    seen: DashSet<PathBuf>,
}

impl AcceptOnceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time a path is offered, `false` afterwards
    pub fn accept(&self, path: &Path) -> bool {
        self.seen.insert(path.to_path_buf())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.seen.contains(path)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
