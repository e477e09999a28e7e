//! Directory polling source.

use super::filter::AcceptOnceFilter;
use crate::config::{ConfigurationError, SourceConfig};
use crate::constants::events;
use crate::error::{PipelineError, Result};
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct DirectorySource {
    directory: PathBuf,
    pattern: Pattern,
    filter: AcceptOnceFilter,
}

impl DirectorySource {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let pattern = Pattern::new(&config.file_pattern).map_err(|e| {
            ConfigurationError::invalid_value(
                "source.file_pattern",
                config.file_pattern.clone(),
                format!("not a valid glob: {e}"),
            )
        })?;

        Ok(Self {
            directory: config.watch_directory.clone(),
            pattern,
            filter: AcceptOnceFilter::new(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Paths handed out so far
    pub fn seen(&self) -> usize {
        self.filter.len()
    }

    /// Scan once and return new matching regular files, ordered by file name.
    ///
    /// Each path is returned by at most one call. A missing or unreadable
    /// directory is reported as `SourceRead`; nothing is marked as seen then.
    pub async fn poll(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.directory)
            .await
            .map_err(|e| PipelineError::source_read(self.directory.display().to_string(), e))?;

        let mut candidates = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(PipelineError::source_read(
                        self.directory.display().to_string(),
                        e,
                    ))
                }
            };

            let path = entry.path();
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| self.pattern.matches(name));
            if !matches || self.filter.contains(&path) {
                continue;
            }

            // Follows symlinks; anything that vanished meanwhile is skipped
            match tokio::fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => candidates.push(path),
                Ok(_) => {}
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Skipping file that disappeared during scan"
                ),
            }
        }

        candidates.sort();
        let discovered: Vec<PathBuf> = candidates
            .into_iter()
            .filter(|path| self.filter.accept(path))
            .collect();

        for path in &discovered {
            debug!(
                path = %path.display(),
                operation = events::FILE_DISCOVERED,
                "File discovered"
            );
        }
        Ok(discovered)
    }
}
