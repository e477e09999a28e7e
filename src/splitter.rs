//! # File Splitter
//!
//! Turns one file into a lazy sequence of line [`Record`]s. Records carry the
//! file's correlation id, a zero-based sequence number, and an `is_last` flag
//! on the final line (decided with one line of lookahead).
//!
//! Reading is blocking; the pipeline drives a [`LineRecords`] iterator from
//! `spawn_blocking` and forwards its items over a bounded channel.

use crate::constants::events;
use crate::error::{PipelineError, Result};
use crate::models::Record;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// End-of-stream report for one correlation id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitSummary {
    pub correlation_id: String,
    pub records_emitted: u64,
    /// False when reading stopped on an error
    pub end_of_stream: bool,
}

/// Stateless factory for per-file record iterators
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSplitter;

impl FileSplitter {
    pub fn new() -> Self {
        Self
    }

    /// Correlation id used for every record of `path`
    pub fn correlation_id_for(path: &Path) -> String {
        path.display().to_string()
    }

    /// Open `path` and return an iterator over its lines.
    ///
    /// Fails with `SourceRead` when the file cannot be opened; nothing is
    /// emitted for the correlation id in that case.
    pub fn split(
        &self,
        path: &Path,
        correlation_id: impl Into<String>,
    ) -> Result<LineRecords<BufReader<File>>> {
        let file = File::open(path)
            .map_err(|e| PipelineError::source_read(path.display().to_string(), e))?;
        let correlation_id = correlation_id.into();
        debug!(
            correlation_id = %correlation_id,
            path = %path.display(),
            "Splitting file into records"
        );
        Ok(LineRecords::new(correlation_id, BufReader::new(file)))
    }
}

/// Iterator of line records over any buffered reader
#[derive(Debug)]
pub struct LineRecords<R> {
    correlation_id: String,
    reader: R,
    /// Line read ahead of the one being returned
    pending: Option<String>,
    /// Read failure hit during lookahead, reported after the pending line
    deferred_error: Option<std::io::Error>,
    next_sequence: u64,
    started: bool,
    finished: bool,
    end_of_stream: bool,
}

impl<R: BufRead> LineRecords<R> {
    pub fn new(correlation_id: impl Into<String>, reader: R) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            reader,
            pending: None,
            deferred_error: None,
            next_sequence: 0,
            started: false,
            finished: false,
            end_of_stream: false,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Progress so far; `end_of_stream` is only set once the iterator is exhausted cleanly
    pub fn summary(&self) -> SplitSummary {
        SplitSummary {
            correlation_id: self.correlation_id.clone(),
            records_emitted: self.next_sequence,
            end_of_stream: self.end_of_stream,
        }
    }

    fn read_line(&mut self) -> std::io::Result<Option<String>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    fn read_error(&self, error: std::io::Error) -> PipelineError {
        PipelineError::source_read(self.correlation_id.clone(), error)
    }

    fn finish(&mut self) {
        self.finished = true;
        self.end_of_stream = true;
        debug!(
            correlation_id = %self.correlation_id,
            operation = events::FILE_SPLIT_COMPLETED,
            records_emitted = self.next_sequence,
            "File split completed"
        );
    }
}

impl<R: BufRead> Iterator for LineRecords<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if !self.started {
            self.started = true;
            match self.read_line() {
                Ok(Some(line)) => self.pending = Some(line),
                Ok(None) => {
                    self.finish();
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(self.read_error(e)));
                }
            }
        }

        let Some(current) = self.pending.take() else {
            // Only reached after a lookahead error was queued
            self.finished = true;
            return self.deferred_error.take().map(|e| Err(self.read_error(e)));
        };

        let is_last = match self.read_line() {
            Ok(Some(next)) => {
                self.pending = Some(next);
                false
            }
            Ok(None) => true,
            Err(e) => {
                // The current line is still good; report the failure on the next call
                self.deferred_error = Some(e);
                false
            }
        };

        let record = Record::new(
            self.correlation_id.clone(),
            self.next_sequence,
            current,
            is_last,
        );
        self.next_sequence += 1;
        if is_last {
            self.finish();
        }
        Some(Ok(record))
    }
}
