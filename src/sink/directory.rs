//! Sink that persists each batch as a JSON document.

use super::BatchSink;
use crate::error::{PipelineError, Result};
use crate::models::Batch;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Writes `<output_directory>/<file stem>-<batch_id>.json` per batch
#[derive(Debug, Clone)]
pub struct DirectorySink {
    output_directory: PathBuf,
}

impl DirectorySink {
    /// Create the sink, creating the output directory if needed
    pub fn new(output_directory: impl Into<PathBuf>) -> Result<Self> {
        let output_directory = output_directory.into();
        std::fs::create_dir_all(&output_directory)?;
        Ok(Self { output_directory })
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// Target file for a batch
    pub fn path_for(&self, batch: &Batch) -> PathBuf {
        let stem = Path::new(&batch.correlation_id)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("batch");
        self.output_directory
            .join(format!("{stem}-{}.json", batch.batch_id))
    }
}

#[async_trait]
impl BatchSink for DirectorySink {
    fn name(&self) -> &str {
        "directory"
    }

    async fn accept(&self, batch: &Batch) -> Result<()> {
        let rejected =
            |reason: String| PipelineError::sink_rejected(&batch.correlation_id, batch.batch_id, reason);

        let body = serde_json::to_vec_pretty(batch)
            .map_err(|e| rejected(format!("failed to serialize batch: {e}")))?;
        let path = self.path_for(batch);
        tokio::fs::write(&path, body)
            .await
            .map_err(|e| rejected(format!("failed to write {}: {e}", path.display())))?;

        debug!(
            correlation_id = %batch.correlation_id,
            batch_id = %batch.batch_id,
            path = %path.display(),
            "Batch written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Record, ReleaseReason};

    fn batch() -> Batch {
        Batch::from_release(
            "input/orders.txt",
            vec![
                Record::new("input/orders.txt", 1, "second", true),
                Record::new("input/orders.txt", 0, "first", false),
            ],
            ReleaseReason::CountThreshold,
        )
    }

    #[tokio::test]
    async fn test_writes_batch_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("out")).unwrap();
        let batch = batch();

        sink.accept(&batch).await.unwrap();

        let path = sink.path_for(&batch);
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("orders-"));
        let written: Batch = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(written, batch);
        assert_eq!(written.payloads(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_write_failure_is_sink_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("out")).unwrap();
        std::fs::remove_dir(sink.output_directory()).unwrap();

        let err = sink.accept(&batch()).await.unwrap_err();
        assert!(matches!(err, PipelineError::SinkRejected { .. }));
    }
}
