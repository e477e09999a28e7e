use serde::{Deserialize, Serialize};

/// One line of a source file, tagged for correlation.
///
/// Records are immutable once the splitter has produced them. `sequence` is
/// zero-based and strictly increasing within a correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub correlation_id: String,
    pub sequence: u64,
    pub payload: String,
    /// Set on the final record of a file
    pub is_last: bool,
}

impl Record {
    pub fn new(
        correlation_id: impl Into<String>,
        sequence: u64,
        payload: impl Into<String>,
        is_last: bool,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            sequence,
            payload: payload.into(),
            is_last,
        }
    }
}
