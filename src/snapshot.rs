use crate::model::Resource;
use std::path::{Path, PathBuf};

/// A booth snapshot is a newline-delimited JSON file: one resource record
/// per line, in insertion order.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("cannot open snapshot store {0}: {1}")]
    Unreadable(PathBuf, #[source] std::io::Error),
    #[error("corrupt record in {0} at line {1}: {2}")]
    Corrupt(PathBuf, usize, #[source] serde_json::Error),
    #[error("cannot write snapshot store {0}: {1}")]
    WriteFailed(PathBuf, #[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Read every record of a snapshot store, preserving insertion order.
/// Merge-order downstream depends on this ordering being stable.
pub async fn read_records(path: &Path) -> Result<Vec<Resource>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SnapshotError::Unreadable(path.to_path_buf(), e))?;

    let mut records = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: Resource = serde_json::from_str(line)
            .map_err(|e| SnapshotError::Corrupt(path.to_path_buf(), index + 1, e))?;
        records.push(record);
    }
    Ok(records)
}

/// Write records as a snapshot store, one JSON record per line.
pub async fn write_records(path: &Path, records: &[Resource]) -> Result<()> {
    let mut out = String::new();
    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| SnapshotError::Corrupt(path.to_path_buf(), 0, e))?;
        out.push_str(&line);
        out.push('\n');
    }
    tokio::fs::write(path, out)
        .await
        .map_err(|e| SnapshotError::WriteFailed(path.to_path_buf(), e))
}
