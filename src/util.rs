use crate::model::fresh_id;
use std::path::{Path, PathBuf};

/// A uniquely-named working directory that is removed when dropped, so
/// cleanup happens on every exit path of an operation, including errors.
pub struct TempWorkDir {
    path: PathBuf,
}

impl TempWorkDir {
    pub async fn create(root: &Path) -> std::io::Result<Self> {
        let path = root.join(fresh_id());
        tokio::fs::create_dir_all(&path).await?;
        Ok(TempWorkDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempWorkDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}
