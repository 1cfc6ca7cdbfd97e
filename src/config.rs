use std::path::{Path, PathBuf};

/// Well-known paths of the application data directory.
///
/// Everything the engine touches on disk lives under one root: the canonical
/// resource store, the merge store, the images directory and the temp
/// directories used while unpacking and exporting archives.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Uploaded image files, stored by generated id + original extension.
    pub images_dir: PathBuf,
    /// Root of all merge artifacts.
    pub merges_dir: PathBuf,
    /// Scratch space for unpacked booth archives.
    pub merge_temp: PathBuf,
    /// Scratch space for export working directories and finished archives.
    pub export_temp: PathBuf,
    /// Opaque user-auth metadata packed into every export archive.
    pub users_file: PathBuf,
    /// Canonical resource store database.
    pub elections_db: PathBuf,
    /// Merge store database.
    pub merge_db: PathBuf,
}

impl Config {
    pub fn from_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Config {
            images_dir: data_dir.join("images"),
            merges_dir: data_dir.join("merges"),
            merge_temp: data_dir.join("merges").join("merge-temp"),
            export_temp: data_dir.join("merges").join("export-temp"),
            users_file: data_dir.join("user.json"),
            elections_db: data_dir.join("data.sqlite3"),
            merge_db: data_dir.join("merges").join("merge.sqlite3"),
            data_dir,
        }
    }

    /// `$HOME/.edison-merge`, falling back to the working directory when no
    /// home is set.
    pub fn default_data_dir() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".edison-merge")
    }

    /// Create every directory the engine relies on, plus an empty users file
    /// if none exists yet.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [
            &self.data_dir,
            &self.images_dir,
            &self.merges_dir,
            &self.merge_temp,
            &self.export_temp,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        if tokio::fs::metadata(&self.users_file).await.is_err() {
            tokio::fs::write(&self.users_file, b"{}").await?;
        }
        Ok(())
    }

    /// Connection URL for a SQLite database file, created on first open.
    pub fn sqlite_url(path: &Path) -> String {
        format!("sqlite:{}?mode=rwc", path.display())
    }
}
