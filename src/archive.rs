use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// Zip packaging of booth snapshots. Packing is deterministic in content,
/// not in byte layout; unpacking trusts the payload format.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to pack archive {path}: {reason}")]
    Pack { path: PathBuf, reason: String },
    #[error("failed to unpack archive {path}: {reason}")]
    Unpack { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    fn pack(path: &Path, reason: impl ToString) -> Self {
        ArchiveError::Pack {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    fn unpack(path: &Path, reason: impl ToString) -> Self {
        ArchiveError::Unpack {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Build an archive holding the primary snapshot file and the auxiliary file
/// at top level, plus every file of `images_dir` under `images/`.
///
/// The archive is written to a `.part` sibling first and renamed into place,
/// so a failure never leaves a partial archive at `dest`.
pub async fn pack(primary: &Path, aux: &Path, images_dir: &Path, dest: &Path) -> Result<()> {
    let primary = primary.to_path_buf();
    let aux = aux.to_path_buf();
    let images_dir = images_dir.to_path_buf();
    let dest_owned = dest.to_path_buf();

    let outcome = tokio::task::spawn_blocking(move || {
        pack_sync(&primary, &aux, &images_dir, &dest_owned)
    })
    .await
    .map_err(|e| ArchiveError::pack(dest, e))?;

    outcome.map_err(|reason| ArchiveError::pack(dest, reason))
}

fn pack_sync(
    primary: &Path,
    aux: &Path,
    images_dir: &Path,
    dest: &Path,
) -> std::result::Result<(), String> {
    let part = partial_path(dest);
    let result = write_zip(primary, aux, images_dir, &part)
        .and_then(|_| std::fs::rename(&part, dest).map_err(|e| e.to_string()));
    if result.is_err() {
        let _ = std::fs::remove_file(&part);
    }
    result
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn write_zip(
    primary: &Path,
    aux: &Path,
    images_dir: &Path,
    part: &Path,
) -> std::result::Result<(), String> {
    let file = File::create(part).map_err(|e| e.to_string())?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default();

    for source in [primary, aux] {
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("not a file path: {}", source.display()))?;
        writer.start_file(name, options).map_err(|e| e.to_string())?;
        let mut input = File::open(source).map_err(|e| e.to_string())?;
        io::copy(&mut input, &mut writer).map_err(|e| e.to_string())?;
    }

    for entry in std::fs::read_dir(images_dir).map_err(|e| e.to_string())? {
        let entry = entry.map_err(|e| e.to_string())?;
        if !entry.file_type().map_err(|e| e.to_string())?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name
            .to_str()
            .ok_or_else(|| format!("non-UTF-8 image name in {}", images_dir.display()))?;
        writer
            .start_file(format!("images/{}", name), options)
            .map_err(|e| e.to_string())?;
        let mut input = File::open(entry.path()).map_err(|e| e.to_string())?;
        io::copy(&mut input, &mut writer).map_err(|e| e.to_string())?;
    }

    writer.finish().map_err(|e| e.to_string())?;
    Ok(())
}

/// Extract every entry of `archive` into `dest_dir`, creating it if absent.
pub async fn unpack_all(archive: &Path, dest_dir: &Path) -> Result<()> {
    let archive_owned = archive.to_path_buf();
    let dest = dest_dir.to_path_buf();

    let outcome = tokio::task::spawn_blocking(move || -> std::result::Result<(), String> {
        std::fs::create_dir_all(&dest).map_err(|e| e.to_string())?;
        let file = File::open(&archive_owned).map_err(|e| e.to_string())?;
        let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| e.to_string())?;
        zip.extract(&dest).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| ArchiveError::unpack(archive, e))?;

    outcome.map_err(|reason| ArchiveError::unpack(archive, reason))
}

/// Extract the first (and expectedly only) entry of `archive` to
/// `dest_without_ext`, preserving the entry's original extension. Returns
/// the final path. An archive with zero entries is an error.
pub async fn unpack_single_file(archive: &Path, dest_without_ext: &Path) -> Result<PathBuf> {
    let archive_owned = archive.to_path_buf();
    let dest = dest_without_ext.to_path_buf();

    let outcome = tokio::task::spawn_blocking(move || -> std::result::Result<PathBuf, String> {
        let file = File::open(&archive_owned).map_err(|e| e.to_string())?;
        let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|e| e.to_string())?;
        if zip.len() == 0 {
            return Err("archive has no entries".to_string());
        }
        let mut entry = zip.by_index(0).map_err(|e| e.to_string())?;
        let final_path = match Path::new(entry.name()).extension() {
            Some(ext) => dest.with_extension(ext),
            None => dest.clone(),
        };
        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let mut out = File::create(&final_path).map_err(|e| e.to_string())?;
        io::copy(&mut entry, &mut out).map_err(|e| e.to_string())?;
        Ok(final_path)
    })
    .await
    .map_err(|e| ArchiveError::unpack(archive, e))?;

    outcome.map_err(|reason| ArchiveError::unpack(archive, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fresh_id;
    use crate::util::TempWorkDir;

    async fn scratch() -> TempWorkDir {
        let root = std::env::temp_dir().join("edison-merge-tests");
        TempWorkDir::create(&root).await.unwrap()
    }

    #[tokio::test]
    async fn pack_then_unpack_reproduces_the_file_set() {
        let dir = scratch().await;
        let primary = dir.path().join("export.db");
        let aux = dir.path().join("user.json");
        let images = dir.path().join("images");
        tokio::fs::write(&primary, b"{\"type\":\"election\"}\n")
            .await
            .unwrap();
        tokio::fs::write(&aux, b"{}").await.unwrap();
        tokio::fs::create_dir_all(&images).await.unwrap();
        tokio::fs::write(images.join("a.jpg"), b"jpegbytes")
            .await
            .unwrap();
        tokio::fs::write(images.join("b.png"), b"pngbytes")
            .await
            .unwrap();

        let zip_path = dir.path().join("out.zip");
        pack(&primary, &aux, &images, &zip_path).await.unwrap();

        let unpacked = dir.path().join("unpacked");
        unpack_all(&zip_path, &unpacked).await.unwrap();

        assert_eq!(
            tokio::fs::read(unpacked.join("export.db")).await.unwrap(),
            b"{\"type\":\"election\"}\n"
        );
        assert_eq!(tokio::fs::read(unpacked.join("user.json")).await.unwrap(), b"{}");
        assert_eq!(
            tokio::fs::read(unpacked.join("images/a.jpg")).await.unwrap(),
            b"jpegbytes"
        );
        assert_eq!(
            tokio::fs::read(unpacked.join("images/b.png")).await.unwrap(),
            b"pngbytes"
        );
    }

    #[tokio::test]
    async fn single_file_extraction_keeps_the_extension() {
        let dir = scratch().await;
        let primary = dir.path().join("booth.db");
        let aux = dir.path().join("user.json");
        let images = dir.path().join("images");
        tokio::fs::write(&primary, b"records").await.unwrap();
        tokio::fs::write(&aux, b"{}").await.unwrap();
        tokio::fs::create_dir_all(&images).await.unwrap();

        let zip_path = dir.path().join("booth.zip");
        pack(&primary, &aux, &images, &zip_path).await.unwrap();

        let dest = dir.path().join(fresh_id());
        let extracted = unpack_single_file(&zip_path, &dest).await.unwrap();
        assert_eq!(extracted.extension().unwrap(), "db");
        assert_eq!(tokio::fs::read(&extracted).await.unwrap(), b"records");
    }

    #[tokio::test]
    async fn corrupt_archive_fails_to_unpack() {
        let dir = scratch().await;
        let bogus = dir.path().join("bogus.zip");
        tokio::fs::write(&bogus, b"this is not a zip").await.unwrap();
        let err = unpack_all(&bogus, &dir.path().join("out")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Unpack { .. }));
    }

    #[tokio::test]
    async fn failed_pack_leaves_no_archive_behind() {
        let dir = scratch().await;
        let missing = dir.path().join("missing.db");
        let aux = dir.path().join("user.json");
        tokio::fs::write(&aux, b"{}").await.unwrap();
        let images = dir.path().join("images");
        tokio::fs::create_dir_all(&images).await.unwrap();

        let zip_path = dir.path().join("out.zip");
        let err = pack(&missing, &aux, &images, &zip_path).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Pack { .. }));
        assert!(!zip_path.exists());
        assert!(!partial_path(&zip_path).exists());
    }
}
