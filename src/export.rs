use crate::archive::{self, ArchiveError};
use crate::config::Config;
use crate::model::{fresh_id, is_default_image, Resource};
use crate::snapshot::{self, SnapshotError};
use crate::store::{ElectionStore, StoreError};
use crate::util::TempWorkDir;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("election {0} not found")]
    ElectionNotFound(String),
    #[error("image file missing for {owner}: {path}")]
    MissingImage { owner: String, path: PathBuf },
}

pub type Result<T> = std::result::Result<T, ExportError>;

/// Extract a subset of an election's polls (with their candidates and
/// uploaded images) into a standalone archive under the export temp
/// directory. Returns the archive path.
///
/// The working directory is scoped: it is removed whether or not packing
/// succeeds.
pub async fn export_election(
    store: &ElectionStore,
    config: &Config,
    election_id: &str,
    poll_ids: &HashSet<String>,
) -> Result<PathBuf> {
    let tree = store
        .election(election_id)
        .await?
        .ok_or_else(|| ExportError::ElectionNotFound(election_id.to_string()))?;

    let mut records: Vec<Resource> = vec![Resource::Election(tree.election.clone())];
    let mut image_owners: Vec<(String, String)> = Vec::new();
    if !is_default_image(&tree.election.image) {
        image_owners.push((tree.election.id.clone(), tree.election.image.clone()));
    }

    for poll_tree in &tree.polls {
        if !poll_ids.contains(&poll_tree.poll.id) {
            continue;
        }
        if let Some(image) = &poll_tree.poll.image {
            if !is_default_image(image) {
                image_owners.push((poll_tree.poll.id.clone(), image.clone()));
            }
        }
        records.push(Resource::Poll(poll_tree.poll.clone()));
        for candidate in &poll_tree.candidates {
            if !is_default_image(&candidate.image) {
                image_owners.push((candidate.id.clone(), candidate.image.clone()));
            }
            records.push(Resource::Candidate(candidate.clone()));
        }
    }

    let workdir = TempWorkDir::create(&config.export_temp).await?;

    let snapshot_path = workdir.path().join(format!("export{}.db", fresh_id()));
    snapshot::write_records(&snapshot_path, &records).await?;

    let images_dir = workdir.path().join("images");
    tokio::fs::create_dir_all(&images_dir).await?;
    for (owner, image) in &image_owners {
        copy_image(config, &images_dir, owner, image).await?;
    }

    let zip_path = config.export_temp.join(format!(
        "export_{}_{}.zip",
        tree.election.name.replace(' ', "_"),
        fresh_id()
    ));
    archive::pack(&snapshot_path, &config.users_file, &images_dir, &zip_path).await?;

    Ok(zip_path)
}

async fn copy_image(
    config: &Config,
    images_dir: &Path,
    owner: &str,
    image: &str,
) -> Result<()> {
    let file_name = Path::new(image)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ExportError::MissingImage {
            owner: owner.to_string(),
            path: PathBuf::from(image),
        })?;
    let src = config.images_dir.join(file_name);
    match tokio::fs::copy(&src, images_dir.join(file_name)).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ExportError::MissingImage {
            owner: owner.to_string(),
            path: src,
        }),
        Err(e) => Err(e.into()),
    }
}
