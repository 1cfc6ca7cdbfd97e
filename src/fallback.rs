use crate::config::Config;
use crate::model::{
    fresh_id, is_default_image, Candidate, Election, Image, Merge, Poll, Resource, FALLBACK_NONE,
};
use crate::store::{ElectionStore, StoreError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum FallbackError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("merge has no election tree to copy")]
    EmptyMerge,
    #[error("candidate {id} falls back to unknown poll {target}")]
    UnknownFallback { id: String, target: String },
    #[error("image file missing for {owner}: {path}")]
    MissingImage { owner: String, path: PathBuf },
}

pub type Result<T> = std::result::Result<T, FallbackError>;

/// Produce the next election round from a merge outcome.
///
/// Every record of the new round gets a fresh id. In polls flagged for
/// fallback, winning candidates keep their (renumbered) poll while
/// non-winners with a configured fallback move to the new id of that poll,
/// their own fallback reset to the sentinel. Vote counts start at zero.
/// Uploaded images are duplicated under new names; the source round is
/// never touched.
///
/// The new tree is inserted as one batch, and a missing or uncopyable image
/// aborts the copy before anything is inserted.
pub async fn fallback_copy(
    store: &ElectionStore,
    config: &Config,
    merge: &Merge,
    fallback_polls: &HashSet<String>,
) -> Result<String> {
    let tree = merge.merged.as_ref().ok_or(FallbackError::EmptyMerge)?;

    let new_election_id = fresh_id();

    // Pass one: every poll gets its new id up front, so candidate fallback
    // references can be remapped before candidates are finalised.
    let poll_ids: HashMap<&str, String> = tree
        .polls
        .iter()
        .map(|p| (p.poll.id.as_str(), fresh_id()))
        .collect();

    // Pass two: renumber polls and route candidates.
    let mut new_polls: Vec<Poll> = Vec::new();
    let mut new_candidates: Vec<Candidate> = Vec::new();

    for poll_tree in &tree.polls {
        let old_poll_id = poll_tree.poll.id.as_str();
        new_polls.push(Poll {
            id: poll_ids[old_poll_id].clone(),
            parent_id: new_election_id.clone(),
            ..poll_tree.poll.clone()
        });

        let winner_ids: HashSet<&str> = poll_tree.winners.iter().map(|w| w.id.as_str()).collect();
        let flagged = fallback_polls.contains(old_poll_id);

        for candidate in &poll_tree.candidates {
            let redirect = flagged
                && !winner_ids.contains(candidate.id.as_str())
                && candidate.fallback != FALLBACK_NONE;

            let (parent_id, fallback) = if redirect {
                let target = poll_ids.get(candidate.fallback.as_str()).ok_or_else(|| {
                    FallbackError::UnknownFallback {
                        id: candidate.id.clone(),
                        target: candidate.fallback.clone(),
                    }
                })?;
                (target.clone(), FALLBACK_NONE.to_string())
            } else {
                let fallback = if candidate.fallback == FALLBACK_NONE {
                    FALLBACK_NONE.to_string()
                } else {
                    poll_ids
                        .get(candidate.fallback.as_str())
                        .ok_or_else(|| FallbackError::UnknownFallback {
                            id: candidate.id.clone(),
                            target: candidate.fallback.clone(),
                        })?
                        .clone()
                };
                (poll_ids[old_poll_id].clone(), fallback)
            };

            new_candidates.push(Candidate {
                id: fresh_id(),
                name: candidate.name.clone(),
                image: candidate.image.clone(),
                votes: 0,
                parent_id,
                fallback,
                fallback_name: None,
            });
        }
    }

    let mut new_election = Election {
        id: new_election_id.clone(),
        name: format!("{} (after fallback)", tree.election.name),
        ..tree.election.clone()
    };

    // Pass three: duplicate uploaded image files for the new owners.
    let mut new_images: Vec<Image> = Vec::new();
    let mut copied: Vec<PathBuf> = Vec::new();
    let result = duplicate_images(
        config,
        &mut new_election,
        &mut new_candidates,
        &mut new_images,
        &mut copied,
    )
    .await;
    if let Err(err) = result {
        remove_files(&copied).await;
        return Err(err);
    }

    let mut resources: Vec<Resource> = Vec::with_capacity(
        1 + new_polls.len() + new_candidates.len() + new_images.len(),
    );
    resources.push(Resource::Election(new_election));
    resources.extend(new_polls.into_iter().map(Resource::Poll));
    resources.extend(new_candidates.into_iter().map(Resource::Candidate));
    resources.extend(new_images.into_iter().map(Resource::Image));

    if let Err(err) = store.insert_resources(&resources).await {
        remove_files(&copied).await;
        return Err(err.into());
    }

    Ok(new_election_id)
}

async fn duplicate_images(
    config: &Config,
    election: &mut Election,
    candidates: &mut [Candidate],
    new_images: &mut Vec<Image>,
    copied: &mut Vec<PathBuf>,
) -> Result<()> {
    if !is_default_image(&election.image) {
        let owner = election.id.clone();
        election.image =
            duplicate_one(config, &owner, &election.image, new_images, copied).await?;
    }
    for candidate in candidates {
        if !is_default_image(&candidate.image) {
            let owner = candidate.id.clone();
            candidate.image =
                duplicate_one(config, &owner, &candidate.image, new_images, copied).await?;
        }
    }
    Ok(())
}

/// Copy one uploaded image under a freshly generated file name and record
/// the new Image resource. Returns the new image path for the owner record.
async fn duplicate_one(
    config: &Config,
    owner_id: &str,
    image_path: &str,
    new_images: &mut Vec<Image>,
    copied: &mut Vec<PathBuf>,
) -> Result<String> {
    let file_name = Path::new(image_path)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FallbackError::MissingImage {
            owner: owner_id.to_string(),
            path: PathBuf::from(image_path),
        })?;
    let src = config.images_dir.join(file_name);

    let new_name = match Path::new(file_name).extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}", fresh_id(), ext),
        None => fresh_id(),
    };
    let dest = config.images_dir.join(&new_name);

    match tokio::fs::copy(&src, &dest).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FallbackError::MissingImage {
                owner: owner_id.to_string(),
                path: src,
            });
        }
        Err(e) => return Err(e.into()),
    }

    copied.push(dest);
    new_images.push(Image {
        id: new_name.clone(),
        resource_id: owner_id.to_string(),
    });
    Ok(format!("/images/{}", new_name))
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        let _ = tokio::fs::remove_file(path).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::build_merge;
    use crate::model::{DEFAULT_CANDIDATE_IMAGE, DEFAULT_ELECTION_IMAGE};
    use crate::util::TempWorkDir;

    fn records(candidate_a_image: &str) -> Vec<Resource> {
        vec![
            Resource::Election(Election {
                id: "e1".into(),
                name: "School Council".into(),
                caption: "2026".into(),
                image: DEFAULT_ELECTION_IMAGE.into(),
                color: "black".into(),
            }),
            Resource::Poll(Poll {
                id: "p1".into(),
                name: "Prefect".into(),
                caption: "".into(),
                color: "#404040".into(),
                image: None,
                parent_id: "e1".into(),
            }),
            Resource::Poll(Poll {
                id: "p2".into(),
                name: "Captain".into(),
                caption: "".into(),
                color: "#404040".into(),
                image: None,
                parent_id: "e1".into(),
            }),
            Resource::Candidate(Candidate {
                id: "a".into(),
                name: "Ada".into(),
                image: candidate_a_image.into(),
                votes: 10,
                parent_id: "p1".into(),
                fallback: "p2".into(),
                fallback_name: None,
            }),
            Resource::Candidate(Candidate {
                id: "b".into(),
                name: "Grace".into(),
                image: DEFAULT_CANDIDATE_IMAGE.into(),
                votes: 5,
                parent_id: "p1".into(),
                fallback: "p2".into(),
                fallback_name: None,
            }),
            Resource::Candidate(Candidate {
                id: "c".into(),
                name: "Edsger".into(),
                image: DEFAULT_CANDIDATE_IMAGE.into(),
                votes: 3,
                parent_id: "p1".into(),
                fallback: FALLBACK_NONE.into(),
                fallback_name: None,
            }),
            Resource::Candidate(Candidate {
                id: "d".into(),
                name: "Alan".into(),
                image: DEFAULT_CANDIDATE_IMAGE.into(),
                votes: 7,
                parent_id: "p2".into(),
                fallback: FALLBACK_NONE.into(),
                fallback_name: None,
            }),
        ]
    }

    async fn setup(candidate_a_image: &str) -> (TempWorkDir, Config, ElectionStore, Merge) {
        let scratch = TempWorkDir::create(&std::env::temp_dir().join("edison-merge-tests"))
            .await
            .unwrap();
        let config = Config::from_data_dir(scratch.path());
        config.ensure_dirs().await.unwrap();
        let store = ElectionStore::in_memory().await.unwrap();
        let merge = build_merge(records(candidate_a_image)).unwrap();
        (scratch, config, store, merge)
    }

    #[tokio::test]
    async fn non_winner_moves_one_hop_to_its_fallback_poll() {
        let (_scratch, config, store, merge) = setup(DEFAULT_CANDIDATE_IMAGE).await;
        let flagged: HashSet<String> = ["p1".to_string()].into();

        let new_id = fallback_copy(&store, &config, &merge, &flagged).await.unwrap();
        let tree = store.election(&new_id).await.unwrap().unwrap();

        assert_eq!(tree.election.name, "School Council (after fallback)");
        assert_eq!(tree.polls.len(), 2);
        let prefect = &tree.polls[0];
        let captain = &tree.polls[1];
        assert_ne!(prefect.poll.id, "p1");
        assert_ne!(captain.poll.id, "p2");

        // Winner Ada keeps her renumbered poll; her surviving fallback points
        // at the *new* id of p2.
        let ada = prefect.candidates.iter().find(|c| c.name == "Ada").unwrap();
        assert_eq!(ada.votes, 0);
        assert_ne!(ada.id, "a");
        assert_eq!(ada.fallback, captain.poll.id);

        // Non-winner Grace lands in the new Captain poll, fallback reset.
        let grace = captain.candidates.iter().find(|c| c.name == "Grace").unwrap();
        assert_eq!(grace.parent_id, captain.poll.id);
        assert_eq!(grace.fallback, FALLBACK_NONE);
        assert_eq!(grace.votes, 0);

        // Non-winner Edsger has no fallback configured and stays put.
        let edsger = prefect.candidates.iter().find(|c| c.name == "Edsger").unwrap();
        assert_eq!(edsger.parent_id, prefect.poll.id);

        // Captain was not flagged: Alan stays even though he "won" nothing new.
        let alan = captain.candidates.iter().find(|c| c.name == "Alan").unwrap();
        assert_eq!(alan.parent_id, captain.poll.id);
        assert_eq!(alan.fallback, FALLBACK_NONE);
    }

    #[tokio::test]
    async fn unflagged_polls_keep_their_losers() {
        let (_scratch, config, store, merge) = setup(DEFAULT_CANDIDATE_IMAGE).await;
        let flagged: HashSet<String> = HashSet::new();

        let new_id = fallback_copy(&store, &config, &merge, &flagged).await.unwrap();
        let tree = store.election(&new_id).await.unwrap().unwrap();
        assert_eq!(tree.polls[0].candidates.len(), 3);
        assert_eq!(tree.polls[1].candidates.len(), 1);
    }

    #[tokio::test]
    async fn uploaded_images_are_duplicated_for_new_owners() {
        let (_scratch, config, store, merge) = setup("/images/ada.jpg").await;
        tokio::fs::write(config.images_dir.join("ada.jpg"), b"jpegbytes")
            .await
            .unwrap();
        let flagged: HashSet<String> = ["p1".to_string()].into();

        let new_id = fallback_copy(&store, &config, &merge, &flagged).await.unwrap();
        let tree = store.election(&new_id).await.unwrap().unwrap();
        let ada = tree.polls[0]
            .candidates
            .iter()
            .find(|c| c.name == "Ada")
            .unwrap();

        assert_ne!(ada.image, "/images/ada.jpg");

        // Exactly one new Image record for the new owner, matching her path.
        let images = store.resource_images(&ada.id).await.unwrap();
        assert_eq!(images.len(), 1);
        let image = &images[0];
        assert_eq!(format!("/images/{}", image.id), ada.image);

        // Old and new files both exist with the same bytes.
        let new_file = config.images_dir.join(&image.id);
        assert_eq!(tokio::fs::read(&new_file).await.unwrap(), b"jpegbytes");
        assert_eq!(
            tokio::fs::read(config.images_dir.join("ada.jpg")).await.unwrap(),
            b"jpegbytes"
        );
    }

    #[tokio::test]
    async fn missing_image_file_aborts_before_any_insert() {
        let (_scratch, config, store, merge) = setup("/images/ada.jpg").await;
        // ada.jpg deliberately not written.
        let flagged: HashSet<String> = ["p1".to_string()].into();

        let err = fallback_copy(&store, &config, &merge, &flagged)
            .await
            .unwrap_err();
        assert!(matches!(err, FallbackError::MissingImage { .. }));
        assert!(store.elections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn merge_without_tree_cannot_be_copied() {
        let (_scratch, config, store, _) = setup(DEFAULT_CANDIDATE_IMAGE).await;
        let empty = build_merge(vec![]).unwrap();
        let err = fallback_copy(&store, &config, &empty, &HashSet::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FallbackError::EmptyMerge));
    }
}
