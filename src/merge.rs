use crate::archive::{self, ArchiveError};
use crate::config::Config;
use crate::model::{
    fresh_id, Candidate, Election, ElectionTree, Merge, Poll, PollTotal, PollTree, Resource, Tie,
    FALLBACK_NONE,
};
use crate::snapshot::{self, SnapshotError};
use crate::tally;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unpack task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("merged snapshots contain no election record")]
    MissingElection,
    #[error("merged snapshots contain more than one election record")]
    AmbiguousElection,
    #[error("{kind} {id} references unknown {field} {target}")]
    InconsistentReference {
        kind: &'static str,
        id: String,
        field: &'static str,
        target: String,
    },
}

pub type Result<T> = std::result::Result<T, MergeError>;

/// Combine the record lists of several booth snapshots into one deduplicated
/// set, in first-seen insertion order.
///
/// Duplicate candidate ids sum their vote counts; every other field of a
/// duplicated record keeps the first-seen value (`DUPLICATE_FIELD_POLICY`).
pub fn merge_records(snapshots: Vec<Vec<Resource>>) -> Vec<Resource> {
    let mut merged: Vec<Resource> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for snapshot in snapshots {
        for record in snapshot {
            match index.get(record.id()) {
                Some(&slot) => {
                    if let (Resource::Candidate(existing), Resource::Candidate(incoming)) =
                        (&mut merged[slot], &record)
                    {
                        existing.votes += incoming.votes;
                    }
                }
                None => {
                    index.insert(record.id().to_string(), merged.len());
                    merged.push(record);
                }
            }
        }
    }

    merged
}

/// Assemble a merged record set into a `Merge`: the election tree with
/// per-poll winner sets, plus vote totals and detected ties.
///
/// Records whose parent or fallback reference does not resolve within the
/// set fail the merge rather than being silently dropped.
pub fn build_merge(resources: Vec<Resource>) -> Result<Merge> {
    if resources.is_empty() {
        return Ok(Merge {
            id: fresh_id(),
            merged: None,
            ties: Vec::new(),
            polls: Vec::new(),
            created_at: Utc::now(),
        });
    }

    let mut elections: Vec<Election> = Vec::new();
    let mut polls: Vec<Poll> = Vec::new();
    let mut candidates: Vec<Candidate> = Vec::new();
    for resource in resources {
        match resource {
            Resource::Election(e) => elections.push(e),
            Resource::Poll(p) => polls.push(p),
            Resource::Candidate(c) => candidates.push(c),
            // Image records ride along in snapshots but carry no votes.
            Resource::Image(_) => {}
        }
    }

    if elections.len() > 1 {
        return Err(MergeError::AmbiguousElection);
    }
    let election = elections.pop().ok_or(MergeError::MissingElection)?;

    let poll_ids: std::collections::HashSet<String> =
        polls.iter().map(|p| p.id.clone()).collect();
    for poll in &polls {
        if poll.parent_id != election.id {
            return Err(MergeError::InconsistentReference {
                kind: "poll",
                id: poll.id.clone(),
                field: "parent",
                target: poll.parent_id.clone(),
            });
        }
    }

    let mut by_poll: HashMap<String, Vec<Candidate>> = HashMap::new();
    for mut candidate in candidates {
        if !poll_ids.contains(&candidate.parent_id) {
            return Err(MergeError::InconsistentReference {
                kind: "candidate",
                id: candidate.id,
                field: "parent",
                target: candidate.parent_id,
            });
        }
        // A fallback naming the candidate's own poll is no fallback at all.
        if candidate.fallback == candidate.parent_id {
            candidate.fallback = FALLBACK_NONE.to_string();
        }
        if candidate.fallback != FALLBACK_NONE && !poll_ids.contains(&candidate.fallback) {
            return Err(MergeError::InconsistentReference {
                kind: "candidate",
                id: candidate.id,
                field: "fallback",
                target: candidate.fallback,
            });
        }
        by_poll
            .entry(candidate.parent_id.clone())
            .or_default()
            .push(candidate);
    }

    let mut ties: Vec<Tie> = Vec::new();
    let mut totals: Vec<PollTotal> = Vec::new();
    let mut poll_trees: Vec<PollTree> = Vec::new();

    for poll in polls {
        let candidates = by_poll.remove(&poll.id).unwrap_or_default();
        let winners = tally::winner_set(&candidates);
        if let Some(tie) = tally::tie_for(&poll.name, &winners) {
            ties.push(tie);
        }
        totals.push(PollTotal {
            name: poll.name.clone(),
            votes: tally::poll_total(&candidates),
        });
        poll_trees.push(PollTree {
            poll,
            candidates,
            winners,
        });
    }

    Ok(Merge {
        id: fresh_id(),
        merged: Some(ElectionTree {
            election,
            polls: poll_trees,
        }),
        ties,
        polls: totals,
        created_at: Utc::now(),
    })
}

/// The store of completed merges. A merge is inserted once and never
/// mutated; delete removes it wholesale.
#[derive(Clone)]
pub struct MergeStore {
    pool: SqlitePool,
}

impl MergeStore {
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        create_schema(&pool).await?;
        Ok(MergeStore { pool })
    }

    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        create_schema(&pool).await?;
        Ok(MergeStore { pool })
    }

    pub async fn insert(&self, merge: &Merge) -> Result<()> {
        let data = serde_json::to_string(merge)?;
        sqlx::query("INSERT INTO merges (id, created_at, data) VALUES (?, ?, ?)")
            .bind(&merge.id)
            .bind(merge.created_at.to_rfc3339())
            .bind(data)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn merges(&self) -> Result<Vec<Merge>> {
        let rows = sqlx::query("SELECT data FROM merges ORDER BY pk")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| {
                let data: String = row.get("data");
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }

    pub async fn merge_by_id(&self, merge_id: &str) -> Result<Option<Merge>> {
        let row = sqlx::query("SELECT data FROM merges WHERE id = ?")
            .bind(merge_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let data: String = row.get("data");
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    pub async fn delete_merge(&self, merge_id: &str) -> Result<u64> {
        let outcome = sqlx::query("DELETE FROM merges WHERE id = ?")
            .bind(merge_id)
            .execute(&self.pool)
            .await?;
        Ok(outcome.rows_affected())
    }
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS merges (
            pk INTEGER PRIMARY KEY,
            id TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL,
            data TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Run the whole merge pipeline over a set of booth archives: unpack each
/// single-entry archive concurrently into its own scratch directory, read
/// the snapshots, merge and tally, persist the outcome.
///
/// The merge record is only inserted after tallying succeeds, so a failed
/// run leaves the merge store untouched. Scratch space is removed either way.
pub async fn merge_archives(
    config: &Config,
    store: &MergeStore,
    archives: &[PathBuf],
) -> Result<Merge> {
    let batch_dir = config.merge_temp.join(fresh_id());
    tokio::fs::create_dir_all(&batch_dir).await?;

    let result = merge_unpacked(&batch_dir, store, archives).await;
    let _ = tokio::fs::remove_dir_all(&batch_dir).await;
    result
}

async fn merge_unpacked(
    batch_dir: &Path,
    store: &MergeStore,
    archives: &[PathBuf],
) -> Result<Merge> {
    // Each archive unpacks into its own destination, so the tasks share no
    // state and can run in parallel.
    let mut tasks = Vec::new();
    for archive_path in archives {
        let archive_path = archive_path.clone();
        let dest = batch_dir.join(fresh_id());
        tasks.push(tokio::spawn(async move {
            archive::unpack_single_file(&archive_path, &dest).await
        }));
    }

    // Join every task before propagating any failure: an early return would
    // drop still-running unpacks that could recreate scratch files after the
    // caller has removed the batch directory.
    let mut joined = Vec::with_capacity(tasks.len());
    for task in tasks {
        joined.push(task.await);
    }

    let mut snapshot_paths = Vec::with_capacity(joined.len());
    for outcome in joined {
        snapshot_paths.push(outcome??);
    }

    let mut snapshots = Vec::new();
    for path in &snapshot_paths {
        snapshots.push(snapshot::read_records(path).await?);
    }

    let merge = build_merge(merge_records(snapshots))?;
    store.insert(&merge).await?;
    Ok(merge)
}
