use crate::model::{Candidate, ElectionTree, Image, Poll, PollTree, Resource};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt record {id}: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// The canonical resource store: flat Election/Poll/Candidate/Image records
/// keyed by id, with indexed parent and owner links for tree assembly.
///
/// Records round-trip as JSON in the `data` column; the typed columns exist
/// only for lookups. Absent records surface as `None`, never as errors.
#[derive(Clone)]
pub struct ElectionStore {
    pool: SqlitePool,
}

impl ElectionStore {
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        create_schema(&pool).await?;
        Ok(ElectionStore { pool })
    }

    pub async fn in_memory() -> Result<Self> {
        // A pooled in-memory database must stay on one connection or every
        // checkout would see a fresh empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        create_schema(&pool).await?;
        Ok(ElectionStore { pool })
    }

    /// Insert a batch of resources in a single transaction. The fallback
    /// copier relies on this being all-or-nothing.
    pub async fn insert_resources(&self, resources: &[Resource]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for resource in resources {
            let data = serde_json::to_string(resource).map_err(|e| StoreError::Corrupt {
                id: resource.id().to_string(),
                source: e,
            })?;
            sqlx::query(
                r#"
                INSERT INTO resources (id, kind, parent_id, owner_id, data)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(resource.id())
            .bind(resource.kind())
            .bind(resource.parent_id())
            .bind(resource.owner_id())
            .bind(data)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn resource_by_id(&self, id: &str) -> Result<Option<Resource>> {
        let row = sqlx::query("SELECT id, data FROM resources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(decode_row).transpose()
    }

    /// All direct children of a resource, in insertion order.
    pub async fn children(&self, parent_id: &str) -> Result<Vec<Resource>> {
        let rows = sqlx::query("SELECT id, data FROM resources WHERE parent_id = ? ORDER BY pk")
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(decode_row).collect()
    }

    /// The image record owned by a resource, if any. Resources carrying only
    /// placeholder art own no image record.
    pub async fn resource_image(&self, owner_id: &str) -> Result<Option<Image>> {
        Ok(self.resource_images(owner_id).await?.into_iter().next())
    }

    /// Every image record owned by a resource, in insertion order. A
    /// well-formed store has at most one per owner.
    pub async fn resource_images(&self, owner_id: &str) -> Result<Vec<Image>> {
        let rows = sqlx::query(
            "SELECT id, data FROM resources WHERE owner_id = ? AND kind = 'image' ORDER BY pk",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        let mut images = Vec::new();
        for row in rows {
            if let Resource::Image(image) = decode_row(row)? {
                images.push(image);
            }
        }
        Ok(images)
    }

    /// Assemble the full tree of one election.
    pub async fn election(&self, election_id: &str) -> Result<Option<ElectionTree>> {
        let election = match self.resource_by_id(election_id).await? {
            Some(Resource::Election(election)) => election,
            _ => return Ok(None),
        };

        let mut polls = Vec::new();
        for child in self.children(election_id).await? {
            if let Resource::Poll(poll) = child {
                polls.push(self.poll_tree(poll).await?);
            }
        }

        Ok(Some(ElectionTree { election, polls }))
    }

    async fn poll_tree(&self, poll: Poll) -> Result<PollTree> {
        let candidates: Vec<Candidate> = self
            .children(&poll.id)
            .await?
            .into_iter()
            .filter_map(|child| match child {
                Resource::Candidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect();
        Ok(PollTree {
            poll,
            candidates,
            winners: Vec::new(),
        })
    }

    /// Every election in the store, with trees assembled.
    pub async fn elections(&self) -> Result<Vec<ElectionTree>> {
        let rows = sqlx::query("SELECT id, data FROM resources WHERE kind = 'election' ORDER BY pk")
            .fetch_all(&self.pool)
            .await?;
        let mut trees = Vec::new();
        for row in rows {
            if let Resource::Election(election) = decode_row(row)? {
                if let Some(tree) = self.election(&election.id).await? {
                    trees.push(tree);
                }
            }
        }
        Ok(trees)
    }

    /// Remove a single record by id. Returns the number of rows removed.
    pub async fn remove_resource(&self, id: &str) -> Result<u64> {
        let outcome = sqlx::query("DELETE FROM resources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(outcome.rows_affected())
    }
}

fn decode_row(row: sqlx::sqlite::SqliteRow) -> Result<Resource> {
    let id: String = row.get("id");
    let data: String = row.get("data");
    serde_json::from_str(&data).map_err(|e| StoreError::Corrupt { id, source: e })
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            pk INTEGER PRIMARY KEY,
            id TEXT UNIQUE NOT NULL,
            kind TEXT NOT NULL,
            parent_id TEXT,
            owner_id TEXT,
            data TEXT NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_resources_kind ON resources(kind)",
        "CREATE INDEX IF NOT EXISTS idx_resources_parent ON resources(parent_id)",
        "CREATE INDEX IF NOT EXISTS idx_resources_owner ON resources(owner_id)",
    ];
    for index_sql in indexes {
        sqlx::query(index_sql).execute(pool).await?;
    }

    Ok(())
}
