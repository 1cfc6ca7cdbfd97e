use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Sentinel stored in `Candidate::fallback` when no fallback poll is configured.
pub const FALLBACK_NONE: &str = "_none_";

/// Built-in placeholder art. These paths are never copied or deleted as real
/// files; only uploaded images live in the images directory.
pub const DEFAULT_ELECTION_IMAGE: &str = "/assets/images/election-default.jpg";
pub const DEFAULT_CANDIDATE_IMAGE: &str = "/assets/images/candidate-default.jpg";

/// Policy for non-vote fields when the same record id arrives from several
/// booths: the first record seen wins, later ones only contribute votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateFieldPolicy {
    FirstSeenWins,
}

pub const DUPLICATE_FIELD_POLICY: DuplicateFieldPolicy = DuplicateFieldPolicy::FirstSeenWins;

/// Generate a fresh opaque resource id.
pub fn fresh_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Returns true when an image path refers to the built-in placeholder art
/// rather than an uploaded file.
pub fn is_default_image(image: &str) -> bool {
    match Path::new(image).file_name().and_then(|n| n.to_str()) {
        Some(name) => name == "election-default.jpg" || name == "candidate-default.jpg",
        None => true,
    }
}

/// One flat record of a booth snapshot, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Resource {
    Election(Election),
    Poll(Poll),
    Candidate(Candidate),
    Image(Image),
}

impl Resource {
    pub fn id(&self) -> &str {
        match self {
            Resource::Election(e) => &e.id,
            Resource::Poll(p) => &p.id,
            Resource::Candidate(c) => &c.id,
            Resource::Image(i) => &i.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Election(_) => "election",
            Resource::Poll(_) => "poll",
            Resource::Candidate(_) => "candidate",
            Resource::Image(_) => "image",
        }
    }

    /// Parent link for polls and candidates.
    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Resource::Poll(p) => Some(&p.parent_id),
            Resource::Candidate(c) => Some(&c.parent_id),
            _ => None,
        }
    }

    /// Owning resource for image records.
    pub fn owner_id(&self) -> Option<&str> {
        match self {
            Resource::Image(i) => Some(&i.resource_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Election {
    pub id: String,
    pub name: String,
    pub caption: String,
    pub image: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub name: String,
    pub caption: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(rename = "parentID")]
    pub parent_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub image: String,
    pub votes: u64,
    #[serde(rename = "parentID")]
    pub parent_id: String,
    pub fallback: String,
    #[serde(
        rename = "fallbackName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub fallback_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Also the file name inside the images directory.
    pub id: String,
    #[serde(rename = "resourceID")]
    pub resource_id: String,
}

/// A poll with its candidates attached, plus the computed winner set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollTree {
    #[serde(flatten)]
    pub poll: Poll,
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub winners: Vec<Candidate>,
}

/// An election with its polls attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionTree {
    #[serde(flatten)]
    pub election: Election,
    pub polls: Vec<PollTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollTotal {
    pub name: String,
    pub votes: u64,
}

/// An exact tie on the maximum vote count within one poll. Candidate names
/// are listed in scan order over the poll's candidate list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tie {
    #[serde(rename = "pollName")]
    pub poll_name: String,
    pub candidates: Vec<String>,
}

/// The persisted outcome of one merge operation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    pub id: String,
    /// None only when the merge ran over zero snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged: Option<ElectionTree>,
    pub ties: Vec<Tie>,
    pub polls: Vec<PollTotal>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}
