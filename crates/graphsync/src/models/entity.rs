//! Locally stored entities and their lifecycle tags

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ServerId;

/// Kind of local entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Repository,
    Issue,
    PullRequest,
    Label,
    Assignee,
    Comment,
    Reaction,
    Review,
    ReviewRequest,
    Status,
}

/// Containers before dependents, so parent lookups always find their parent
pub const SYNC_ORDER: [EntityKind; 10] = [
    EntityKind::Repository,
    EntityKind::Issue,
    EntityKind::PullRequest,
    EntityKind::Label,
    EntityKind::Assignee,
    EntityKind::Review,
    EntityKind::ReviewRequest,
    EntityKind::Comment,
    EntityKind::Reaction,
    EntityKind::Status,
];

impl EntityKind {
    /// Map a GraphQL `__typename` to the kind it materializes as
    pub fn for_element_type(element_type: &str) -> Option<EntityKind> {
        let kind = match element_type {
            "Repository" => EntityKind::Repository,
            "Issue" => EntityKind::Issue,
            "PullRequest" => EntityKind::PullRequest,
            "Label" => EntityKind::Label,
            // Actors elsewhere are fetched without ids, so only assignees are User nodes
            "User" => EntityKind::Assignee,
            "ReviewRequest" => EntityKind::ReviewRequest,
            "IssueComment" | "PullRequestReviewComment" => EntityKind::Comment,
            "Reaction" => EntityKind::Reaction,
            "PullRequestReview" => EntityKind::Review,
            "StatusContext" | "CheckRun" => EntityKind::Status,
            _ => return None,
        };
        Some(kind)
    }

    /// The `__typename`s that materialize as this kind
    pub fn element_types(self) -> &'static [&'static str] {
        match self {
            EntityKind::Repository => &["Repository"],
            EntityKind::Issue => &["Issue"],
            EntityKind::PullRequest => &["PullRequest"],
            EntityKind::Label => &["Label"],
            EntityKind::Assignee => &["User"],
            EntityKind::ReviewRequest => &["ReviewRequest"],
            EntityKind::Comment => &["IssueComment", "PullRequestReviewComment"],
            EntityKind::Reaction => &["Reaction"],
            EntityKind::Review => &["PullRequestReview"],
            EntityKind::Status => &["StatusContext", "CheckRun"],
        }
    }

    /// Kinds an entity of this kind may hang under
    pub fn parent_kinds(self) -> &'static [EntityKind] {
        match self {
            EntityKind::Repository => &[],
            EntityKind::Issue | EntityKind::PullRequest => &[EntityKind::Repository],
            EntityKind::Label | EntityKind::Assignee => &[EntityKind::Issue, EntityKind::PullRequest],
            EntityKind::Comment => &[EntityKind::Issue, EntityKind::PullRequest, EntityKind::Review],
            EntityKind::Reaction => &[EntityKind::Issue, EntityKind::PullRequest, EntityKind::Comment],
            EntityKind::Review | EntityKind::ReviewRequest | EntityKind::Status => {
                &[EntityKind::PullRequest]
            }
        }
    }

    /// Labels and assignees are shared between items; every other kind has one parent
    pub fn allows_multiple_parents(self) -> bool {
        matches!(self, EntityKind::Label | EntityKind::Assignee)
    }

    pub fn is_item(self) -> bool {
        matches!(self, EntityKind::Issue | EntityKind::PullRequest)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Repository => "repository",
            EntityKind::Issue => "issue",
            EntityKind::PullRequest => "pull_request",
            EntityKind::Label => "label",
            EntityKind::Assignee => "assignee",
            EntityKind::ReviewRequest => "review_request",
            EntityKind::Comment => "comment",
            EntityKind::Reaction => "reaction",
            EntityKind::Review => "review",
            EntityKind::Status => "status",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match SYNC_ORDER.iter().find(|k| k.as_str() == s) {
            Some(kind) => Ok(*kind),
            None => bail!("Unknown entity kind '{s}'"),
        }
    }
}

/// Lifecycle tag set by reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostSyncAction {
    #[default]
    DoNothing,
    Delete,
    IsNew,
    IsUpdated,
}

impl PostSyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PostSyncAction::DoNothing => "do_nothing",
            PostSyncAction::Delete => "delete",
            PostSyncAction::IsNew => "is_new",
            PostSyncAction::IsUpdated => "is_updated",
        }
    }
}

impl FromStr for PostSyncAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "do_nothing" => PostSyncAction::DoNothing,
            "delete" => PostSyncAction::Delete,
            "is_new" => PostSyncAction::IsNew,
            "is_updated" => PostSyncAction::IsUpdated,
            other => bail!("Unknown post-sync action '{other}'"),
        })
    }
}

/// Kind-specific fields
///
/// Each variant lists exactly the fields that are stored and restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityDetails {
    Repository {
        full_name: String,
        url: String,
        fork: bool,
    },
    Item {
        number: i64,
        title: String,
        state: String,
        url: String,
        author: Option<String>,
        body: String,
        draft: bool,
        merged_at: Option<DateTime<Utc>>,
        #[serde(default)]
        merged_by: Option<String>,
    },
    Label {
        name: String,
        color: String,
    },
    Assignee {
        login: String,
    },
    Comment {
        body: String,
        author: Option<String>,
        url: String,
    },
    Reaction {
        content: String,
        user: Option<String>,
    },
    Review {
        state: String,
        body: String,
        author: Option<String>,
    },
    /// A reviewer asked for but not yet heard from: a user login or a team name
    ReviewRequest {
        reviewer: Option<String>,
    },
    Status {
        state: String,
        context: String,
        target_url: Option<String>,
        description: Option<String>,
    },
}

impl EntityDetails {
    /// Blank details for a freshly created entity
    pub fn empty(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Repository => EntityDetails::Repository {
                full_name: String::new(),
                url: String::new(),
                fork: false,
            },
            EntityKind::Issue | EntityKind::PullRequest => EntityDetails::Item {
                number: 0,
                title: String::new(),
                state: String::new(),
                url: String::new(),
                author: None,
                body: String::new(),
                draft: false,
                merged_at: None,
                merged_by: None,
            },
            EntityKind::Label => EntityDetails::Label {
                name: String::new(),
                color: String::new(),
            },
            EntityKind::Assignee => EntityDetails::Assignee {
                login: String::new(),
            },
            EntityKind::Comment => EntityDetails::Comment {
                body: String::new(),
                author: None,
                url: String::new(),
            },
            EntityKind::Reaction => EntityDetails::Reaction {
                content: String::new(),
                user: None,
            },
            EntityKind::Review => EntityDetails::Review {
                state: String::new(),
                body: String::new(),
                author: None,
            },
            EntityKind::ReviewRequest => EntityDetails::ReviewRequest { reviewer: None },
            EntityKind::Status => EntityDetails::Status {
                state: String::new(),
                context: String::new(),
                target_url: None,
                description: None,
            },
        }
    }
}

/// A locally stored record of a remote object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Remote global id
    pub id: String,
    pub kind: EntityKind,
    pub server_id: ServerId,
    /// Ids of the entities this one hangs under
    pub parent_ids: BTreeSet<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub post_sync_action: PostSyncAction,
    pub details: EntityDetails,
}

impl Entity {
    pub fn new(id: impl Into<String>, kind: EntityKind, server_id: ServerId) -> Self {
        Self {
            id: id.into(),
            kind,
            server_id,
            parent_ids: BTreeSet::new(),
            created_at: None,
            updated_at: None,
            post_sync_action: PostSyncAction::DoNothing,
            details: EntityDetails::empty(kind),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_ids.insert(parent_id.into());
        self
    }

    /// The single parent of a single-parent entity
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_ids.iter().next().map(String::as_str)
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.post_sync_action == PostSyncAction::Delete
    }

    /// Item state (`OPEN`, `CLOSED`, `MERGED`), if this is an item
    pub fn item_state(&self) -> Option<&str> {
        match &self.details {
            EntityDetails::Item { state, .. } => Some(state),
            _ => None,
        }
    }
}
