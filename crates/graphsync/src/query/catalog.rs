//! Standard fragments and the queries a sync pass is built from
//!
//! Every builder returns fresh elements, so callers may freely combine and
//! page them without sharing element ids across queries.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{Element, Field, Fragment, Group, Paging};
use crate::client::{PerNode, Query};
use crate::config::SyncProfile;
use crate::elements;
use crate::graph::{AlreadyParsed, Node};
use crate::models::EntityKind;

/// Users as nodes of their own; only assignees are fetched this way
pub fn user_fragment() -> Fragment {
    Fragment::on("User", elements![Field::id(), "login", "avatarUrl"])
}

/// Actor fields carry no id, so an actor stays in its parent's payload
fn actor_fragment(on_type: &str) -> Fragment {
    Fragment::named(
        format!("{}Actor", on_type.to_lowercase()),
        on_type,
        elements!["login", "avatarUrl"],
    )
}

/// An `Actor` field resolved through the concrete author types
pub fn author_group(name: &str) -> Group {
    Group::new(
        name,
        elements![
            actor_fragment("User"),
            actor_fragment("Mannequin"),
            actor_fragment("Bot")
        ],
    )
}

/// A requested reviewer: a user, a mannequin or a team
fn reviewer_group() -> Group {
    Group::new(
        "requestedReviewer",
        elements![
            actor_fragment("User"),
            actor_fragment("Mannequin"),
            Fragment::named("teamActor", "Team", elements!["name", "slug"])
        ],
    )
}

pub fn label_fragment() -> Fragment {
    Fragment::on(
        "Label",
        elements![Field::id(), "name", "color", "createdAt", "updatedAt"],
    )
}

/// Milestones are read for display only and never become entities
pub fn milestone_group() -> Group {
    Group::new("milestone", elements!["title"])
}

pub fn repository_fragment() -> Fragment {
    Fragment::on(
        "Repository",
        elements![
            Field::id(),
            "nameWithOwner",
            "isFork",
            "url",
            "createdAt",
            "updatedAt"
        ],
    )
}

fn labels_group(profile: SyncProfile) -> Group {
    Group::new("labels", elements![label_fragment()]).with_paging(Paging::first(profile.small_page()))
}

fn assignees_group(profile: SyncProfile) -> Group {
    Group::new("assignees", elements![user_fragment()]).with_paging(Paging::first(profile.small_page()))
}

pub fn pull_request_fragment(profile: SyncProfile) -> Fragment {
    Fragment::on(
        "PullRequest",
        elements![
            Field::id(),
            "number",
            "title",
            "state",
            "url",
            "body",
            "isDraft",
            "mergedAt",
            "createdAt",
            "updatedAt",
            author_group("author"),
            author_group("mergedBy"),
            milestone_group(),
            assignees_group(profile),
            labels_group(profile),
        ],
    )
}

pub fn issue_fragment(profile: SyncProfile) -> Fragment {
    Fragment::on(
        "Issue",
        elements![
            Field::id(),
            "number",
            "title",
            "state",
            "url",
            "body",
            "createdAt",
            "updatedAt",
            author_group("author"),
            milestone_group(),
            assignees_group(profile),
            labels_group(profile),
        ],
    )
}

pub fn reaction_fragment() -> Fragment {
    Fragment::on(
        "Reaction",
        elements![
            Field::id(),
            "content",
            "createdAt",
            Group::new("user", elements!["login"])
        ],
    )
}

pub fn comment_fragment(profile: SyncProfile) -> Fragment {
    Fragment::on(
        "IssueComment",
        elements![
            Field::id(),
            "body",
            "url",
            "createdAt",
            "updatedAt",
            author_group("author"),
            Group::new("reactions", elements![reaction_fragment()])
                .with_paging(Paging::first(profile.small_page())),
        ],
    )
}

pub fn review_comment_fragment() -> Fragment {
    Fragment::on(
        "PullRequestReviewComment",
        elements![
            Field::id(),
            "body",
            "url",
            "createdAt",
            "updatedAt",
            author_group("author")
        ],
    )
}

pub fn review_fragment(profile: SyncProfile) -> Fragment {
    Fragment::on(
        "PullRequestReview",
        elements![
            Field::id(),
            "state",
            "body",
            "createdAt",
            "updatedAt",
            author_group("author"),
            Group::new("comments", elements![review_comment_fragment()])
                .with_paging(Paging::first(profile.small_page())),
        ],
    )
}

pub fn review_request_fragment() -> Fragment {
    Fragment::on("ReviewRequest", elements![Field::id(), reviewer_group()])
}

pub fn status_context_fragment() -> Fragment {
    Fragment::on(
        "StatusContext",
        elements![
            Field::id(),
            "context",
            "state",
            "description",
            "targetUrl",
            "createdAt"
        ],
    )
}

pub fn check_run_fragment() -> Fragment {
    Fragment::on(
        "CheckRun",
        elements![
            Field::id(),
            "name",
            "status",
            "conclusion",
            "detailsUrl",
            "startedAt",
            "completedAt"
        ],
    )
}

/// Statuses and check runs of the head commit, reached through id-less containers
fn statuses_group(profile: SyncProfile) -> Group {
    let contexts = Group::new("contexts", elements![status_context_fragment()]);
    let check_runs = Group::new("checkRuns", elements![check_run_fragment()]).with_paging(
        Paging::First {
            count: profile.small_page(),
            paging: false,
        },
    );
    let check_suites = Group::new("checkSuites", elements![check_runs]).with_paging(
        Paging::First {
            count: profile.small_page(),
            paging: false,
        },
    );
    let commit = Group::new(
        "commit",
        elements![Group::new("status", elements![contexts]), check_suites],
    );
    Group::new("commits", elements![commit]).with_paging(Paging::Last(1))
}

/// Which detail connections to fetch for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailSteps {
    pub comments: bool,
    pub reviews: bool,
    pub review_requests: bool,
    pub statuses: bool,
    pub reactions: bool,
}

impl DetailSteps {
    pub fn all() -> Self {
        Self {
            comments: true,
            reviews: true,
            review_requests: true,
            statuses: true,
            reactions: true,
        }
    }

    /// Drop the steps a kind has no connection for
    pub fn for_kind(self, kind: EntityKind) -> Self {
        let is_pr = kind == EntityKind::PullRequest;
        Self {
            reviews: self.reviews && is_pr,
            review_requests: self.review_requests && is_pr,
            statuses: self.statuses && is_pr,
            ..self
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.comments || self.reviews || self.review_requests || self.statuses || self.reactions)
    }
}

/// A batch of ids to fetch with one template, not yet split into queries
#[derive(Clone)]
pub struct BatchPlan {
    pub name: String,
    pub ids: Vec<String>,
    pub max_cost: u64,
    pub per_node: Option<PerNode>,
    pub fields: Vec<Element>,
}

impl BatchPlan {
    /// Parallel mode partitions upfront; otherwise one query walks the ids in turn
    pub fn queries(self, parallel: bool) -> Vec<Query> {
        if parallel {
            Query::batching(&self.name, &self.ids, self.max_cost, self.per_node, self.fields)
        } else {
            Query::batch_chain(&self.name, &self.ids, self.max_cost, self.per_node, self.fields)
                .into_iter()
                .collect()
        }
    }
}

fn item_label(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::PullRequest => "PRs",
        _ => "issues",
    }
}

fn item_connection(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::PullRequest => "pullRequests",
        _ => "issues",
    }
}

fn item_fragment(kind: EntityKind, profile: SyncProfile) -> Fragment {
    match kind {
        EntityKind::PullRequest => pull_request_fragment(profile),
        _ => issue_fragment(profile),
    }
}

/// Repositories the viewer watches
pub fn watched_repositories(profile: SyncProfile) -> Query {
    let watching = Group::new("watching", elements![repository_fragment()])
        .with_paging(Paging::first(profile.large_page()));
    Query::new(
        "Watched repositories",
        Group::new("viewer", elements![watching]),
    )
}

/// Every open item of `kind` in each repository
pub fn open_items(repo_ids: Vec<String>, kind: EntityKind, profile: SyncProfile) -> BatchPlan {
    let items = Group::new(item_connection(kind), elements![item_fragment(kind, profile)])
        .with_param("states", "[OPEN]")
        .with_paging(Paging::first(profile.medium_page()));
    BatchPlan {
        name: format!("Open {}", item_label(kind)),
        ids: repo_ids,
        max_cost: profile.initial_batch_cost(),
        per_node: None,
        fields: elements![Field::id(), items],
    }
}

/// Items of `kind` updated since the newest one already stored per repository
///
/// Paging stops at the first item older than the repository's known
/// latest update.
pub fn latest_items(
    latest_known: HashMap<String, DateTime<Utc>>,
    kind: EntityKind,
    profile: SyncProfile,
) -> BatchPlan {
    let mut repo_ids: Vec<String> = latest_known.keys().cloned().collect();
    repo_ids.sort();

    let items = Group::new(item_connection(kind), elements![item_fragment(kind, profile)])
        .with_param("orderBy", "{direction: DESC, field: UPDATED_AT}")
        .with_paging(Paging::first(profile.medium_page()));

    BatchPlan {
        name: format!("Latest {}", item_label(kind)),
        ids: repo_ids,
        max_cost: profile.incremental_batch_cost(),
        per_node: Some(stop_at_known_update(kind, latest_known)),
        fields: elements![Field::id(), items],
    }
}

fn stop_at_known_update(kind: EntityKind, latest_known: HashMap<String, DateTime<Utc>>) -> PerNode {
    let element_types = kind.element_types();
    Arc::new(move |node: &Node| {
        if !element_types.contains(&node.element_type.as_str()) {
            return Ok(());
        }
        let (Some(repo_id), Some(updated_at)) = (node.parent_id(), node.date("updatedAt")) else {
            return Ok(());
        };
        match latest_known.get(repo_id) {
            Some(known) if updated_at < *known => Err(AlreadyParsed),
            _ => Ok(()),
        }
    })
}

/// Comments, reviews, review requests, statuses and reactions of the given items
pub fn item_details(
    item_ids: Vec<String>,
    kind: EntityKind,
    steps: DetailSteps,
    profile: SyncProfile,
) -> BatchPlan {
    let steps = steps.for_kind(kind);
    let mut fields = elements![Field::id()];
    if steps.comments {
        fields.push(
            Group::new("comments", elements![comment_fragment(profile)])
                .with_paging(Paging::first(profile.medium_page()))
                .into(),
        );
    }
    if steps.reviews {
        fields.push(
            Group::new("reviews", elements![review_fragment(profile)])
                .with_paging(Paging::first(profile.small_page()))
                .into(),
        );
    }
    if steps.review_requests {
        fields.push(
            Group::new("reviewRequests", elements![review_request_fragment()])
                .with_paging(Paging::first(profile.small_page()))
                .into(),
        );
    }
    if steps.statuses {
        fields.push(statuses_group(profile).into());
    }
    if steps.reactions {
        fields.push(
            Group::new("reactions", elements![reaction_fragment()])
                .with_paging(Paging::first(profile.small_page()))
                .into(),
        );
    }

    let (label, element_type) = match kind {
        EntityKind::PullRequest => ("PR", "PullRequest"),
        _ => ("Issue", "Issue"),
    };
    let details = Fragment::named(
        format!("{}Details", element_type.to_lowercase()),
        element_type,
        fields,
    );
    BatchPlan {
        name: format!("{label} details"),
        ids: item_ids,
        max_cost: profile.accompanying_batch_cost(),
        per_node: None,
        fields: elements![details],
    }
}

/// Current state of stored items, fetched by id
///
/// Used for open items an open listing stopped returning: they were closed,
/// merged or removed since the last pass.
pub fn item_states(item_ids: Vec<String>, kind: EntityKind, profile: SyncProfile) -> BatchPlan {
    BatchPlan {
        name: format!("Closed {}", item_label(kind)),
        ids: item_ids,
        max_cost: profile.accompanying_batch_cost(),
        per_node: None,
        fields: elements![item_fragment(kind, profile)],
    }
}
