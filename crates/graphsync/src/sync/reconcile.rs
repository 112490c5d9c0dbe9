//! Materializing discovered nodes as local entities
//!
//! Kinds are visited in [`SYNC_ORDER`] so a child's parent has always been
//! reconciled before the child is looked at.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Result;
use log::{debug, info, warn};

use super::cache::ParentCache;
use super::context::SyncContext;
use crate::graph::{Node, NodeGraph};
use crate::models::{Entity, EntityDetails, EntityKind, PostSyncAction, SYNC_ORDER};

pub(crate) const OPEN: &str = "OPEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Created,
    Updated,
    Unchanged,
    /// Not eligible, or a duplicate; children are skipped as well
    Skipped,
    /// A stored item that is no longer open
    Closed,
}

/// Per-kind tally of one reconcile call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KindCounts {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub closed: usize,
}

impl KindCounts {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Closed => self.closed += 1,
        }
    }

    fn is_empty(&self) -> bool {
        *self == KindCounts::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub kinds: BTreeMap<EntityKind, KindCounts>,
}

impl ReconcileReport {
    pub fn counts(&self, kind: EntityKind) -> KindCounts {
        self.kinds.get(&kind).copied().unwrap_or_default()
    }
}

/// Reconcile every node in `graph` into `ctx`, recording outcomes on the nodes
pub fn reconcile(graph: &mut NodeGraph, ctx: &mut SyncContext, cache: &mut ParentCache) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    for kind in SYNC_ORDER {
        let mut counts = KindCounts::default();
        // First parent each single-parent id was seen under
        let mut claimed: HashMap<String, String> = HashMap::new();

        for element_type in kind.element_types() {
            for key in graph.keys_of_type(element_type) {
                let Some(node) = graph.get(&key) else {
                    continue;
                };
                let parent_skipped = graph
                    .parent(node)
                    .is_some_and(|p| p.flags.creation_skipped);
                let node = node.clone();

                let outcome = if parent_skipped {
                    Outcome::Skipped
                } else {
                    reconcile_node(kind, &node, ctx, cache, &mut claimed)?
                };

                if let Some(target) = graph.get_mut(&key) {
                    match outcome {
                        Outcome::Created => target.flags.created = true,
                        Outcome::Updated => target.flags.updated = true,
                        Outcome::Skipped | Outcome::Closed => target.flags.creation_skipped = true,
                        Outcome::Unchanged => {}
                    }
                }
                counts.record(outcome);
            }
        }

        if !counts.is_empty() {
            info!(
                "[{}] {kind}: {} new, {} updated, {} unchanged, {} skipped, {} closed",
                ctx.server_id().as_str(),
                counts.created,
                counts.updated,
                counts.unchanged,
                counts.skipped,
                counts.closed
            );
        }
        report.kinds.insert(kind, counts);
    }
    Ok(report)
}

fn reconcile_node(
    kind: EntityKind,
    node: &Node,
    ctx: &mut SyncContext,
    cache: &mut ParentCache,
    claimed: &mut HashMap<String, String>,
) -> Result<Outcome> {
    let parent_id = node.parent_id();

    if !kind.allows_multiple_parents()
        && let Some(parent) = parent_id
    {
        match claimed.get(&node.id) {
            Some(first) if first != parent => {
                debug!(
                    "{kind} {} already materialized under {first}, skipping copy under {parent}",
                    node.id
                );
                return Ok(Outcome::Skipped);
            }
            Some(_) => {}
            None => {
                claimed.insert(node.id.clone(), parent.to_string());
            }
        }
    }

    let parent_ok = match parent_id {
        Some(parent) => {
            let parent_kind = cache.resolve(ctx, parent)?;
            parent_kind.is_some_and(|k| kind.parent_kinds().contains(&k))
                && !ctx.get(parent).is_some_and(Entity::is_marked_for_deletion)
        }
        None => false,
    };

    if let Some(entity) = ctx.existing_object(&node.id)? {
        if entity.kind != kind {
            warn!(
                "Node {} is a {kind} but the stored entity is a {}",
                node.id, entity.kind
            );
            return Ok(Outcome::Skipped);
        }
        if entity.is_marked_for_deletion() {
            entity.post_sync_action = PostSyncAction::DoNothing;
        }

        let mut changed = populate(entity, node);
        if parent_ok && let Some(parent) = parent_id {
            if kind.allows_multiple_parents() {
                entity.parent_ids.insert(parent.to_string());
            } else if entity.parent_id() != Some(parent) {
                entity.parent_ids = BTreeSet::from([parent.to_string()]);
                changed = true;
            }
        }

        if kind.is_item() && entity.item_state().is_some_and(|state| state != OPEN) {
            entity.post_sync_action = PostSyncAction::Delete;
            return Ok(Outcome::Closed);
        }

        if changed || node.flags.forced_update {
            if entity.post_sync_action != PostSyncAction::IsNew {
                entity.post_sync_action = PostSyncAction::IsUpdated;
            }
            return Ok(Outcome::Updated);
        }
        return Ok(Outcome::Unchanged);
    }

    let eligible = match kind {
        EntityKind::Repository => true,
        EntityKind::Issue | EntityKind::PullRequest => parent_ok && node.str("state") == Some(OPEN),
        _ => parent_ok,
    };
    if !eligible {
        return Ok(Outcome::Skipped);
    }

    let mut entity = Entity::new(&node.id, kind, ctx.server_id().clone());
    if parent_ok && let Some(parent) = parent_id {
        entity.parent_ids.insert(parent.to_string());
    }
    populate(&mut entity, node);
    ctx.insert(entity);
    cache.remember(&node.id, kind);
    Ok(Outcome::Created)
}

fn set_string(target: &mut String, value: Option<&str>) {
    if let Some(value) = value
        && target.as_str() != value
    {
        *target = value.to_string();
    }
}

/// Like [`set_string`], reporting a change away from a known previous state
fn set_state(target: &mut String, value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    if target.as_str() == value {
        return false;
    }
    let had_state = !target.is_empty();
    *target = value.to_string();
    had_state
}

/// Optional string field: only touched when the key is in the payload
fn set_optional(target: &mut Option<String>, node: &Node, key: &str) {
    if node.payload.contains_key(key) {
        *target = node.str(key).map(str::to_string);
    }
}

fn set_actor(target: &mut Option<String>, node: &Node, key: &str) {
    if node.payload.contains_key(key) {
        *target = node.str_at(&[key, "login"]).map(str::to_string);
    }
}

/// Copy the fields present in `node` into `entity`
///
/// Returns whether a watched value moved: the update timestamp advanced
/// or a known state changed. Partial payloads, such as the bare ids in a
/// detail batch, leave every other field as it was.
fn populate(entity: &mut Entity, node: &Node) -> bool {
    let mut changed = false;

    if let Some(created) = node.date("createdAt").or_else(|| node.date("startedAt")) {
        entity.created_at = Some(created);
    }
    if let Some(updated) = node.date("updatedAt").or_else(|| node.date("completedAt"))
        && entity.updated_at.is_none_or(|known| updated > known)
    {
        entity.updated_at = Some(updated);
        changed = true;
    }

    match &mut entity.details {
        EntityDetails::Repository {
            full_name,
            url,
            fork,
        } => {
            set_string(full_name, node.str("nameWithOwner"));
            set_string(url, node.str("url"));
            if let Some(is_fork) = node.bool("isFork") {
                *fork = is_fork;
            }
        }
        EntityDetails::Item {
            number,
            title,
            state,
            url,
            author,
            body,
            draft,
            merged_at,
            merged_by,
        } => {
            if let Some(n) = node.i64("number") {
                *number = n;
            }
            set_string(title, node.str("title"));
            changed |= set_state(state, node.str("state"));
            set_string(url, node.str("url"));
            set_string(body, node.str("body"));
            set_actor(author, node, "author");
            if let Some(is_draft) = node.bool("isDraft") {
                *draft = is_draft;
            }
            if node.payload.contains_key("mergedAt") {
                *merged_at = node.date("mergedAt");
            }
            set_actor(merged_by, node, "mergedBy");
        }
        EntityDetails::Label { name, color } => {
            set_string(name, node.str("name"));
            set_string(color, node.str("color"));
        }
        EntityDetails::Assignee { login } => {
            set_string(login, node.str("login"));
        }
        EntityDetails::Comment { body, author, url } => {
            set_string(body, node.str("body"));
            set_string(url, node.str("url"));
            set_actor(author, node, "author");
        }
        EntityDetails::Reaction { content, user } => {
            set_string(content, node.str("content"));
            set_actor(user, node, "user");
        }
        EntityDetails::Review {
            state,
            body,
            author,
        } => {
            changed |= set_state(state, node.str("state"));
            set_string(body, node.str("body"));
            set_actor(author, node, "author");
        }
        EntityDetails::ReviewRequest { reviewer } => {
            if node.payload.contains_key("requestedReviewer") {
                *reviewer = node
                    .str_at(&["requestedReviewer", "login"])
                    .or_else(|| node.str_at(&["requestedReviewer", "name"]))
                    .map(str::to_string);
            }
        }
        EntityDetails::Status {
            state,
            context,
            target_url,
            description,
        } => {
            if node.element_type == "CheckRun" {
                let run_state = node.str("conclusion").or_else(|| node.str("status"));
                changed |= set_state(state, run_state);
                set_string(context, node.str("name"));
                set_optional(target_url, node, "detailsUrl");
            } else {
                changed |= set_state(state, node.str("state"));
                set_string(context, node.str("context"));
                set_optional(target_url, node, "targetUrl");
                set_optional(description, node, "description");
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKey;
    use crate::models::ServerId;
    use crate::storage::{ChangeSet, EntityStore, InMemoryEntityStore};
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn server() -> ServerId {
        ServerId::from("GitHub")
    }

    fn context(entities: Vec<Entity>) -> (SyncContext, Arc<InMemoryEntityStore>) {
        let store = Arc::new(InMemoryEntityStore::new());
        store
            .apply(ChangeSet {
                upserts: entities,
                deletions: vec![],
            })
            .unwrap();
        (SyncContext::new(store.clone(), server()), store)
    }

    fn add(graph: &mut NodeGraph, payload: Value, parent: Option<&str>) {
        let parent = parent.map(|p| NodeKey::new(p, None));
        let node = Node::from_payload(payload.as_object().unwrap(), parent.as_ref()).unwrap();
        graph.insert(node).unwrap();
    }

    /// Parent keys as the scan produces them: a node's parent carries its own parent id
    fn add_under(graph: &mut NodeGraph, payload: Value, parent: NodeKey) {
        let node = Node::from_payload(payload.as_object().unwrap(), Some(&parent)).unwrap();
        graph.insert(node).unwrap();
    }

    fn repo(id: &str) -> Value {
        json!({"__typename": "Repository", "id": id, "nameWithOwner": "octo/repo", "updatedAt": "2024-01-01T00:00:00Z"})
    }

    fn pr(id: &str, state: &str, updated_at: &str) -> Value {
        json!({"__typename": "PullRequest", "id": id, "number": 7, "title": "Fix", "state": state, "updatedAt": updated_at})
    }

    fn stored_pr(id: &str, repo: &str, state: &str, updated_at: &str) -> Entity {
        let mut entity = Entity::new(id, EntityKind::PullRequest, server()).with_parent(repo);
        entity.updated_at = Some(updated_at.parse().unwrap());
        entity.details = EntityDetails::Item {
            number: 7,
            title: "Fix".into(),
            state: state.into(),
            url: String::new(),
            author: None,
            body: String::new(),
            draft: false,
            merged_at: None,
            merged_by: None,
        };
        entity
    }

    #[test]
    fn test_creates_open_items_under_known_repos() {
        let (mut ctx, _store) = context(vec![]);
        let mut graph = NodeGraph::new();
        add(&mut graph, repo("R1"), None);
        add(&mut graph, pr("PR1", "OPEN", "2024-02-01T00:00:00Z"), Some("R1"));
        add(&mut graph, pr("PR2", "CLOSED", "2024-02-01T00:00:00Z"), Some("R1"));
        add(&mut graph, pr("PR3", "OPEN", "2024-02-01T00:00:00Z"), Some("R9"));

        let report = reconcile(&mut graph, &mut ctx, &mut ParentCache::new()).unwrap();
        assert_eq!(report.counts(EntityKind::Repository).created, 1);
        let prs = report.counts(EntityKind::PullRequest);
        assert_eq!((prs.created, prs.skipped), (1, 2));

        let created = ctx.get("PR1").unwrap();
        assert_eq!(created.post_sync_action, PostSyncAction::IsNew);
        assert_eq!(created.parent_id(), Some("R1"));
        assert!(ctx.get("PR2").is_none());
        assert!(graph
            .get(&NodeKey::new("PR2", Some("R1".into())))
            .unwrap()
            .flags
            .creation_skipped);
    }

    #[test]
    fn test_children_of_skipped_nodes_are_skipped() {
        let (mut ctx, _store) = context(vec![Entity::new("R1", EntityKind::Repository, server())]);
        let mut graph = NodeGraph::new();
        add(&mut graph, pr("PR2", "CLOSED", "2024-02-01T00:00:00Z"), Some("R1"));
        add_under(
            &mut graph,
            json!({"__typename": "Label", "id": "L1", "name": "bug"}),
            NodeKey::new("PR2", Some("R1".into())),
        );

        let report = reconcile(&mut graph, &mut ctx, &mut ParentCache::new()).unwrap();
        assert_eq!(report.counts(EntityKind::Label).skipped, 1);
        assert!(ctx.get("L1").is_none());
    }

    #[test]
    fn test_update_requires_advanced_timestamp() {
        let (mut ctx, _store) = context(vec![
            Entity::new("R1", EntityKind::Repository, server()),
            stored_pr("PR1", "R1", "OPEN", "2024-02-01T00:00:00Z"),
            stored_pr("PR2", "R1", "OPEN", "2024-02-01T00:00:00Z"),
        ]);
        let mut graph = NodeGraph::new();
        add(&mut graph, pr("PR1", "OPEN", "2024-02-01T00:00:00Z"), Some("R1"));
        add(&mut graph, pr("PR2", "OPEN", "2024-02-05T00:00:00Z"), Some("R1"));

        let report = reconcile(&mut graph, &mut ctx, &mut ParentCache::new()).unwrap();
        let prs = report.counts(EntityKind::PullRequest);
        assert_eq!((prs.unchanged, prs.updated), (1, 1));
        assert_eq!(ctx.get("PR1").unwrap().post_sync_action, PostSyncAction::DoNothing);
        assert_eq!(ctx.get("PR2").unwrap().post_sync_action, PostSyncAction::IsUpdated);
    }

    #[test]
    fn test_forced_update_flags_unchanged_entity() {
        let (mut ctx, _store) = context(vec![
            Entity::new("R1", EntityKind::Repository, server()),
            stored_pr("PR1", "R1", "OPEN", "2024-02-01T00:00:00Z"),
        ]);
        let mut graph = NodeGraph::new();
        add(&mut graph, pr("PR1", "OPEN", "2024-02-01T00:00:00Z"), Some("R1"));
        graph
            .get_mut(&NodeKey::new("PR1", Some("R1".into())))
            .unwrap()
            .flags
            .forced_update = true;

        reconcile(&mut graph, &mut ctx, &mut ParentCache::new()).unwrap();
        assert_eq!(ctx.get("PR1").unwrap().post_sync_action, PostSyncAction::IsUpdated);
    }

    #[test]
    fn test_closed_stored_item_is_tagged_for_deletion() {
        let (mut ctx, _store) = context(vec![
            Entity::new("R1", EntityKind::Repository, server()),
            stored_pr("PR1", "R1", "OPEN", "2024-02-01T00:00:00Z"),
        ]);
        let mut graph = NodeGraph::new();
        add(&mut graph, pr("PR1", "MERGED", "2024-02-03T00:00:00Z"), Some("R1"));

        let report = reconcile(&mut graph, &mut ctx, &mut ParentCache::new()).unwrap();
        assert_eq!(report.counts(EntityKind::PullRequest).closed, 1);
        assert!(ctx.get("PR1").unwrap().is_marked_for_deletion());
    }

    #[test]
    fn test_reseen_entity_is_restored() {
        let (mut ctx, _store) = context(vec![Entity::new("R1", EntityKind::Repository, server())]);
        ctx.mark_for_deletion(EntityKind::Repository).unwrap();
        let mut graph = NodeGraph::new();
        add(&mut graph, repo("R1"), None);

        reconcile(&mut graph, &mut ctx, &mut ParentCache::new()).unwrap();
        assert!(!ctx.get("R1").unwrap().is_marked_for_deletion());
    }

    #[test]
    fn test_label_collects_parents_in_order() {
        let (mut ctx, _store) = context(vec![Entity::new("R1", EntityKind::Repository, server())]);
        let mut graph = NodeGraph::new();
        // Labels may arrive before their items in the graph
        add_under(
            &mut graph,
            json!({"__typename": "Label", "id": "L1", "name": "bug", "color": "d73a4a"}),
            NodeKey::new("PR1", Some("R1".into())),
        );
        add_under(
            &mut graph,
            json!({"__typename": "Label", "id": "L1", "name": "bug", "color": "d73a4a"}),
            NodeKey::new("I1", Some("R1".into())),
        );
        add(&mut graph, pr("PR1", "OPEN", "2024-02-01T00:00:00Z"), Some("R1"));
        add(
            &mut graph,
            json!({"__typename": "Issue", "id": "I1", "state": "OPEN", "updatedAt": "2024-02-01T00:00:00Z"}),
            Some("R1"),
        );

        let mut cache = ParentCache::new();
        reconcile(&mut graph, &mut ctx, &mut cache).unwrap();
        let label = ctx.get("L1").unwrap();
        assert_eq!(
            label.parent_ids,
            BTreeSet::from(["I1".to_string(), "PR1".to_string()])
        );
        assert_eq!(cache.resolve(&mut ctx, "PR1").unwrap(), Some(EntityKind::PullRequest));
    }

    #[test]
    fn test_duplicate_under_second_parent_keeps_first() {
        let (mut ctx, _store) = context(vec![
            Entity::new("R1", EntityKind::Repository, server()),
            Entity::new("R2", EntityKind::Repository, server()),
        ]);
        let mut graph = NodeGraph::new();
        add(&mut graph, pr("PR1", "OPEN", "2024-02-01T00:00:00Z"), Some("R1"));
        add(&mut graph, pr("PR1", "OPEN", "2024-02-01T00:00:00Z"), Some("R2"));

        let report = reconcile(&mut graph, &mut ctx, &mut ParentCache::new()).unwrap();
        let prs = report.counts(EntityKind::PullRequest);
        assert_eq!((prs.created, prs.skipped), (1, 1));
        assert_eq!(ctx.get("PR1").unwrap().parent_id(), Some("R1"));
    }

    #[test]
    fn test_partial_payload_keeps_fields() {
        let (mut ctx, _store) = context(vec![
            Entity::new("R1", EntityKind::Repository, server()),
            stored_pr("PR1", "R1", "OPEN", "2024-02-01T00:00:00Z"),
        ]);
        let mut graph = NodeGraph::new();
        // As returned at the top of a detail batch: id and type only
        add(&mut graph, json!({"__typename": "PullRequest", "id": "PR1"}), None);

        let report = reconcile(&mut graph, &mut ctx, &mut ParentCache::new()).unwrap();
        assert_eq!(report.counts(EntityKind::PullRequest).unchanged, 1);
        let entity = ctx.get("PR1").unwrap();
        assert_eq!(entity.item_state(), Some("OPEN"));
        assert_eq!(entity.parent_id(), Some("R1"));
    }

    #[test]
    fn test_check_run_populates_status() {
        let (mut ctx, _store) = context(vec![
            Entity::new("R1", EntityKind::Repository, server()),
            stored_pr("PR1", "R1", "OPEN", "2024-02-01T00:00:00Z"),
        ]);
        let mut graph = NodeGraph::new();
        add(
            &mut graph,
            json!({"__typename": "CheckRun", "id": "CR1", "name": "ci", "status": "COMPLETED",
                   "conclusion": "SUCCESS", "detailsUrl": "https://ci.example/1"}),
            Some("PR1"),
        );

        reconcile(&mut graph, &mut ctx, &mut ParentCache::new()).unwrap();
        match &ctx.get("CR1").unwrap().details {
            EntityDetails::Status {
                state,
                context,
                target_url,
                ..
            } => {
                assert_eq!(state, "SUCCESS");
                assert_eq!(context, "ci");
                assert_eq!(target_url.as_deref(), Some("https://ci.example/1"));
            }
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn test_assignees_review_requests_and_merger() {
        let (mut ctx, _store) = context(vec![
            Entity::new("R1", EntityKind::Repository, server()),
            stored_pr("PR1", "R1", "OPEN", "2024-02-01T00:00:00Z"),
        ]);
        let mut graph = NodeGraph::new();
        add(
            &mut graph,
            json!({"__typename": "PullRequest", "id": "PR1", "state": "OPEN", "updatedAt": "2024-02-01T00:00:00Z",
                   "mergedBy": {"__typename": "User", "login": "octocat"}}),
            Some("R1"),
        );
        add_under(
            &mut graph,
            json!({"__typename": "User", "id": "U1", "login": "hubot"}),
            NodeKey::new("PR1", Some("R1".into())),
        );
        add(
            &mut graph,
            json!({"__typename": "ReviewRequest", "id": "RR1",
                   "requestedReviewer": {"__typename": "Team", "name": "core", "slug": "core"}}),
            Some("PR1"),
        );
        add(
            &mut graph,
            json!({"__typename": "ReviewRequest", "id": "RR2",
                   "requestedReviewer": {"__typename": "User", "login": "monalisa"}}),
            Some("PR1"),
        );

        let report = reconcile(&mut graph, &mut ctx, &mut ParentCache::new()).unwrap();
        assert_eq!(report.counts(EntityKind::Assignee).created, 1);
        assert_eq!(report.counts(EntityKind::ReviewRequest).created, 2);

        let assignee = ctx.get("U1").unwrap();
        assert_eq!(assignee.details, EntityDetails::Assignee { login: "hubot".into() });
        assert_eq!(assignee.parent_id(), Some("PR1"));
        assert_eq!(
            ctx.get("RR1").unwrap().details,
            EntityDetails::ReviewRequest { reviewer: Some("core".into()) }
        );
        assert_eq!(
            ctx.get("RR2").unwrap().details,
            EntityDetails::ReviewRequest { reviewer: Some("monalisa".into()) }
        );
        match &ctx.get("PR1").unwrap().details {
            EntityDetails::Item { merged_by, .. } => assert_eq!(merged_by.as_deref(), Some("octocat")),
            other => panic!("unexpected details {other:?}"),
        }
    }
}
