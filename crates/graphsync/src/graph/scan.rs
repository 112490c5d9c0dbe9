//! Walking a response alongside the query tree that produced it
//!
//! Nodes are recorded into the task's [`NodeGraph`] in document order.
//! Incomplete pages and unexhausted batches turn into follow-up queries.

use log::debug;
use serde_json::{Map, Value};

use super::{AlreadyParsed, Node, NodeGraph, NodeKey};
use crate::client::{ParentRef, Query};
use crate::query::{BatchGroup, Element, Group, shell_children};

/// Scan the root data of `query`, returning the follow-up queries it needs
pub(crate) fn scan_response(query: &Query, data: &Value, graph: &mut NodeGraph) -> Vec<Query> {
    let mut scan = Scanner {
        query,
        graph,
        follow_ups: Vec::new(),
    };
    let parent = query.parent().map(|p| p.key.clone());
    let scope = Scope::default();
    match query.root() {
        Element::Batch(batch) => scan.batch(batch, data, parent, true),
        Element::Group(group) => scan.group(group, data, parent, scope),
        Element::Fragment(fragment) => {
            if let Some(object) = data.as_object() {
                scan.fields(fragment.elements(), object, parent, scope);
            }
        }
        Element::Field(_) => {}
    }
    scan.follow_ups
}

/// Where the objects being scanned sit in the response
#[derive(Clone, Copy, Default)]
struct Scope<'q, 'd> {
    /// Id of the batch item above, if any
    batch_root: Option<&'d str>,
    /// Nearest node above
    enclosing: Option<Enclosing<'q, 'd>>,
}

/// A node and the selection its fields were scanned with
#[derive(Clone, Copy)]
struct Enclosing<'q, 'd> {
    element_type: &'d str,
    fields: &'q [Element],
    batch_item: bool,
}

struct Scanner<'q, 'g> {
    query: &'q Query,
    graph: &'g mut NodeGraph,
    follow_ups: Vec<Query>,
}

impl<'q> Scanner<'q, '_> {
    fn group<'d>(
        &mut self,
        group: &'q Group,
        data: &'d Value,
        parent: Option<NodeKey>,
        scope: Scope<'q, 'd>,
    ) {
        match data {
            Value::Object(object) => match object.get("edges").and_then(Value::as_array) {
                Some(edges) => self.page(group, edges, object.get("pageInfo"), parent, scope),
                None => {
                    let _ = self.node(group.fields(), object, parent, scope, false);
                }
            },
            Value::Array(items) => {
                for item in items.iter().filter_map(Value::as_object) {
                    if self
                        .node(group.fields(), item, parent.clone(), scope, false)
                        .is_err()
                    {
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    fn page<'d>(
        &mut self,
        group: &'q Group,
        edges: &'d [Value],
        page_info: Option<&'d Value>,
        parent: Option<NodeKey>,
        scope: Scope<'q, 'd>,
    ) {
        let before = self.follow_ups.len();
        for edge in edges {
            if let Some(object) = edge.get("node").and_then(Value::as_object)
                && self
                    .node(group.fields(), object, parent.clone(), scope, false)
                    .is_err()
            {
                return;
            }
        }

        let cursor = edges
            .last()
            .and_then(|e| e.get("cursor"))
            .and_then(Value::as_str);
        let has_next_page = page_info
            .and_then(|p| p.get("hasNextPage"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if let Some(cursor) = cursor
            && has_next_page
        {
            let next = Element::Group(group.with_cursor(cursor));
            if let Some(query) = self.next_page(next, parent, scope) {
                self.follow_ups.push(query);
            }
        }

        let added = self.follow_ups.len() - before;
        if added > 0 {
            debug!(
                "{}(Page in: {}) will need further paging: {} new queries",
                self.query.log_prefix(),
                group.name(),
                added
            );
        }
    }

    /// Query for the page after `next`'s cursor
    ///
    /// A connection inside a node is re-requested through `node(id:)` on
    /// that node alone, so its siblings and the list holding it are not
    /// fetched again. Top-level connections and connections of batch items
    /// are cut out of the root instead.
    fn next_page(&self, next: Element, parent: Option<NodeKey>, scope: Scope<'q, '_>) -> Option<Query> {
        if let (Some(enclosing), Some(key)) = (scope.enclosing, parent)
            && !enclosing.batch_item
        {
            let shell = shell_children(enclosing.fields, &next)?
                .into_iter()
                .find(|e| !e.is_id_field())?;
            let parent = ParentRef {
                key,
                element_type: enclosing.element_type.to_string(),
            };
            return Some(self.query.follow_up(shell).scoped_to(parent));
        }
        let shell = self.query.root().as_shell(&next, scope.batch_root)?;
        Some(self.query.follow_up(shell))
    }

    fn batch(&mut self, batch: &'q BatchGroup, data: &Value, parent: Option<NodeKey>, is_root: bool) {
        if let Some(items) = data.as_array() {
            for item in items.iter().filter_map(Value::as_object) {
                let _ = self.node(batch.template().fields(), item, parent.clone(), Scope::default(), true);
            }
        }
        if is_root && let Some(rest) = batch.remainder() {
            debug!(
                "{}Batch needs {} more ids",
                self.query.log_prefix(),
                rest.page().len() + rest.remaining().len()
            );
            self.follow_ups.push(self.query.follow_up(Element::Batch(rest)));
        }
    }

    /// Record one object if it is a node, then scan its fields
    ///
    /// `batch_item` marks the top-level objects of a batch; their id becomes
    /// the batch root for everything below them. A node stopped by the
    /// query's per-node check is left out of the graph with its children.
    fn node<'d>(
        &mut self,
        fields: &'q [Element],
        object: &'d Map<String, Value>,
        parent: Option<NodeKey>,
        scope: Scope<'q, 'd>,
        batch_item: bool,
    ) -> Result<(), AlreadyParsed> {
        let mut child_scope = scope;
        let this = match Node::from_payload(object, parent.as_ref()) {
            Some(node) => {
                let key = node.key();
                if self.graph.contains(&key) {
                    return Err(AlreadyParsed);
                }
                if let Some(per_node) = self.query.per_node() {
                    per_node(&node)?;
                }
                child_scope.enclosing = Some(Enclosing {
                    element_type: object
                        .get("__typename")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                    fields,
                    batch_item,
                });
                if batch_item {
                    child_scope.batch_root = object.get("id").and_then(Value::as_str);
                }
                self.graph.insert(node)?;
                Some(key)
            }
            None => parent,
        };
        self.fields(fields, object, this, child_scope);
        Ok(())
    }

    fn fields<'d>(
        &mut self,
        fields: &'q [Element],
        object: &'d Map<String, Value>,
        parent: Option<NodeKey>,
        scope: Scope<'q, 'd>,
    ) {
        for field in fields {
            match field {
                Element::Field(_) => {}
                Element::Fragment(fragment) => {
                    self.fields(fragment.elements(), object, parent.clone(), scope)
                }
                Element::Group(group) => {
                    if let Some(data) = object.get(group.name()) {
                        self.group(group, data, parent.clone(), scope);
                    }
                }
                Element::Batch(batch) => {
                    if let Some(data) = object.get(&batch.alias()) {
                        self.batch(batch, data, parent.clone(), false);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::client::{ParentRef, PerNode};
    use crate::elements;
    use crate::query::{Field, Fragment, Paging};
    use serde_json::json;

    fn pr_page(ids: &[&str], cursor: &str, has_next: bool) -> Value {
        let edges: Vec<Value> = ids
            .iter()
            .map(|id| json!({"node": {"__typename": "PullRequest", "id": id, "title": "t"}, "cursor": cursor}))
            .collect();
        json!({"edges": edges, "pageInfo": {"hasNextPage": has_next}})
    }

    fn prs_group() -> Group {
        Group::new("pullRequests", elements![Fragment::on("PullRequest", elements![Field::id(), "title"])])
            .with_paging(Paging::first(2))
    }

    #[test]
    fn test_page_with_next_spawns_one_follow_up() {
        let group = prs_group();
        let query = Query::new("PRs", group.clone());
        let mut graph = NodeGraph::new();

        let follow_ups = scan_response(&query, &pr_page(&["PR1", "PR2"], "c2", true), &mut graph);
        assert_eq!(graph.len(), 2);
        assert_eq!(follow_ups.len(), 1);
        let next = &follow_ups[0];
        assert_eq!(next.root().id(), group.id());
        assert_eq!(
            next.root().query_text(),
            group.with_cursor("c2").query_text()
        );
        assert_ne!(next.root().query_text(), group.query_text());
    }

    #[test]
    fn test_last_page_spawns_nothing() {
        let query = Query::new("PRs", prs_group());
        let mut graph = NodeGraph::new();
        assert!(scan_response(&query, &pr_page(&["PR1"], "c1", false), &mut graph).is_empty());
        // A page without a cursor is final even if the server claims more
        let empty = json!({"edges": [], "pageInfo": {"hasNextPage": true}});
        assert!(scan_response(&query, &empty, &mut graph).is_empty());
    }

    #[test]
    fn test_rescan_reports_already_parsed() {
        let query = Query::new("PRs", prs_group());
        let mut graph = NodeGraph::new();
        let page = pr_page(&["PR1", "PR2"], "c2", true);

        assert_eq!(scan_response(&query, &page, &mut graph).len(), 1);
        // The first node is already known, so the page stops with no follow-up
        assert!(scan_response(&query, &page, &mut graph).is_empty());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_per_node_runs_before_children_and_can_stop_page() {
        let comments = Group::new("comments", elements![Fragment::on("IssueComment", elements![Field::id()])])
            .with_paging(Paging::first(10));
        let pr = Fragment::on("PullRequest", elements![Field::id(), "updatedAt", comments]);
        let group = Group::new("pullRequests", elements![pr]).with_paging(Paging::first(2));

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = order.clone();
        let per_node: PerNode = Arc::new(move |node: &Node| {
            seen.lock().unwrap().push(node.id.clone());
            if node.str("updatedAt") == Some("old") {
                return Err(AlreadyParsed);
            }
            Ok(())
        });
        let query = Query::new("PRs", group).with_per_node(Some(per_node));

        let page = json!({
            "edges": [
                {"node": {"__typename": "PullRequest", "id": "PR1", "updatedAt": "new",
                    "comments": {"edges": [{"node": {"__typename": "IssueComment", "id": "C1"}, "cursor": "x"}],
                                 "pageInfo": {"hasNextPage": false}}}, "cursor": "a"},
                {"node": {"__typename": "PullRequest", "id": "PR2", "updatedAt": "old",
                    "comments": {"edges": [{"node": {"__typename": "IssueComment", "id": "C2"}, "cursor": "y"}],
                                 "pageInfo": {"hasNextPage": false}}}, "cursor": "b"},
                {"node": {"__typename": "PullRequest", "id": "PR3", "updatedAt": "new"}, "cursor": "c"}
            ],
            "pageInfo": {"hasNextPage": true}
        });
        let mut graph = NodeGraph::new();
        let follow_ups = scan_response(&query, &page, &mut graph);

        assert!(follow_ups.is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["PR1", "C1", "PR2"]);
        assert!(graph.contains(&NodeKey::new("PR1", None)));
        assert!(!graph.contains(&NodeKey::new("PR2", None)));
        assert!(!graph.contains(&NodeKey::new("C2", Some("PR2".to_string()))));
        assert!(!graph.contains(&NodeKey::new("PR3", None)));
    }

    #[test]
    fn test_containers_pass_parent_through() {
        let label = Fragment::on("Label", elements![Field::id(), "name"]);
        let labels = Group::new("labels", elements![label]).with_paging(Paging::First { count: 5, paging: false });
        // `viewer` has no id, so it is a container rather than a node
        let repo = Fragment::on("Repository", elements![Field::id(), labels]);
        let repos = Group::new("watching", elements![repo]).with_paging(Paging::first(10));
        let viewer = Group::new("viewer", elements![repos]);
        let query = Query::new("Repos", viewer);

        let data = json!({
            "__typename": "User",
            "watching": {"edges": [{"node": {"__typename": "Repository", "id": "R1",
                "labels": {"edges": [{"node": {"__typename": "Label", "id": "L1", "name": "bug"}}]}},
                "cursor": "r1"}],
                "pageInfo": {"hasNextPage": false}}
        });
        let mut graph = NodeGraph::new();
        scan_response(&query, &data, &mut graph);

        let repo = graph.get(&NodeKey::new("R1", None)).unwrap();
        assert!(repo.parent.is_none());
        let label = graph.get(&NodeKey::new("L1", Some("R1".to_string()))).unwrap();
        assert_eq!(label.parent_id(), Some("R1"));
    }

    #[test]
    fn test_batch_page_follow_up_narrows_to_item() {
        let comments = Group::new("comments", elements![Fragment::on("IssueComment", elements![Field::id()])])
            .with_paging(Paging::first(1));
        let item = Fragment::on("PullRequest", elements![Field::id(), "title", comments]);
        let ids = vec!["PR1".to_string(), "PR2".to_string()];
        let queries = Query::batching("Details", &ids, 10_000, None, elements![item]);
        assert_eq!(queries.len(), 1);
        let query = &queries[0];

        let data = json!([
            {"__typename": "PullRequest", "id": "PR1", "title": "a",
             "comments": {"edges": [{"node": {"__typename": "IssueComment", "id": "C1"}, "cursor": "k1"}],
                          "pageInfo": {"hasNextPage": true}}},
            {"__typename": "PullRequest", "id": "PR2", "title": "b",
             "comments": {"edges": [{"node": {"__typename": "IssueComment", "id": "C2"}, "cursor": "k2"}],
                          "pageInfo": {"hasNextPage": false}}}
        ]);
        let mut graph = NodeGraph::new();
        let follow_ups = scan_response(query, &data, &mut graph);

        assert_eq!(graph.len(), 4);
        assert_eq!(follow_ups.len(), 1);
        let Element::Batch(shell) = follow_ups[0].root() else {
            panic!("expected batch shell");
        };
        assert_eq!(shell.page(), &["PR1".to_string()]);
        let text = follow_ups[0].query_text();
        assert!(text.contains("after: \"k1\""));
        assert!(!text.contains("title"));
    }

    #[test]
    fn test_batch_remainder_follow_up() {
        let ids: Vec<String> = (0..3).map(|i| format!("R{i}")).collect();
        let issues = Group::new("issues", elements![Field::id()]).with_paging(Paging::first(50));
        let item = Fragment::on("Repository", elements![Field::id(), issues]);
        // Each repository may cost 50 nodes, so two fit in a budget of 100
        let query = Query::batch_chain("Repos", &ids, 100, None, elements![item]).unwrap();
        let Element::Batch(batch) = query.root() else {
            panic!("expected batch root");
        };
        assert_eq!(batch.page(), &ids[..2]);

        let data = json!([
            {"__typename": "Repository", "id": "R0"},
            null
        ]);
        let mut graph = NodeGraph::new();
        let follow_ups = scan_response(&query, &data, &mut graph);
        assert_eq!(graph.len(), 1);
        assert_eq!(follow_ups.len(), 1);

        let Element::Batch(rest) = follow_ups[0].root() else {
            panic!("expected batch remainder");
        };
        assert_eq!(rest.page(), &ids[2..]);
        assert_ne!(rest.alias(), "nodes");

        let data = json!([{"__typename": "Repository", "id": "R2"}]);
        assert!(scan_response(&follow_ups[0], &data, &mut graph).is_empty());
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_scoped_query_hangs_nodes_under_parent() {
        let comments = Group::new("comments", elements![Fragment::on("IssueComment", elements![Field::id()])])
            .with_paging(Paging::first(10));
        let query = Query::new("Comments", comments).scoped_to(ParentRef::new("I1", "Issue"));
        let page = json!({"edges": [{"node": {"__typename": "IssueComment", "id": "C1"}, "cursor": "z"}],
                          "pageInfo": {"hasNextPage": true}});
        let mut graph = NodeGraph::new();
        let follow_ups = scan_response(&query, &page, &mut graph);

        let comment = graph.get(&NodeKey::new("C1", Some("I1".to_string()))).unwrap();
        assert_eq!(comment.parent_id(), Some("I1"));
        assert_eq!(follow_ups.len(), 1);
        assert_eq!(follow_ups[0].parent(), query.parent());
        assert!(follow_ups[0].query_text().contains("node(id: \"I1\")"));
    }

    #[test]
    fn test_nested_page_is_scoped_to_its_node() {
        let issues = Group::new("issues", elements![Fragment::on("Issue", elements![Field::id()])])
            .with_paging(Paging::first(1));
        let repo = Fragment::on("Repository", elements![Field::id(), "name", issues]);
        let watching = Group::new("watching", elements![repo]).with_paging(Paging::first(2));
        let query = Query::new("Repos", Group::new("viewer", elements![watching]));

        let data = json!({
            "__typename": "User",
            "watching": {"edges": [
                {"node": {"__typename": "Repository", "id": "R1", "name": "one",
                    "issues": {"edges": [{"node": {"__typename": "Issue", "id": "I1"}, "cursor": "k1"}],
                               "pageInfo": {"hasNextPage": true}}}, "cursor": "r1"},
                {"node": {"__typename": "Repository", "id": "R2", "name": "two",
                    "issues": {"edges": [{"node": {"__typename": "Issue", "id": "I2"}, "cursor": "k2"}],
                               "pageInfo": {"hasNextPage": false}}}, "cursor": "r2"}
            ], "pageInfo": {"hasNextPage": false}}
        });
        let mut graph = NodeGraph::new();
        let follow_ups = scan_response(&query, &data, &mut graph);

        assert_eq!(graph.len(), 4);
        assert_eq!(follow_ups.len(), 1);
        let next = &follow_ups[0];
        assert_eq!(next.parent(), Some(&ParentRef::new("R1", "Repository")));
        let text = next.query_text();
        assert!(text.contains("node(id: \"R1\") { ... on Repository {"));
        assert!(text.contains("after: \"k1\""));
        assert!(!text.contains("watching"));
        assert!(!text.contains("viewer"));
        assert!(!text.contains(" name "));

        // The next page hangs under the same repository as the first one
        let page = json!({
            "__typename": "Repository", "id": "R1",
            "issues": {"edges": [{"node": {"__typename": "Issue", "id": "I3"}, "cursor": "k3"}],
                       "pageInfo": {"hasNextPage": true}}
        });
        let response = json!({"data": {"node": page}});
        let data = next.locate_root_data(&response).unwrap().unwrap();
        let again = scan_response(next, data, &mut graph);
        let issue = graph.get(&NodeKey::new("I3", Some("R1".to_string()))).unwrap();
        assert_eq!(issue.parent_id(), Some("R1"));
        assert_eq!(again.len(), 1);
        assert!(again[0].query_text().contains("after: \"k3\""));
        assert_eq!(again[0].parent(), next.parent());
    }

    #[test]
    fn test_page_under_batch_child_is_scoped_to_child() {
        let comments = Group::new("comments", elements![Fragment::on("PullRequestReviewComment", elements![Field::id()])])
            .with_paging(Paging::first(1));
        let review = Fragment::on("PullRequestReview", elements![Field::id(), "state", comments]);
        let reviews = Group::new("reviews", elements![review]).with_paging(Paging::first(5));
        let item = Fragment::on("PullRequest", elements![Field::id(), reviews]);
        let queries = Query::batching("Details", &["PR1".to_string()], 10_000, None, elements![item]);

        let data = json!([
            {"__typename": "PullRequest", "id": "PR1",
             "reviews": {"edges": [{"node": {"__typename": "PullRequestReview", "id": "V1", "state": "APPROVED",
                 "comments": {"edges": [{"node": {"__typename": "PullRequestReviewComment", "id": "RC1"}, "cursor": "m1"}],
                              "pageInfo": {"hasNextPage": true}}}, "cursor": "v1"}],
                         "pageInfo": {"hasNextPage": false}}}
        ]);
        let mut graph = NodeGraph::new();
        let follow_ups = scan_response(&queries[0], &data, &mut graph);

        assert_eq!(follow_ups.len(), 1);
        let parent = follow_ups[0].parent().unwrap();
        assert_eq!(parent.key, NodeKey::new("V1", Some("PR1".to_string())));
        assert_eq!(parent.element_type, "PullRequestReview");
        let text = follow_ups[0].query_text();
        assert!(text.contains("node(id: \"V1\")"));
        assert!(text.contains("after: \"m1\""));
        assert!(!text.contains("nodes(ids:"));
    }
}
