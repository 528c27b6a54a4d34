//! Pure graph analysis over an [`IssueGraph`] snapshot.

use std::collections::{HashMap, HashSet, VecDeque};

use super::{GraphReport, IssueGraph, IssueTree, TreeBranch, TreeNode, TreeOption};
use crate::storage::{Node, NodeType};

/// Semantic tag carried by a category's root question.
pub fn root_semantic_id(category: &str) -> String {
    format!("{}_start", category)
}

/// Locate the root question of a category.
///
/// The active question tagged `<category>_start` wins; otherwise the
/// earliest-created active question.
pub fn find_root<'a>(category: &str, nodes: &'a [Node]) -> Option<&'a Node> {
    let tag = root_semantic_id(category);
    let questions = nodes
        .iter()
        .filter(|n| n.is_active && n.node_type == NodeType::Question);

    questions
        .clone()
        .find(|n| n.semantic_id.as_deref() == Some(tag.as_str()))
        .or_else(|| questions.min_by_key(|n| n.created_at))
}

/// Active questions without an active outgoing connection, in node order.
pub fn incomplete_questions(graph: &IssueGraph) -> Vec<String> {
    let answered: HashSet<&str> = graph
        .connections
        .iter()
        .map(|c| c.from_node_id.as_str())
        .collect();

    graph
        .nodes
        .iter()
        .filter(|n| n.node_type == NodeType::Question && !answered.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

fn adjacency(graph: &IssueGraph) -> HashMap<&str, Vec<&str>> {
    let members: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();
    let mut adj: HashMap<&str, Vec<&str>> = HashMap::new();
    for c in &graph.connections {
        if members.contains(c.to_node_id.as_str()) {
            adj.entry(c.from_node_id.as_str())
                .or_default()
                .push(c.to_node_id.as_str());
        }
    }
    adj
}

/// Active nodes that cannot be reached from `root_id` within the category.
pub fn unreachable_nodes(graph: &IssueGraph, root_id: Option<&str>) -> Vec<String> {
    let adj = adjacency(graph);
    let mut seen: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    if let Some(root) = root_id {
        seen.insert(root);
        queue.push_back(root);
    }
    while let Some(id) = queue.pop_front() {
        for &next in adj.get(id).map(Vec::as_slice).unwrap_or_default() {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }

    graph
        .nodes
        .iter()
        .filter(|n| !seen.contains(n.id.as_str()))
        .map(|n| n.id.clone())
        .collect()
}

/// Whether the category's active graph contains a directed cycle.
pub fn has_cycle(graph: &IssueGraph) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Open,
        Done,
    }

    let adj = adjacency(graph);
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for start in graph.nodes.iter().map(|n| n.id.as_str()) {
        if marks.contains_key(start) {
            continue;
        }
        // (node, index of next child to visit)
        let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
        marks.insert(start, Mark::Open);

        while let Some((id, child)) = stack.pop() {
            let children = adj.get(id).map(Vec::as_slice).unwrap_or_default();
            if let Some(&next) = children.get(child) {
                stack.push((id, child + 1));
                match marks.get(next) {
                    Some(Mark::Open) => return true,
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::Open);
                        stack.push((next, 0));
                    }
                }
            } else {
                marks.insert(id, Mark::Done);
            }
        }
    }

    false
}

/// Build the completeness report for a graph.
pub fn report(graph: &IssueGraph) -> GraphReport {
    let root_node_id = find_root(&graph.category, &graph.nodes).map(|n| n.id.clone());

    GraphReport {
        category: graph.category.clone(),
        incomplete_question_ids: incomplete_questions(graph),
        unreachable_node_ids: unreachable_nodes(graph, root_node_id.as_deref()),
        has_cycle: has_cycle(graph),
        root_node_id,
    }
}

/// Render the tree reachable from `root`.
///
/// Each node is expanded once. A later edge into a node on the current path
/// becomes [`TreeBranch::Revisit`]; an edge into a node expanded elsewhere
/// becomes [`TreeBranch::Shared`]. Output size is linear in the graph.
pub fn render_tree(graph: &IssueGraph, root: &Node) -> IssueTree {
    let mut walk = TreeWalk {
        path: vec![root.id.clone()],
        expanded: HashSet::from([root.id.clone()]),
    };
    IssueTree {
        category: graph.category.clone(),
        root: walk.render(graph, root),
    }
}

struct TreeWalk {
    path: Vec<String>,
    expanded: HashSet<String>,
}

impl TreeWalk {
    fn render(&mut self, graph: &IssueGraph, node: &Node) -> TreeNode {
        let options = graph
            .outgoing(&node.id)
            .map(|c| {
                let next = if self.path.iter().any(|id| id == &c.to_node_id) {
                    TreeBranch::Revisit {
                        node_id: c.to_node_id.clone(),
                    }
                } else if self.expanded.contains(&c.to_node_id) {
                    TreeBranch::Shared {
                        node_id: c.to_node_id.clone(),
                    }
                } else if let Some(target) = graph.node(&c.to_node_id) {
                    self.expanded.insert(target.id.clone());
                    self.path.push(target.id.clone());
                    let child = self.render(graph, target);
                    self.path.pop();
                    TreeBranch::Node(Box::new(child))
                } else {
                    TreeBranch::External {
                        node_id: c.to_node_id.clone(),
                    }
                };

                TreeOption {
                    connection_id: c.id.clone(),
                    label: c.label.clone(),
                    next,
                }
            })
            .collect();

        TreeNode {
            node_id: node.id.clone(),
            node_type: node.node_type,
            text: node.text.clone(),
            options,
        }
    }
}
