//! Dependency graph checks.
//!
//! Tasks depend on tasks; subtasks depend on sibling subtasks. Each level is
//! checked as its own graph. An edge is invalid when it points at itself,
//! at an id that does not exist, repeats an earlier edge, or closes a cycle.
//! Cycle edges are the back edges of a depth-first walk in id order, so
//! removing every reported edge always leaves an acyclic graph.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use super::types::{Task, TaskId, TaskRef};

/// Adjacency list: node → the nodes it depends on.
pub type Graph = BTreeMap<TaskId, Vec<TaskId>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    SelfReference,
    Missing,
    Duplicate,
    Cycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyIssue {
    pub task: TaskRef,
    pub dependency: TaskRef,
    pub kind: IssueKind,
}

pub fn task_graph(tasks: &[Task]) -> Graph {
    tasks
        .iter()
        .map(|task| (task.id, task.dependencies.clone()))
        .collect()
}

pub fn subtask_graph(task: &Task) -> Graph {
    task.subtasks
        .iter()
        .map(|sub| (sub.id, sub.dependencies.clone()))
        .collect()
}

/// Whether adding the edge `from → to` would close a cycle, i.e. `from` is
/// already reachable from `to`.
pub fn creates_cycle(graph: &Graph, from: TaskId, to: TaskId) -> bool {
    if from == to {
        return true;
    }

    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([to]);

    while let Some(node) = queue.pop_front() {
        if node == from {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        if let Some(edges) = graph.get(&node) {
            queue.extend(edges.iter().copied());
        }
    }

    false
}

/// Reports every invalid dependency edge without changing anything.
pub fn validate(tasks: &[Task]) -> Vec<DependencyIssue> {
    let (_, mut issues) = check_level(&task_graph(tasks), TaskRef::Task);

    for task in tasks {
        let parent = task.id;
        let (_, sub_issues) = check_level(&subtask_graph(task), |id| TaskRef::Subtask(parent, id));
        issues.extend(sub_issues);
    }

    issues
}

/// Removes every invalid dependency edge and returns what was removed.
pub fn fix(tasks: &mut [Task]) -> Vec<DependencyIssue> {
    let (mut cleaned, mut issues) = check_level(&task_graph(tasks), TaskRef::Task);
    for task in tasks.iter_mut() {
        if let Some(edges) = cleaned.remove(&task.id) {
            task.dependencies = edges;
        }
    }

    for task in tasks.iter_mut() {
        let parent = task.id;
        let (mut cleaned, sub_issues) =
            check_level(&subtask_graph(task), |id| TaskRef::Subtask(parent, id));
        for sub in task.subtasks.iter_mut() {
            if let Some(edges) = cleaned.remove(&sub.id) {
                sub.dependencies = edges;
            }
        }
        issues.extend(sub_issues);
    }

    issues
}

fn check_level<F>(graph: &Graph, address: F) -> (Graph, Vec<DependencyIssue>)
where
    F: Fn(TaskId) -> TaskRef,
{
    let known: BTreeSet<TaskId> = graph.keys().copied().collect();
    let mut issues = Vec::new();
    let mut cleaned = Graph::new();

    for (&id, deps) in graph {
        let mut seen = HashSet::new();
        let edges = cleaned.entry(id).or_default();

        for &dep in deps {
            let kind = if dep == id {
                Some(IssueKind::SelfReference)
            } else if !known.contains(&dep) {
                Some(IssueKind::Missing)
            } else if !seen.insert(dep) {
                Some(IssueKind::Duplicate)
            } else {
                None
            };

            match kind {
                Some(kind) => issues.push(DependencyIssue {
                    task: address(id),
                    dependency: address(dep),
                    kind,
                }),
                None => edges.push(dep),
            }
        }
    }

    for (from, to) in back_edges(&cleaned) {
        if let Some(edges) = cleaned.get_mut(&from) {
            edges.retain(|&dep| dep != to);
        }
        issues.push(DependencyIssue {
            task: address(from),
            dependency: address(to),
            kind: IssueKind::Cycle,
        });
    }

    (cleaned, issues)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

fn back_edges(graph: &Graph) -> Vec<(TaskId, TaskId)> {
    fn visit(
        node: TaskId,
        graph: &Graph,
        marks: &mut HashMap<TaskId, Mark>,
        out: &mut Vec<(TaskId, TaskId)>,
    ) {
        marks.insert(node, Mark::Visiting);
        if let Some(edges) = graph.get(&node) {
            for &next in edges {
                match marks.get(&next) {
                    Some(Mark::Visiting) => out.push((node, next)),
                    Some(Mark::Done) => {}
                    None => visit(next, graph, marks, out),
                }
            }
        }
        marks.insert(node, Mark::Done);
    }

    let mut marks = HashMap::new();
    let mut out = Vec::new();
    for &node in graph.keys() {
        if !marks.contains_key(&node) {
            visit(node, graph, &mut marks, &mut out);
        }
    }
    out
}
