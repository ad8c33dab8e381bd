use crate::error::{AppError, Result};
use crate::expansion::ExpansionState;
use crate::models::{NodeKind, TreeNode};
use crate::utils::locale_compare;
use log::{debug, warn};
use serde::Serialize;
use std::cmp::Ordering;
use std::time::Instant;

/// Checks that a project path is non-empty, `/`-delimited, has no leading or
/// trailing slash and no empty, `.` or `..` segments.
pub fn validate_path(requested_path: &str) -> Result<()> {
    let reject = |reason: &'static str| {
        Err(AppError::MalformedPath {
            path: requested_path.to_string(),
            reason,
        })
    };

    if requested_path.is_empty() {
        return reject("path is empty");
    }
    if requested_path.starts_with('/') {
        return reject("leading slash");
    }
    if requested_path.ends_with('/') {
        return reject("trailing slash");
    }
    for segment in requested_path.split('/') {
        match segment {
            "" => return reject("empty path segment"),
            "." | ".." => return reject("relative path segment"),
            _ => {}
        }
    }
    Ok(())
}

/// A row of the flattened, expansion-aware view of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeRow {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub name: String,
    pub path: String,
    pub depth: usize,
    pub expanded: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathTree {
    roots: Vec<TreeNode>,
    collisions: Vec<AppError>,
}

impl PathTree {
    pub fn roots(&self) -> &[TreeNode] {
        &self.roots
    }

    /// `PathTypeCollision` diagnostics recorded while folding paths in.
    pub fn collisions(&self) -> &[AppError] {
        &self.collisions
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Leaf paths in display order.
    pub fn file_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        collect_paths(&self.roots, NodeKind::File, &mut paths);
        paths
    }

    pub fn folder_paths(&self) -> Vec<&str> {
        let mut paths = Vec::new();
        collect_paths(&self.roots, NodeKind::Folder, &mut paths);
        paths
    }

    /// Flattens the tree into the rows a renderer shows: top-level nodes
    /// always, children only below expanded folders.
    pub fn visible(&self, expansion: &ExpansionState) -> Vec<TreeRow> {
        let mut rows = Vec::new();
        push_visible(&self.roots, expansion, 0, &mut rows);
        rows
    }
}

fn collect_paths<'a>(nodes: &'a [TreeNode], kind: NodeKind, paths: &mut Vec<&'a str>) {
    for node in nodes {
        if node.kind() == kind {
            paths.push(node.path());
        }
        collect_paths(node.children(), kind, paths);
    }
}

fn push_visible(
    nodes: &[TreeNode],
    expansion: &ExpansionState,
    depth: usize,
    rows: &mut Vec<TreeRow>,
) {
    for node in nodes {
        let expanded = node.kind() == NodeKind::Folder && expansion.is_expanded(node.path());
        rows.push(TreeRow {
            kind: node.kind(),
            name: node.name().to_string(),
            path: node.path().to_string(),
            depth,
            expanded,
        });
        if expanded {
            push_visible(node.children(), expansion, depth + 1, rows);
        }
    }
}

/// Builds the tree for a set of project paths. Always a full rebuild.
///
/// Every path is validated before anything is built. Construction order only
/// matters for type collisions, where the first declaration of a node wins.
pub fn build_tree<S: AsRef<str>>(paths: &[S]) -> Result<PathTree> {
    let start_time = Instant::now();
    for path in paths {
        validate_path(path.as_ref())?;
    }

    let mut tree = PathTree::default();
    for path in paths {
        if let Some(collision) = insert_path(&mut tree.roots, path.as_ref()) {
            warn!("{}", collision);
            tree.collisions.push(collision);
        }
    }
    sort_nodes(&mut tree.roots);

    debug!(
        "Built file tree from {} paths in {:.2?}.",
        paths.len(),
        start_time.elapsed()
    );
    Ok(tree)
}

fn insert_path(roots: &mut Vec<TreeNode>, path: &str) -> Option<AppError> {
    let segments: Vec<&str> = path.split('/').collect();
    let mut level = roots;
    let mut full_path = String::new();

    for (index, segment) in segments.iter().enumerate() {
        if !full_path.is_empty() {
            full_path.push('/');
        }
        full_path.push_str(segment);
        let is_last = index == segments.len() - 1;

        let position = match level.iter().position(|node| node.name() == *segment) {
            Some(position) => position,
            None => {
                level.push(if is_last {
                    TreeNode::file(segment, &full_path)
                } else {
                    TreeNode::folder(segment, &full_path)
                });
                level.len() - 1
            }
        };

        match (&mut level[position], is_last) {
            (TreeNode::File { .. }, true) => return None,
            (TreeNode::Folder { children, .. }, false) => level = children,
            (existing, _) => {
                return Some(AppError::PathTypeCollision {
                    path: full_path,
                    existing: existing.kind(),
                })
            }
        }
    }
    None
}

fn sort_nodes(nodes: &mut [TreeNode]) {
    nodes.sort_by(|a, b| match (a.kind(), b.kind()) {
        (NodeKind::Folder, NodeKind::File) => Ordering::Less,
        (NodeKind::File, NodeKind::Folder) => Ordering::Greater,
        _ => locale_compare(a.name(), b.name()),
    });
    for node in nodes.iter_mut() {
        if let TreeNode::Folder { children, .. } = node {
            sort_nodes(children);
        }
    }
}
