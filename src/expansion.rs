use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// Folder paths currently expanded in the tree view. The top level has no
/// node of its own and is always visible.
///
/// The set is keyed by path only, so it survives tree rebuilds; entries for
/// folders that no longer exist simply never match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ExpansionState {
    expanded: BTreeSet<String>,
}

impl ExpansionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expanded<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            expanded: paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Flips membership and returns the new state of `path`.
    pub fn toggle(&mut self, path: &str) -> bool {
        if self.expanded.remove(path) {
            false
        } else {
            self.expanded.insert(path.to_string());
            true
        }
    }

    pub fn is_expanded(&self, path: &str) -> bool {
        self.expanded.contains(path)
    }

    pub fn expand(&mut self, path: &str) {
        self.expanded.insert(path.to_string());
    }

    pub fn collapse(&mut self, path: &str) {
        self.expanded.remove(path);
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.expanded.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.expanded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expanded.is_empty()
    }

    /// Copy that keeps only the paths found in `valid_paths`.
    pub fn retain_valid<'a, I>(&self, valid_paths: I) -> ExpansionState
    where
        I: IntoIterator<Item = &'a str>,
    {
        let valid: HashSet<&str> = valid_paths.into_iter().collect();
        Self {
            expanded: self
                .expanded
                .iter()
                .filter(|path| valid.contains(path.as_str()))
                .cloned()
                .collect(),
        }
    }
}
