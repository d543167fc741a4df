//! Path-scoped permissions: the `"<path>:<mode>"` grammar, hierarchical
//! resolution, and listing visibility.
//!
//! Scopes are hierarchical: granting `/projects:rw` covers `/projects/x`,
//! while a deeper entry for `/projects/x` overrides the inherited mode. A
//! caller can also navigate *through* an ancestor it has no right to read,
//! down to a sub-path it was explicitly granted; `filter_visible` implements
//! that pass-through rule.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::types::AuthError;

/// Permission mode of a single scope entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "rw")]
    ReadWrite,
}

impl AccessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::ReadWrite => "rw",
        }
    }

    pub fn allows_write(self) -> bool {
        matches!(self, AccessMode::ReadWrite)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One granted capability: a path and the mode granted on its subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub path: String,
    pub mode: AccessMode,
}

impl Scope {
    /// Parses a single `"<path>:<mode>"` entry. The split is on the first
    /// separator; the path must be absolute.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let (path, mode) = raw
            .split_once(':')
            .ok_or_else(|| AuthError::MalformedScope(raw.to_string()))?;
        let mode = match mode {
            "r" => AccessMode::Read,
            "rw" => AccessMode::ReadWrite,
            _ => return Err(AuthError::MalformedScope(raw.to_string())),
        };
        let path = normalize_path(path).ok_or_else(|| AuthError::MalformedScope(raw.to_string()))?;
        Ok(Scope { path, mode })
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.mode)
    }
}

/// A set of granted scopes: a mapping from path to mode. Duplicate paths
/// collapse to the last occurrence at parse time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet {
    grants: BTreeMap<String, AccessMode>,
}

impl ScopeSet {
    pub fn new() -> Self {
        ScopeSet::default()
    }

    /// Parses a list of scope strings into a set. Later entries for the same
    /// path overwrite earlier ones.
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self, AuthError> {
        let mut set = ScopeSet::new();
        for entry in raw {
            set.insert(Scope::parse(entry.as_ref())?);
        }
        Ok(set)
    }

    pub fn insert(&mut self, scope: Scope) {
        self.grants.insert(scope.path, scope.mode);
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Scope> + '_ {
        self.grants.iter().map(|(path, mode)| Scope { path: path.clone(), mode: *mode })
    }

    /// Serializes the set back to wire-format scope strings, one per path.
    pub fn to_scope_strings(&self) -> Vec<String> {
        self.grants.iter().map(|(path, mode)| format!("{path}:{mode}")).collect()
    }

    /// Effective mode for `path`: walks the ancestor chain from root to leaf
    /// and lets each granted ancestor overwrite the running result, so the
    /// deepest matching ancestor wins. No matching ancestor means no
    /// permission.
    pub fn resolve(&self, path: &str) -> Option<AccessMode> {
        let path = normalize_path(path)?;
        let mut effective = None;
        for ancestor in ancestor_chain(&path) {
            if let Some(mode) = self.grants.get(&ancestor) {
                effective = Some(*mode);
            }
        }
        effective
    }

    pub fn can_read(&self, path: &str) -> bool {
        self.resolve(path).is_some()
    }

    pub fn can_write(&self, path: &str) -> bool {
        self.resolve(path).is_some_and(AccessMode::allows_write)
    }

    /// Filters a directory listing down to what the holder may see.
    ///
    /// With read permission on `parent` the listing is returned unchanged.
    /// Otherwise a candidate stays visible when the holder can read it
    /// directly, or when it sits on the ancestor chain of some granted path
    /// (a pass-through entry usable for navigation only; siblings of a
    /// granted path are never exposed).
    ///
    /// `None` is the no-access sentinel: nothing visible and no read grant
    /// anywhere in the set. An empty `Some` is an accessible-but-empty
    /// listing.
    pub fn filter_visible(
        &self,
        parent: &str,
        candidates: Vec<String>,
    ) -> Option<Vec<String>> {
        if self.can_read(parent) {
            return Some(candidates);
        }
        let kept: Vec<String> = candidates
            .into_iter()
            .filter(|candidate| {
                let Some(normalized) = normalize_path(candidate) else {
                    return false;
                };
                self.can_read(&normalized)
                    || self.grants.keys().any(|granted| is_strict_ancestor(&normalized, granted))
            })
            .collect();
        if kept.is_empty() && self.grants.is_empty() {
            return None;
        }
        Some(kept)
    }
}

/// True when `candidate` is a strict ancestor of `granted` (`granted` lies
/// somewhere below it).
fn is_strict_ancestor(candidate: &str, granted: &str) -> bool {
    if candidate == "/" {
        return granted != "/";
    }
    granted.len() > candidate.len()
        && granted.starts_with(candidate)
        && granted.as_bytes()[candidate.len()] == b'/'
}

/// Normalizes an absolute path: trims the trailing slash (except root) and
/// rejects relative paths and empty segments.
fn normalize_path(raw: &str) -> Option<String> {
    if !raw.starts_with('/') {
        return None;
    }
    if raw == "/" {
        return Some("/".to_string());
    }
    let trimmed = raw.strip_suffix('/').unwrap_or(raw);
    if trimmed.is_empty() || trimmed[1..].split('/').any(str::is_empty) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Ancestor chain of a normalized path, root first: `/a/b/c` yields
/// `["/", "/a", "/a/b", "/a/b/c"]`.
fn ancestor_chain(path: &str) -> Vec<String> {
    let mut chain = vec!["/".to_string()];
    let mut acc = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        acc.push('/');
        acc.push_str(segment);
        chain.push(acc.clone());
    }
    chain
}
