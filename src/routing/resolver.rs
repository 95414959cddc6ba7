//! Route file resolution.
//!
//! # Responsibilities
//! - Validate the request path before touching the filesystem
//! - Build the ordered candidate list for a path
//! - Return the first candidate that exists
//!
//! # Resolution Order
//! ```text
//! /a/b/c
//!     → a/b/c.func.<ext>            exact file
//!     → a/b/c/index.func.<ext>      directory index
//!     → a/b/c/default.func.<ext>    same-level wildcard
//!     → a/b/default.func.<ext>      nearest ancestor wildcard
//!     → a/default.func.<ext>
//!     → default.func.<ext>          root wildcard
//! ```
//! Within each step, extensions are tried in configured order.

use std::path::{Path, PathBuf};

use crate::config::Environment;
use crate::error::FuncError;

/// Normalize a request path into the key used for queueing and caching.
///
/// Drops the query string and surrounding slashes; `/` becomes the empty key.
pub fn route_key(uri_path: &str) -> String {
    let path = uri_path.split('?').next().unwrap_or_default();
    path.trim_matches('/').to_string()
}

/// Split a route key into path segments, rejecting traversal.
pub fn route_segments(key: &str) -> Result<Vec<&str>, FuncError> {
    let only_dots = !key.is_empty()
        && key.chars().all(|c| matches!(c, '.' | '/' | '\\'));
    if only_dots {
        return Err(FuncError::IllegalInput("Illegal characters".into()));
    }

    let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    for segment in &segments {
        if *segment == "." || *segment == ".." || segment.contains('\\') || segment.contains('\0') {
            return Err(FuncError::IllegalInput("Illegal characters".into()));
        }
    }
    Ok(segments)
}

/// Candidate handler files for `segments` under `root`, highest priority first.
pub fn route_files(root: &Path, segments: &[&str], extensions: &[String]) -> Vec<PathBuf> {
    let mut dir = root.to_path_buf();
    for segment in segments {
        dir.push(segment);
    }

    let mut files = Vec::with_capacity(extensions.len() * (segments.len() + 3));

    if let Some((last, parents)) = segments.split_last() {
        let mut parent = root.to_path_buf();
        for segment in parents {
            parent.push(segment);
        }
        for ext in extensions {
            files.push(parent.join(format!("{last}.func.{ext}")));
        }
    }
    for ext in extensions {
        files.push(dir.join(format!("index.func.{ext}")));
    }
    for ext in extensions {
        files.push(dir.join(format!("default.func.{ext}")));
    }

    // Ancestors, nearest first, down to the root itself.
    for depth in (0..segments.len()).rev() {
        let mut ancestor = root.to_path_buf();
        for segment in &segments[..depth] {
            ancestor.push(segment);
        }
        for ext in extensions {
            files.push(ancestor.join(format!("default.func.{ext}")));
        }
    }

    files
}

/// A resolved route: the key, every candidate searched, and the winner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub key: String,
    pub candidates: Vec<PathBuf>,
    pub file: PathBuf,
}

/// Maps request paths onto handler files below a root directory.
#[derive(Debug, Clone)]
pub struct RouteResolver {
    root: PathBuf,
    extensions: Vec<String>,
    env: Environment,
}

impl RouteResolver {
    pub fn new(root: impl Into<PathBuf>, extensions: Vec<String>, env: Environment) -> Self {
        Self {
            root: root.into(),
            extensions,
            env,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ordered candidate list for a route key.
    pub fn candidates(&self, key: &str) -> Result<Vec<PathBuf>, FuncError> {
        let segments = route_segments(key)?;
        Ok(route_files(&self.root, &segments, &self.extensions))
    }

    /// Resolve a route key to the first existing candidate.
    pub fn resolve(&self, key: &str) -> Result<RouteEntry, FuncError> {
        let candidates = self.candidates(key)?;

        if let Some(file) = candidates.iter().find(|p| p.is_file()).cloned() {
            return Ok(RouteEntry {
                key: key.to_string(),
                candidates,
                file,
            });
        }

        let message = if self.env.is_production() {
            "Not found.".to_string()
        } else {
            let listing = candidates
                .iter()
                .map(|p| format!("- {}", p.display()))
                .collect::<Vec<_>>()
                .join("\n");
            format!("Not found function file.\nSearch paths:\n{listing}")
        };
        Err(FuncError::NotFound(message))
    }
}
