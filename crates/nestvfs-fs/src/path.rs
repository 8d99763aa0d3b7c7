//! Path tokenizing and normalization.
//!
//! Every layer of the VFS addresses nodes with `/`-separated strings. This
//! module turns those strings into segment lists with `.` and `..` resolved,
//! and refuses anything that would climb above the root instead of silently
//! truncating it.

use std::fmt;

use crate::error::{Error, Result};

const CURRENT: &str = ".";
const PARENT: &str = "..";

/// Split a path on `/`.
///
/// Leading and trailing separators are ignored. An empty string yields
/// `None`; a bare `/` yields an empty token list (the root). Interior empty
/// segments (`a//b`) are malformed.
pub fn tokenize(path: &str) -> Result<Option<Vec<String>>> {
    if path.is_empty() {
        return Ok(None);
    }

    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Ok(Some(Vec::new()));
    }

    let mut tokens = Vec::new();
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            return Err(Error::MalformedPath {
                path: path.to_string(),
            });
        }
        tokens.push(segment.to_string());
    }
    Ok(Some(tokens))
}

/// Resolve `.` and `..` tokens in place.
///
/// Works with a write cursor over the token buffer: `.` is dropped, `..`
/// moves the cursor back one slot, anything else is written at the cursor.
/// The depth is checked first, so a path that climbs above the root is
/// reported as written.
pub fn normalize(mut tokens: Vec<String>) -> Result<Vec<String>> {
    let mut depth = 0usize;
    for token in &tokens {
        match token.as_str() {
            CURRENT => {}
            PARENT => {
                depth = depth.checked_sub(1).ok_or_else(|| Error::EscapesRoot {
                    path: tokens.join("/"),
                })?;
            }
            _ => depth += 1,
        }
    }

    let mut cursor = 0usize;
    for read in 0..tokens.len() {
        match tokens[read].as_str() {
            CURRENT => {}
            PARENT => cursor -= 1,
            _ => {
                tokens.swap(cursor, read);
                cursor += 1;
            }
        }
    }

    tokens.truncate(cursor);
    Ok(tokens)
}

/// Rejoin `tokens[from..]` with `/`.
///
/// Used to hand the unresolved tail of a path to a nested context.
pub fn join_remaining(tokens: &[String], from: usize) -> String {
    tokens.get(from..).map(|rest| rest.join("/")).unwrap_or_default()
}

/// A normalized, root-relative path.
///
/// Never holds empty, `.` or `..` segments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath {
    segments: Vec<String>,
}

impl VirtualPath {
    pub fn root() -> Self {
        Self::default()
    }

    /// Tokenize and normalize `path`. The empty string is the root.
    pub fn parse(path: &str) -> Result<Self> {
        let segments = match tokenize(path)? {
            Some(tokens) => normalize(tokens)?,
            None => Vec::new(),
        };
        Ok(Self { segments })
    }

    pub fn from_segments(segments: Vec<String>) -> Result<Self> {
        if let Some(bad) = segments.iter().find(|s| s.is_empty() || s.contains('/')) {
            return Err(Error::MalformedPath { path: bad.clone() });
        }
        Ok(Self {
            segments: normalize(segments)?,
        })
    }

    /// Resolve `relative` against this path.
    pub fn join(&self, relative: &str) -> Result<Self> {
        let Some(tokens) = tokenize(relative)? else {
            return Ok(self.clone());
        };
        let mut combined = self.segments.clone();
        combined.extend(tokens);
        Ok(Self {
            segments: normalize(combined)?,
        })
    }

    /// Append one already-validated segment.
    pub fn child(&self, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains('/') {
            return Err(Error::MalformedPath {
                path: name.to_string(),
            });
        }
        self.join(name)
    }

    pub fn parent(&self) -> Option<Self> {
        let (_, init) = self.segments.split_last()?;
        Some(Self {
            segments: init.to_vec(),
        })
    }

    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.is_root()
    }

    pub fn starts_with(&self, prefix: &VirtualPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    /// The segments after `prefix`, if `prefix` is an ancestor (or equal).
    pub fn strip_prefix(&self, prefix: &VirtualPath) -> Option<VirtualPath> {
        self.segments.strip_prefix(prefix.segments.as_slice()).map(|rest| VirtualPath {
            segments: rest.to_vec(),
        })
    }

    pub fn split_at(&self, index: usize) -> (VirtualPath, VirtualPath) {
        let index = index.min(self.segments.len());
        let (head, tail) = self.segments.split_at(index);
        (
            VirtualPath {
                segments: head.to_vec(),
            },
            VirtualPath {
                segments: tail.to_vec(),
            },
        )
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(path: &str) -> Vec<String> {
        tokenize(path).unwrap().unwrap()
    }

    #[test]
    fn hidden_directory_with_trailing_slash() {
        let result = normalize(tokens("/home/user/.hidden/")).unwrap();
        assert_eq!(result, vec!["home", "user", ".hidden"]);
    }

    #[test]
    fn current_and_parent_tokens() {
        let result = normalize(tokens("a/./b/../c")).unwrap();
        assert_eq!(result, vec!["a", "c"]);
    }

    #[test]
    fn parent_above_root_fails() {
        let result = normalize(tokens("a/../../b"));
        assert!(matches!(result, Err(Error::EscapesRoot { .. })));
    }

    #[test]
    fn escape_reports_path_as_written() {
        match normalize(tokens("a/../b/../../x")) {
            Err(Error::EscapesRoot { path }) => assert_eq!(path, "a/../b/../../x"),
            other => panic!("expected EscapesRoot, got {other:?}"),
        }
    }

    #[test]
    fn empty_path_is_none() {
        assert!(tokenize("").unwrap().is_none());
        assert_eq!(tokenize("/").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn interior_empty_segment_is_malformed() {
        assert!(matches!(
            tokenize("a//b"),
            Err(Error::MalformedPath { .. })
        ));
    }

    #[test]
    fn join_remaining_from_index() {
        let t = tokens("a/b/c/d");
        assert_eq!(join_remaining(&t, 2), "c/d");
        assert_eq!(join_remaining(&t, 4), "");
        assert_eq!(join_remaining(&t, 9), "");
    }

    #[test]
    fn virtual_path_navigation() {
        let path = VirtualPath::parse("/lib/a.jar").unwrap();
        assert_eq!(path.name(), "a.jar");
        assert_eq!(path.parent().unwrap().to_string(), "lib");
        assert_eq!(path.join("../b.jar").unwrap().to_string(), "lib/b.jar");
        assert!(path.starts_with(&VirtualPath::parse("lib").unwrap()));
        assert!(VirtualPath::root().parent().is_none());
        assert!(path.child("x/y").is_err());
    }

    #[test]
    fn strip_prefix_and_split() {
        let path = VirtualPath::parse("a/b/c").unwrap();
        let prefix = VirtualPath::parse("a").unwrap();
        assert_eq!(path.strip_prefix(&prefix).unwrap().to_string(), "b/c");
        assert!(prefix.strip_prefix(&path).is_none());

        let (head, tail) = path.split_at(2);
        assert_eq!(head.to_string(), "a/b");
        assert_eq!(tail.to_string(), "c");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn segment() -> impl Strategy<Value = String> {
            prop_oneof![
                4 => "[a-z]{1,6}",
                1 => Just(".".to_string()),
                1 => Just("..".to_string()),
            ]
        }

        proptest! {
            #[test]
            fn normalized_tokens_are_plain(segments in prop::collection::vec(segment(), 0..12)) {
                if let Ok(normalized) = normalize(segments.clone()) {
                    prop_assert!(normalized.iter().all(|s| s != "." && s != ".." && !s.is_empty()));
                    prop_assert!(normalized.len() <= segments.len());
                }
            }

            #[test]
            fn normalization_is_idempotent(segments in prop::collection::vec(segment(), 0..12)) {
                if let Ok(once) = normalize(segments) {
                    let twice = normalize(once.clone()).unwrap();
                    prop_assert_eq!(once, twice);
                }
            }

            #[test]
            fn plain_paths_round_trip(segments in prop::collection::vec("[a-z]{1,6}", 1..8)) {
                let joined = segments.join("/");
                let parsed = VirtualPath::parse(&joined).unwrap();
                prop_assert_eq!(parsed.to_string(), joined);
            }
        }
    }
}
