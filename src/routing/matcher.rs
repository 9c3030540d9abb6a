//! Route prefix matching.
//!
//! # Responsibilities
//! - Normalize configured prefixes ("user", "/user/" → "/user")
//! - Match a request path on whole segments
//! - Split off the sub-path forwarded to the backend
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Segment boundaries are respected: "/user" never matches "/users"
//! - No regex to guarantee O(n) matching

/// Normalize a configured prefix to a leading slash and no trailing slash.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    format!("/{}", trimmed)
}

/// Matches the request path against a route prefix on segment boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: normalize_prefix(prefix.as_ref()),
        }
    }

    /// The normalized prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the sub-path after the prefix if `path` falls under it.
    ///
    /// The sub-path always starts with `/`.
    pub fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}
