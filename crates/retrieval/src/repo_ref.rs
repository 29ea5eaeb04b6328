//! Repository References
//!
//! Recognises repository-hosting URL shapes:
//! - `host/owner/name`
//! - `host/owner/name.git`
//! - `host/owner/name/blob/<ref>/<path>`
//! - `host/owner/name/tree/<ref>[/<path>]`

use serde::{Deserialize, Serialize};

/// Default repository host
pub const DEFAULT_REPOSITORY_HOST: &str = "github.com";

/// Owner, name and optional location inside a hosted repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl RepoRef {
    /// Parse `url` against the recognised host prefixes.
    ///
    /// A host prefix may carry a path (`example.org/repoHost`). The scheme is
    /// optional. Returns `None` for anything that is not one of the four shapes.
    pub fn parse<S: AsRef<str>>(url: &str, hosts: &[S]) -> Option<Self> {
        let trimmed = url.trim();
        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        let without_scheme = without_scheme
            .strip_prefix("www.")
            .unwrap_or(without_scheme);
        let location = without_scheme
            .split(['?', '#'])
            .next()
            .unwrap_or(without_scheme);

        let rest = hosts.iter().find_map(|host| {
            let host = host.as_ref().trim_end_matches('/');
            let head = location.get(..host.len())?;
            if !head.eq_ignore_ascii_case(host) {
                return None;
            }
            location[host.len()..].strip_prefix('/')
        })?;

        let segments: Vec<&str> = rest.split('/').collect();
        // Tolerate a single trailing slash
        let segments: &[&str] = match segments.split_last() {
            Some((last, init)) if last.is_empty() => init,
            _ => &segments,
        };
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }

        match segments {
            [owner, name] => {
                let name = name.strip_suffix(".git").unwrap_or(*name);
                Self::build(owner, name, None, None)
            }
            [owner, name, "blob", git_ref, path @ ..] if !path.is_empty() => Self::build(
                owner,
                name,
                Some(git_ref.to_string()),
                Some(path.join("/")),
            ),
            [owner, name, "tree", git_ref, path @ ..] => {
                let path = if path.is_empty() {
                    None
                } else {
                    Some(path.join("/"))
                };
                Self::build(owner, name, Some(git_ref.to_string()), path)
            }
            _ => None,
        }
    }

    fn build(
        owner: &str,
        name: &str,
        git_ref: Option<String>,
        path: Option<String>,
    ) -> Option<Self> {
        if owner.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            git_ref,
            path,
        })
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Whether this points at the repository root (README) rather than a file
    pub fn is_root(&self) -> bool {
        self.path.is_none()
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)?;
        if let Some(path) = &self.path {
            write!(f, ":{}", path)?;
        }
        if let Some(git_ref) = &self.git_ref {
            write!(f, "@{}", git_ref)?;
        }
        Ok(())
    }
}
