//! Container image reference parsing and rendering.
//!
//! Handles Docker-style image references without filling in defaults:
//! - `app:v1` → repository `app`, tag `v1`, no host
//! - `ghcr.io/org/app:v1` → host `ghcr.io`, repository `org/app`
//! - `library/app` → repository `library/app` (a bare first segment is never a host)
//! - `quay.io/app@sha256:abc` → digest `sha256:abc`
//!
//! Parsing is total: malformed input yields empty fields instead of an error,
//! so callers filter on [`Reference::repository`] being non-empty.

use std::fmt;

/// Registry used when a reference carries no host.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Tag that never identifies a fixed image version.
const LATEST_TAG: &str = "latest";

/// A parsed container image reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Reference {
    host: String,
    repository: String,
    tag: String,
    digest: String,
}

impl Reference {
    /// Builds a reference from a host and repository with no tag or digest.
    pub fn new(host: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            repository: repository.into().trim_matches('/').to_owned(),
            ..Self::default()
        }
    }

    /// Sets the tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Sets the digest (`algo:hex`).
    #[must_use]
    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = digest.into();
        self
    }

    /// Parses an image reference string. Never fails.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();

        let (name, digest) = trimmed.split_once('@').unwrap_or((trimmed, ""));
        let (name, tag) = split_tag(name);
        // A tag is only reported when no digest is present.
        let tag = if trimmed.contains('@') { "" } else { tag };

        let (host, repository) = split_host(name);

        Self {
            host: host.to_owned(),
            repository: repository.to_owned(),
            tag: tag.to_owned(),
            digest: digest.to_owned(),
        }
    }

    /// Registry hostname (and port), or empty for the default registry.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Slash-separated repository path.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Human-readable tag, or empty.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Content digest (`algo:hex`), or empty.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Host to use for registry API and credential lookups.
    pub fn registry(&self) -> &str {
        if self.host.is_empty() {
            DEFAULT_REGISTRY
        } else {
            &self.host
        }
    }

    /// Returns `true` if the reference does not pin a version: no digest and
    /// either no tag or the `latest` tag.
    pub fn is_latest(&self) -> bool {
        self.digest.is_empty() && (self.tag.is_empty() || self.tag == LATEST_TAG)
    }

    /// Canonical rendering: `[host/]repo[(:tag|@digest)]`.
    ///
    /// When both tag and digest are set, the digest wins.
    pub fn image(&self) -> String {
        let mut out = join_path(&[&self.host, &self.repository]);
        if !self.digest.is_empty() {
            out.push('@');
            out.push_str(&self.digest);
        } else if !self.tag.is_empty() {
            out.push(':');
            out.push_str(&self.tag);
        }
        out
    }

    /// Rendering under a target registry and repository prefix:
    /// `[host/][prefix/]repo[(:tag|:digest-hex)]`.
    ///
    /// Digests are not preserved across a push, so the target copy is
    /// addressed by a tag equal to the digest's hex portion.
    pub fn target_image(&self, host: &str, prefix: &str) -> String {
        let mut out = join_path(&[host, prefix, &self.repository]);
        let tag = if self.digest.is_empty() {
            self.tag.as_str()
        } else {
            digest_hex(&self.digest)
        };
        if !tag.is_empty() {
            out.push(':');
            out.push_str(tag);
        }
        out
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.image())
    }
}

/// Returns the hex portion of an `algo:hex` digest.
pub fn digest_hex(digest: &str) -> &str {
    digest.split_once(':').map_or(digest, |(_, hex)| hex)
}

/// Splits a `host/path` string into its registry host and the remaining
/// path, without interpreting any tag.
///
/// The first segment is a host only if it contains `.` or `:`, so
/// `localhost:5000` and `registry.local:5000/mirror` keep their ports.
pub fn split_host(name: &str) -> (&str, &str) {
    let (host, rest) = match name.split_once('/') {
        Some((first, rest)) if is_host(first) => (first, rest),
        None if is_host(name) => (name, ""),
        _ => ("", name),
    };
    (host, rest.trim_matches('/'))
}

/// Returns `true` if a path segment names a registry host.
fn is_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':')
}

/// Splits `name:tag`, ignoring colons that belong to a `host:port` segment.
fn split_tag(name: &str) -> (&str, &str) {
    match name.rsplit_once(':') {
        Some((head, tag)) if !tag.contains('/') => (head, tag),
        _ => (name, ""),
    }
}

/// Joins non-empty path segments with `/`, trimming stray slashes.
fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
