//! Upstream semver upgrade detection.

use imgsync_oci::{AuthResolver, Registry};
use semver::Version;

use crate::manifest::Source;
use crate::{Error, Result};

/// Hosts whose tag listings are not consulted.
const SKIPPED_HOSTS: [&str; 1] = ["quay.io"];

/// Newer upstream versions of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Upgrade {
    /// Source image.
    pub image: String,
    /// Tag currently in the manifest.
    pub current: String,
    /// Newer tags, ascending by version.
    pub newer: Vec<String>,
}

/// Lists upstream tags for every source and reports newer semver versions.
///
/// Sources whose tag is not a version, and hosts in the skip list, are
/// ignored. Only sources with at least one newer tag are returned.
pub async fn check<R: Registry>(
    registry: &R,
    auth: &AuthResolver,
    sources: &[Source],
) -> Result<Vec<Upgrade>> {
    let mut upgrades = Vec::new();
    for source in sources {
        if SKIPPED_HOSTS.iter().any(|h| source.host.eq_ignore_ascii_case(h)) {
            continue;
        }
        let Some(current) = parse_version(&source.tag) else {
            tracing::debug!(image = %source.image(), "tag is not a version, skipping");
            continue;
        };
        let credentials = auth.resolve(&source.host, source.auth.as_ref()).await?;
        let tags = registry
            .tags_for_repository(&source.host, &source.repository, &credentials)
            .await
            .map_err(Error::step("list tags", &source.image()))?;

        let newer = newer_than(&current, &semver_tags(&tags));
        if !newer.is_empty() {
            upgrades.push(Upgrade {
                image: source.image(),
                current: source.tag.clone(),
                newer,
            });
        }
    }
    Ok(upgrades)
}

/// Keeps the tags that look like and parse as semver versions.
pub fn semver_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .filter(|t| t.starts_with(|c: char| c.is_ascii_digit() || c == 'v'))
        .filter(|t| parse_version(t).is_some())
        .cloned()
        .collect()
}

/// Returns the tags strictly greater than `current`, ascending.
pub fn newer_than(current: &Version, tags: &[String]) -> Vec<String> {
    let mut newer: Vec<(Version, &String)> = tags
        .iter()
        .filter_map(|t| parse_version(t).map(|v| (v, t)))
        .filter(|(v, _)| v > current)
        .collect();
    newer.sort_by(|a, b| a.0.cmp(&b.0));
    newer.into_iter().map(|(_, t)| t.clone()).collect()
}

/// Parses a tag as semver, accepting a leading `v`.
pub fn parse_version(tag: &str) -> Option<Version> {
    Version::parse(tag.strip_prefix('v').unwrap_or(tag)).ok()
}

#[cfg(test)]
mod tests {
    use imgsync_oci::Keychain;
    use tempfile::TempDir;

    use super::*;
    use crate::manifest::{Target, sources_from_images};
    use crate::sync::fake::FakeRegistry;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn filters_semver_tags() {
        let tags = strings(&["noperiods", "contains-hypen", "1.0.0", "v1.0.0"]);
        assert_eq!(semver_tags(&tags), ["1.0.0", "v1.0.0"]);
    }

    #[test]
    fn all_newer_versions() {
        let tags = strings(&["v1.0.0", "v2.0.0", "v3.0.0", "v4.0.0", "v5.0.0", "v6.0.0"]);
        let current = parse_version("v0.1.0").unwrap();
        assert_eq!(newer_than(&current, &tags), tags);
    }

    #[test]
    fn older_and_equal_are_dropped() {
        let tags = strings(&["v1.2.0", "1.1.0", "v1.0.0", "0.9.0"]);
        let current = parse_version("1.1.0").unwrap();
        assert_eq!(newer_than(&current, &tags), ["v1.2.0"]);
    }

    #[tokio::test]
    async fn check_reports_only_upgradable_sources() {
        let dir = TempDir::new().unwrap();
        let auth = AuthResolver::with_keychain(Keychain::from_path(dir.path().join("config.json")));
        let registry = FakeRegistry {
            tags: strings(&["latest", "v0.9.0", "v1.0.0", "v1.1.0", "v2.0.0-rc.1"]),
            ..FakeRegistry::default()
        };
        let sources = sources_from_images(
            &strings(&["app:v1.0.0", "quay.io/app:v0.1.0", "app:latest", "other:v3.0.0"]),
            &Target::new("t.com", ""),
        );

        let upgrades = check(&registry, &auth, &sources).await.unwrap();

        assert_eq!(
            upgrades,
            [Upgrade {
                image: "app:v1.0.0".into(),
                current: "v1.0.0".into(),
                newer: strings(&["v1.1.0", "v2.0.0-rc.1"]),
            }]
        );
    }
}
