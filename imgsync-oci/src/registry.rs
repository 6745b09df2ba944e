//! Operations imgsync needs from a container engine and its registries.

use crate::auth::EncodedAuth;
use crate::{Reference, Result};

/// Prefixes the local engine strips from Docker Hub image names.
const DOCKER_HUB_PREFIXES: [&str; 2] = ["docker.io/library/", "docker.io/"];

/// Pull, tag, push, and inventory operations against a container engine,
/// plus remote existence and tag listing.
///
/// Every method may be cancelled by dropping its future; the engine decides
/// whether in-flight layers complete.
#[allow(async_fn_in_trait)]
pub trait Registry {
    /// Returns all `repo:tag` names known to the local engine.
    async fn images_on_host(&self) -> Result<Vec<String>>;

    /// Returns all `repo@digest` names known to the local engine.
    async fn digests_on_host(&self) -> Result<Vec<String>>;

    /// Returns `true` if the remote registry serves a manifest for `image`
    /// and the image is pinned to a version.
    ///
    /// Absence (`MANIFEST_UNKNOWN` / `NOT_FOUND`) yields `false`; other
    /// failures propagate. A floating `latest` reference is reported absent
    /// after a successful lookup, so it is always pushed.
    async fn image_exists_at_remote(&self, image: &str, auth: &EncodedAuth) -> Result<bool>;

    /// Lists the tags of a remote repository. An empty host means Docker Hub.
    async fn tags_for_repository(
        &self,
        host: &str,
        repository: &str,
        auth: &EncodedAuth,
    ) -> Result<Vec<String>>;

    /// Tags the local image `source` as `target`.
    async fn tag(&self, source: &str, target: &str) -> Result<()>;

    /// Pulls `image` and waits for the transfer to finish.
    async fn pull_and_wait(&self, image: &str, auth: &EncodedAuth) -> Result<()>;

    /// Pushes `image` and waits for the transfer to finish.
    async fn push_and_wait(&self, image: &str, auth: &EncodedAuth) -> Result<()>;

    /// Returns `true` if the local engine already holds a pinned `image`.
    ///
    /// Floating references (untagged or `latest`) are never considered present.
    async fn image_exists_on_host(&self, image: &str) -> Result<bool> {
        if Reference::parse(image).is_latest() {
            return Ok(false);
        }
        let local = if image.contains('@') {
            self.digests_on_host().await?
        } else {
            self.images_on_host().await?
        };
        Ok(image_exists(image, &local))
    }
}

/// Matches `image` against local engine names, case-insensitively.
///
/// The engine does not keep the `docker.io/library/` or `docker.io/` prefixes,
/// so they are removed from the query first.
pub fn image_exists(image: &str, local: &[String]) -> bool {
    let query = normalize_local(image);
    local.iter().any(|l| l.eq_ignore_ascii_case(query))
}

fn normalize_local(image: &str) -> &str {
    DOCKER_HUB_PREFIXES
        .iter()
        .find_map(|p| image.strip_prefix(p))
        .unwrap_or(image)
}
