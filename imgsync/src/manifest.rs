//! Declarative image manifest and its YAML persistence.
//!
//! ```yaml
//! target:
//!   host: registry.example.com
//!   repository: mirror
//! sources:
//!   - host: quay.io
//!     repository: prometheus/prometheus
//!     tag: v2.45.0
//!     auth:
//!       username: QUAY_USER
//!       password: QUAY_TOKEN
//! ```
//!
//! A source without its own target inherits the manifest's on load; the
//! inherited value is not written back on save.

use std::path::Path;

use imgsync_oci::reference::split_host;
use imgsync_oci::{Auth, Reference};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, kube};

/// Manifest file name used when no path is given.
pub const DEFAULT_PATH: &str = ".images.yaml";

/// Which side of a synchronization an image string refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[non_exhaustive]
pub enum Side {
    /// The upstream image.
    Source,
    /// The rewritten image at the target registry.
    #[default]
    Target,
}

/// Destination registry and repository prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Target {
    /// Registry host (and port).
    #[serde(default)]
    pub host: String,
    /// Repository prefix under which sources land.
    #[serde(default)]
    pub repository: String,
    /// Credentials, as environment variable names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl Target {
    /// Creates a target without credentials.
    pub fn new(host: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            repository: repository.into(),
            auth: None,
        }
    }

    /// Parses `host[:port][/repo-prefix]` (e.g. `registry.example.com/mirror`).
    ///
    /// A target carries no tag, so a trailing `:port` stays part of the host.
    pub fn parse(s: &str) -> Self {
        let (host, repository) = split_host(s.trim());
        Self::new(host, repository)
    }

    fn is_unset(&self) -> bool {
        self.host.is_empty() && self.repository.is_empty() && self.auth.is_none()
    }
}

/// One upstream image to synchronize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Source {
    /// Registry host, empty for Docker Hub.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Repository path.
    #[serde(default)]
    pub repository: String,
    /// Tag.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tag: String,
    /// Digest (`algo:hex`).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub digest: String,
    /// Source registry credentials, as environment variable names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    /// Per-source destination override.
    #[serde(default, skip_serializing_if = "Target::is_unset")]
    pub target: Target,
}

impl Source {
    /// Builds a source from a parsed reference and its destination.
    pub fn from_reference(reference: &Reference, target: Target) -> Self {
        Self {
            host: reference.host().to_owned(),
            repository: reference.repository().to_owned(),
            tag: reference.tag().to_owned(),
            digest: reference.digest().to_owned(),
            auth: None,
            target,
        }
    }

    /// The source as a reference.
    pub fn reference(&self) -> Reference {
        Reference::new(self.host.as_str(), self.repository.as_str())
            .with_tag(self.tag.as_str())
            .with_digest(self.digest.as_str())
    }

    /// Canonical source image string.
    pub fn image(&self) -> String {
        self.reference().image()
    }

    /// Image string at the destination.
    pub fn target_image(&self) -> String {
        self.reference().target_image(&self.target.host, &self.target.repository)
    }

    /// Image string for one side of the synchronization.
    pub fn image_for(&self, side: Side) -> String {
        match side {
            Side::Source => self.image(),
            Side::Target => self.target_image(),
        }
    }

    /// Registry host and credentials for one side.
    pub fn registry_for(&self, side: Side) -> (&str, Option<&Auth>) {
        match side {
            Side::Source => (&self.host, self.auth.as_ref()),
            Side::Target => (&self.target.host, self.target.auth.as_ref()),
        }
    }

    fn same_repository(&self, other: &Self) -> bool {
        self.host.eq_ignore_ascii_case(&other.host)
            && self.repository.eq_ignore_ascii_case(&other.repository)
    }
}

/// The declarative manifest: one target and the sources to mirror into it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Manifest {
    /// Default destination for all sources.
    #[serde(default)]
    pub target: Target,
    /// Images to synchronize, in order.
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl Manifest {
    /// Creates an empty manifest for a target.
    pub fn new(target: Target) -> Self {
        Self {
            target,
            sources: Vec::new(),
        }
    }

    /// Creates a manifest whose sources are discovered by scanning `dir` for
    /// Kubernetes resources.
    pub fn with_autodetect(target: Target, dir: &Path) -> Result<Self> {
        let images = kube::scan(dir)?;
        tracing::info!(dir = %dir.display(), images = images.len(), "autodetected images");
        let sources = sources_from_images(&images, &target);
        Ok(Self { target, sources })
    }

    /// Loads a manifest and applies the top-level target to sources without
    /// their own.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| Error::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut manifest: Self = serde_yaml::from_str(&data).map_err(|e| Error::Manifest {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        manifest.apply_default_target();
        Ok(manifest)
    }

    /// Writes the manifest as YAML, preserving source order.
    ///
    /// Sources whose target equals the top-level target are written without one.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = self.clone();
        for source in &mut out.sources {
            if source.target == self.target {
                source.target = Target::default();
            }
        }
        std::fs::write(path, serde_yaml::to_string(&out)?)?;
        tracing::debug!(path = %path.display(), sources = out.sources.len(), "saved manifest");
        Ok(())
    }

    /// Rescans `dir`, replacing the source list while keeping each known
    /// source's credentials and target override (matched on host and
    /// repository).
    pub fn update(&mut self, dir: &Path) -> Result<()> {
        let images = kube::scan(dir)?;
        let mut sources = sources_from_images(&images, &self.target);
        for source in &mut sources {
            if let Some(prev) = self.sources.iter().find(|p| p.same_repository(source)) {
                source.auth.clone_from(&prev.auth);
                if !prev.target.host.is_empty() {
                    source.target = prev.target.clone();
                }
            }
        }
        tracing::info!(
            before = self.sources.len(),
            after = sources.len(),
            "updated manifest sources"
        );
        self.sources = sources;
        Ok(())
    }

    /// Resolved image strings for one side.
    pub fn images(&self, side: Side) -> Vec<String> {
        self.sources.iter().map(|s| s.image_for(side)).collect()
    }

    fn apply_default_target(&mut self) {
        for source in &mut self.sources {
            if source.target.host.is_empty() {
                source.target = self.target.clone();
            }
        }
    }
}

/// Builds sources from image strings, all landing in `target`.
///
/// Strings without a repository are dropped.
pub fn sources_from_images(images: &[String], target: &Target) -> Vec<Source> {
    images
        .iter()
        .map(|i| Reference::parse(i))
        .filter(|r| !r.repository().is_empty())
        .map(|r| Source::from_reference(&r, target.clone()))
        .collect()
}
