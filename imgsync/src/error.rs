//! Error types for imgsync operations.

use std::path::PathBuf;
use std::time::Duration;

/// Alias for `Result<T, imgsync::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by manifest, scanning, and reconciliation operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The manifest is missing or malformed.
    #[error("manifest {}: {message}", path.display())]
    Manifest {
        /// Manifest file path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// A registry or engine step failed for one image.
    #[error("{op} {image}")]
    Registry {
        /// The operation that failed (`pull`, `push`, ...).
        op: &'static str,
        /// Image the operation addressed.
        image: String,
        /// Underlying failure.
        #[source]
        source: imgsync_oci::Error,
    },

    /// Registry or auth failure outside a per-image step.
    #[error(transparent)]
    Oci(#[from] imgsync_oci::Error),

    /// Directory traversal failed while scanning for resources.
    #[error("scan: {0}")]
    Walk(#[from] walkdir::Error),

    /// YAML encoding error.
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// Filesystem I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The reconciliation deadline expired.
    #[error("deadline of {0:?} exceeded")]
    Timeout(Duration),
}

impl Error {
    /// Returns a mapper that attaches an operation and image to a registry error.
    pub(crate) fn step(op: &'static str, image: &str) -> impl FnOnce(imgsync_oci::Error) -> Self {
        let image = image.to_owned();
        move |source| Self::Registry { op, image, source }
    }
}
