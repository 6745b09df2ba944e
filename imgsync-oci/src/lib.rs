//! Image references, registry credentials, and container engine access for
//! imgsync.
//!
//! - [`Reference`] parses and renders image references and derives target
//!   rewrites.
//! - [`AuthResolver`] produces encoded credentials from environment-indirected
//!   manifest auth or the ambient [`Keychain`].
//! - [`Client`] drives the local container engine (pull, tag, push, inventory)
//!   and probes remote registries, behind the [`Registry`] trait.

#![allow(clippy::missing_docs_in_private_items)]

pub mod auth;
mod client;
pub mod keychain;
pub mod progress;
pub mod reference;
mod registry;
pub mod retry;

pub use auth::{Auth, AuthResolver, Credentials, EncodedAuth};
pub use client::Client;
pub use keychain::Keychain;
pub use reference::Reference;
pub use registry::{Registry, image_exists};
pub use retry::Retry;

/// Result type for imgsync-oci operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors from reference, auth, and registry operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The image reference could not be understood by the registry client.
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    /// Credentials could not be resolved or were rejected.
    #[error("auth: {0}")]
    Auth(String),

    /// The registry or engine reported the image as absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network, TLS, or server-side failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Undecodable status stream or an error embedded in it.
    #[error("stream error: {0}")]
    Protocol(String),

    /// The local container engine rejected the request.
    #[error("container engine: {0}")]
    Engine(String),

    /// Filesystem I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON encoding error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` for failures worth retrying as a whole transfer.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Protocol(_))
    }
}
