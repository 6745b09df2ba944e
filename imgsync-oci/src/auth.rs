//! Registry credential resolution.
//!
//! Credentials come from one of two places:
//! - an explicit [`Auth`] pair from the manifest, whose fields name
//!   environment variables holding the real username and password;
//! - the ambient [`Keychain`] (Docker-compatible login cache).
//!
//! Either way the result is an [`EncodedAuth`]: URL-safe base64 of the JSON
//! `{"Username": ..., "Password": ...}`, the format container engines accept
//! in their registry-auth header.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE;
use serde::{Deserialize, Serialize};

use crate::keychain::Keychain;
use crate::{Error, Result};

/// Keychain server address for Docker Hub.
pub const DOCKER_HUB_AUTH_HOST: &str = "https://index.docker.io/v1/";

/// Credential pair as written in a manifest.
///
/// Both fields are names of environment variables, resolved at use time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Auth {
    /// Environment variable holding the username.
    #[serde(default)]
    pub username: String,
    /// Environment variable holding the password.
    #[serde(default)]
    pub password: String,
}

impl Auth {
    /// Creates an auth pair from two environment variable names.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns `true` if both variable names are set.
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

/// Resolved registry credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
#[non_exhaustive]
pub struct Credentials {
    /// Registry username (empty for anonymous access).
    pub username: String,
    /// Registry password or token.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns `true` if no username is present.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Base64-encoded credential blob.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EncodedAuth(String);

impl EncodedAuth {
    /// Encodes a credential pair.
    pub fn encode(credentials: &Credentials) -> Result<Self> {
        let json = serde_json::to_vec(credentials)?;
        Ok(Self(URL_SAFE.encode(json)))
    }

    /// Decodes the blob back into credentials.
    pub fn decode(&self) -> Result<Credentials> {
        let json = URL_SAFE
            .decode(&self.0)
            .map_err(|e| Error::Auth(format!("invalid encoded auth: {e}")))?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Returns the encoded string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for EncodedAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncodedAuth(<redacted>)")
    }
}

/// Produces encoded credentials for a registry host.
#[derive(Debug, Clone)]
pub struct AuthResolver {
    keychain: Keychain,
}

impl AuthResolver {
    /// Creates a resolver backed by the default keychain location.
    pub fn new() -> Self {
        Self::with_keychain(Keychain::default_location())
    }

    /// Creates a resolver backed by a specific keychain.
    pub fn with_keychain(keychain: Keychain) -> Self {
        Self { keychain }
    }

    /// Resolves credentials for `host`, reading indirected values from the
    /// process environment.
    pub async fn resolve(&self, host: &str, auth: Option<&Auth>) -> Result<EncodedAuth> {
        self.resolve_with(host, auth, |name| std::env::var(name).ok()).await
    }

    /// Resolves credentials for `host` using `lookup` for environment access.
    ///
    /// An unset variable resolves to an empty string.
    pub async fn resolve_with(
        &self,
        host: &str,
        auth: Option<&Auth>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<EncodedAuth> {
        let credentials = match auth {
            Some(a) if a.is_complete() => {
                tracing::debug!(
                    host,
                    username_var = %a.username,
                    "resolving auth from environment"
                );
                Credentials::new(
                    lookup(&a.username).unwrap_or_default(),
                    lookup(&a.password).unwrap_or_default(),
                )
            }
            _ => {
                let server = auth_host(host);
                tracing::debug!(host, server, "resolving auth from keychain");
                self.keychain
                    .get(server)
                    .await
                    .map_err(|e| Error::Auth(format!("resolve auth for {server}: {e}")))?
            }
        };
        EncodedAuth::encode(&credentials)
    }
}

impl Default for AuthResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a registry host to the server address used for keychain lookups.
pub fn auth_host(host: &str) -> &str {
    match host {
        "" | "docker.io" | "index.docker.io" => DOCKER_HUB_AUTH_HOST,
        other => other,
    }
}
