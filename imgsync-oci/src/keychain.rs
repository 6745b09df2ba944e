//! Ambient registry credentials from the Docker client configuration.
//!
//! Reads `$DOCKER_CONFIG/config.json` (default `~/.docker/config.json`).
//! Lookup order for a server address:
//! 1. a per-registry `credHelpers` entry,
//! 2. the global `credsStore` helper,
//! 3. an inline `auths` entry.
//!
//! A missing file or a missing entry yields anonymous credentials.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tokio::io::AsyncWriteExt as _;
use tokio::process::Command;

use crate::auth::Credentials;

const CONFIG_FILE: &str = "config.json";
const HELPER_PREFIX: &str = "docker-credential-";

/// Docker client configuration file (only the fields used for auth).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
    #[serde(default)]
    creds_store: Option<String>,
    #[serde(default)]
    cred_helpers: HashMap<String, String>,
}

/// Inline credential entry under `auths`.
#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Output of `docker-credential-<helper> get`.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HelperOutput {
    username: String,
    secret: String,
}

/// Per-host credential store backed by a Docker client config file.
#[derive(Debug, Clone)]
pub struct Keychain {
    path: PathBuf,
}

impl Keychain {
    /// Keychain at `$DOCKER_CONFIG/config.json` or `~/.docker/config.json`.
    pub fn default_location() -> Self {
        let dir = std::env::var_os("DOCKER_CONFIG").map_or_else(
            || dirs::home_dir().unwrap_or_default().join(".docker"),
            PathBuf::from,
        );
        Self::from_path(dir.join(CONFIG_FILE))
    }

    /// Keychain backed by a specific config file.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Looks up credentials for a server address.
    ///
    /// Credential helpers are killed if the returned future is dropped.
    pub async fn get(&self, server: &str) -> io::Result<Credentials> {
        if !self.path.exists() {
            return Ok(Credentials::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        let file: ConfigFile = serde_json::from_str(&data).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("parse {}: {e}", self.path.display()),
            )
        })?;

        let key = normalize_server(server);
        if let Some(helper) = file
            .cred_helpers
            .iter()
            .find(|(k, _)| normalize_server(k) == key)
            .map(|(_, v)| v)
        {
            return helper_get(helper, server).await;
        }
        if let Some(store) = file.creds_store.as_deref().filter(|s| !s.is_empty()) {
            return helper_get(store, server).await;
        }
        file.auths
            .iter()
            .find(|(k, _)| normalize_server(k) == key)
            .map_or_else(|| Ok(Credentials::default()), |(_, entry)| entry.decode())
    }
}

impl AuthEntry {
    fn decode(&self) -> io::Result<Credentials> {
        if let (Some(u), Some(p)) = (&self.username, &self.password) {
            return Ok(Credentials::new(u.as_str(), p.as_str()));
        }
        let Some(auth) = self.auth.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(Credentials::default());
        };
        let raw = STANDARD
            .decode(auth)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let text = String::from_utf8(raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let (user, pass) = text.split_once(':').ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "auth entry is not user:password")
        })?;
        Ok(Credentials::new(user, pass))
    }
}

/// Runs `docker-credential-<helper> get` with the server address on stdin.
async fn helper_get(helper: &str, server: &str) -> io::Result<Credentials> {
    let program = format!("{HELPER_PREFIX}{helper}");
    tracing::debug!(helper = %program, server, "querying credential helper");
    let mut command = Command::new(&program);
    command.arg("get");
    query_helper(&program, command, server).await
}

/// Runs a prepared helper command and decodes its answer.
async fn query_helper(
    program: &str,
    mut command: Command,
    server: &str,
) -> io::Result<Credentials> {
    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| io::Error::new(e.kind(), format!("{program}: {e}")))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(server.as_bytes()).await?;
    }
    let output = child.wait_with_output().await?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("credentials not found") {
            return Ok(Credentials::default());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = if stderr.trim().is_empty() {
            stdout.trim()
        } else {
            stderr.trim()
        };
        return Err(io::Error::other(format!("{program} get: {reason}")));
    }

    let out: HelperOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Credentials::new(out.username, out.secret))
}

/// Reduces a server address to a bare hostname, folding Docker Hub aliases.
fn normalize_server(server: &str) -> String {
    let lower = server.trim().to_lowercase();
    let bare = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let host = bare.split('/').next().unwrap_or_default();
    match host {
        "docker.io" | "registry-1.docker.io" => "index.docker.io".to_owned(),
        other => other.to_owned(),
    }
}
