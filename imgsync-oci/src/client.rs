//! Container engine and registry client.
//!
//! Pull, tag, push, and local inventory go through the local Docker-compatible
//! engine (`DOCKER_HOST` or the platform default socket). Remote existence
//! probes and tag listing speak the OCI distribution protocol directly.

use std::fmt;
use std::pin::pin;

use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::image::{CreateImageOptions, ListImagesOptions, PushImageOptions, TagImageOptions};
use futures::{Stream, StreamExt};
use oci_client::client::ClientConfig;
use oci_client::errors::{OciDistributionError, OciErrorCode};
use oci_client::secrets::RegistryAuth;

use crate::auth::EncodedAuth;
use crate::progress::{Progress, StatusLine};
use crate::registry::Registry;
use crate::retry::Retry;
use crate::{Error, Reference, Result};

/// Marker the engine uses for dangling images.
const UNTAGGED: &str = "<none>";

/// Engine-backed implementation of [`Registry`].
pub struct Client {
    docker: Docker,
    oci: oci_client::Client,
    retry: Retry,
}

impl Client {
    /// Connects to the local container engine.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults().map_err(engine_error)?;
        Ok(Self {
            docker,
            oci: oci_client::Client::new(ClientConfig::default()),
            retry: Retry::default(),
        })
    }

    /// Replaces the transfer retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Registry for Client {
    async fn images_on_host(&self) -> Result<Vec<String>> {
        let images = self.list_local().await?;
        Ok(images
            .into_iter()
            .flat_map(|i| i.repo_tags)
            .filter(|t| !t.starts_with(UNTAGGED))
            .collect())
    }

    async fn digests_on_host(&self) -> Result<Vec<String>> {
        let images = self.list_local().await?;
        Ok(images
            .into_iter()
            .flat_map(|i| i.repo_digests)
            .filter(|d| !d.starts_with(UNTAGGED))
            .collect())
    }

    async fn image_exists_at_remote(&self, image: &str, auth: &EncodedAuth) -> Result<bool> {
        let reference = oci_reference(image)?;
        let auth = registry_auth(auth)?;
        tracing::debug!(image, "probing remote manifest");

        let (oci, reference, auth) = (&self.oci, &reference, &auth);
        let found = probe(&self.retry, move || oci.pull_manifest(reference, auth)).await?;
        Ok(is_current(image, found))
    }

    async fn tags_for_repository(
        &self,
        host: &str,
        repository: &str,
        auth: &EncodedAuth,
    ) -> Result<Vec<String>> {
        let registry = Reference::new(host, repository).registry().to_owned();
        let reference = oci_reference(&format!("{registry}/{repository}"))?;
        let auth = registry_auth(auth)?;

        let (oci, reference, auth) = (&self.oci, &reference, &auth);
        let response = self
            .retry
            .run("list tags", move || async move {
                oci.list_tags(reference, auth, None, None)
                    .await
                    .map_err(classify_remote)
            })
            .await?;
        Ok(response.tags)
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        let target = Reference::parse(target);
        let options = TagImageOptions {
            repo: Reference::new(target.host(), target.repository()).image(),
            tag: target.tag().to_owned(),
        };
        tracing::debug!(source, target = %target, "tagging image");
        self.docker
            .tag_image(source, Some(options))
            .await
            .map_err(engine_error)
    }

    async fn pull_and_wait(&self, image: &str, auth: &EncodedAuth) -> Result<()> {
        let reference = Reference::parse(image);
        let from_image = Reference::new(reference.host(), reference.repository()).image();
        let tag = version_of(&reference);
        let credentials = docker_credentials(auth)?;

        let (docker, from_image, tag, credentials) =
            (&self.docker, from_image.as_str(), tag.as_str(), &credentials);
        self.retry
            .run("pull", move || {
                let options = CreateImageOptions {
                    from_image: from_image.to_owned(),
                    tag: tag.to_owned(),
                    ..Default::default()
                };
                consume(image, docker.create_image(Some(options), None, credentials.clone()))
            })
            .await
    }

    async fn push_and_wait(&self, image: &str, auth: &EncodedAuth) -> Result<()> {
        let reference = Reference::parse(image);
        let name = Reference::new(reference.host(), reference.repository()).image();
        let tag = version_of(&reference);
        let credentials = docker_credentials(auth)?;

        let (docker, name, tag, credentials) =
            (&self.docker, name.as_str(), tag.as_str(), &credentials);
        self.retry
            .run("push", move || {
                let options = PushImageOptions { tag: tag.to_owned() };
                consume(image, docker.push_image(name, Some(options), credentials.clone()))
            })
            .await
    }
}

impl Client {
    async fn list_local(&self) -> Result<Vec<bollard::models::ImageSummary>> {
        self.docker
            .list_images(Some(ListImagesOptions::<String> {
                all: false,
                ..Default::default()
            }))
            .await
            .map_err(engine_error)
    }
}

/// Drains a transfer status stream, reporting sampled progress.
///
/// An `error` field embedded in any event fails the transfer.
async fn consume<S, T>(image: &str, stream: S) -> Result<()>
where
    S: Stream<Item = std::result::Result<T, bollard::errors::Error>>,
    T: Into<StatusLine>,
{
    let mut stream = pin!(stream);
    let mut progress = Progress::default();
    while let Some(event) = stream.next().await {
        let line: StatusLine = event.map_err(engine_error)?.into();
        if !line.error.is_empty() {
            return Err(Error::Protocol(format!("{image}: {}", line.error)));
        }
        if let Some(message) = progress.observe(&line) {
            tracing::info!(image, "{message}");
        }
    }
    Ok(())
}

/// Fetches a remote manifest with retries, mapping absence to `false`.
async fn probe<T, F, Fut>(retry: &Retry, mut get: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, OciDistributionError>>,
{
    retry
        .run("probe", || {
            let fetch = get();
            async move {
                match fetch.await {
                    Ok(_) => Ok(true),
                    Err(e) => match classify_remote(e) {
                        Error::NotFound(_) => Ok(false),
                        other => Err(other),
                    },
                }
            }
        })
        .await
}

/// A remote copy only counts as current when it is found and pinned;
/// floating references are always pushed.
fn is_current(image: &str, found: bool) -> bool {
    found && !Reference::parse(image).is_latest()
}

/// Tag (or digest) the engine should transfer; floating references mean `latest`.
fn version_of(reference: &Reference) -> String {
    if !reference.digest().is_empty() {
        reference.digest().to_owned()
    } else if !reference.tag().is_empty() {
        reference.tag().to_owned()
    } else {
        "latest".to_owned()
    }
}

fn oci_reference(image: &str) -> Result<oci_client::Reference> {
    image
        .parse()
        .map_err(|e| Error::InvalidReference(format!("{image}: {e}")))
}

fn registry_auth(auth: &EncodedAuth) -> Result<RegistryAuth> {
    let credentials = auth.decode()?;
    Ok(if credentials.is_anonymous() {
        RegistryAuth::Anonymous
    } else {
        RegistryAuth::Basic(credentials.username, credentials.password)
    })
}

fn docker_credentials(auth: &EncodedAuth) -> Result<Option<DockerCredentials>> {
    let credentials = auth.decode()?;
    Ok((!credentials.is_anonymous()).then(|| DockerCredentials {
        username: Some(credentials.username),
        password: Some(credentials.password),
        ..Default::default()
    }))
}

/// Classifies a container engine failure.
fn engine_error(e: bollard::errors::Error) -> Error {
    use bollard::errors::Error as E;
    match e {
        E::DockerResponseServerError {
            status_code,
            message,
        } => match status_code {
            401 | 403 => Error::Auth(message),
            404 => Error::NotFound(message),
            500..=599 => Error::Transport(message),
            _ => Error::Engine(message),
        },
        E::DockerStreamError { error } => Error::Protocol(error),
        E::JsonDataError { .. } | E::JsonSerdeError { .. } => Error::Protocol(e.to_string()),
        E::HyperResponseError { .. } | E::IOError { .. } | E::RequestTimeoutError { .. } => {
            Error::Transport(e.to_string())
        }
        _ => Error::Engine(e.to_string()),
    }
}

/// Classifies a registry protocol failure.
fn classify_remote(e: OciDistributionError) -> Error {
    use OciDistributionError as E;
    let message = e.to_string();
    match &e {
        E::ImageManifestNotFoundError(_) => Error::NotFound(message),
        E::RegistryError { envelope, .. }
            if envelope.errors.iter().any(|err| is_absent(&err.code)) =>
        {
            Error::NotFound(message)
        }
        E::ServerError { code: 404, .. } => Error::NotFound(message),
        E::AuthenticationFailure(_) | E::UnauthorizedError { .. } => Error::Auth(message),
        _ => Error::Transport(message),
    }
}

/// Registry error codes meaning the manifest does not exist.
const fn is_absent(code: &OciErrorCode) -> bool {
    matches!(code, OciErrorCode::ManifestUnknown | OciErrorCode::NotFound)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::auth::Credentials;

    fn registry_error(body: &str) -> OciDistributionError {
        OciDistributionError::RegistryError {
            envelope: serde_json::from_str(body).unwrap(),
            url: "https://t.com/v2/app/manifests/v1".into(),
        }
    }

    fn unavailable() -> OciDistributionError {
        OciDistributionError::ServerError {
            code: 503,
            url: "https://t.com/v2/".into(),
            message: "unavailable".into(),
        }
    }

    #[test]
    fn envelope_codes_mean_absent() {
        for code in ["MANIFEST_UNKNOWN", "NOT_FOUND"] {
            let err = classify_remote(registry_error(&format!(
                r#"{{"errors":[{{"code":"{code}","message":"gone"}}]}}"#
            )));
            assert!(matches!(err, Error::NotFound(_)), "{code}");
        }
    }

    #[test]
    fn other_envelope_codes_propagate() {
        let err = classify_remote(registry_error(
            r#"{"errors":[{"code":"DENIED","message":"no"}]}"#,
        ));
        assert!(!matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn found_latest_is_not_current() {
        assert!(is_current("t.com/app:v1", true));
        assert!(is_current("t.com/app@sha256:ab", true));
        assert!(!is_current("t.com/app:latest", true));
        assert!(!is_current("t.com/app", true));
        assert!(!is_current("t.com/app:v1", false));
    }

    #[tokio::test(start_paused = true)]
    async fn probe_retries_transient_failures() {
        let calls = Cell::new(0);
        let found = probe(&Retry::default(), || {
            calls.set(calls.get() + 1);
            let first = calls.get() == 1;
            async move { if first { Err(unavailable()) } else { Ok(()) } }
        })
        .await
        .unwrap();
        assert!(found);
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_absence_is_not_retried() {
        let calls = Cell::new(0);
        let found = probe(&Retry::default(), || {
            calls.set(calls.get() + 1);
            async {
                Err::<(), _>(registry_error(
                    r#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"gone"}]}"#,
                ))
            }
        })
        .await
        .unwrap();
        assert!(!found);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_gives_up_after_last_attempt() {
        let calls = Cell::new(0);
        let err = probe(&Retry::default(), || {
            calls.set(calls.get() + 1);
            async { Err::<(), _>(unavailable()) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn missing_manifest_is_absent() {
        let err = classify_remote(OciDistributionError::ImageManifestNotFoundError(
            "t.com/app:v1".into(),
        ));
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn server_failures_are_transport() {
        assert!(classify_remote(unavailable()).is_retryable());
    }

    #[test]
    fn engine_status_codes() {
        let err = |status_code| {
            engine_error(bollard::errors::Error::DockerResponseServerError {
                status_code,
                message: "boom".into(),
            })
        };
        assert!(matches!(err(401), Error::Auth(_)));
        assert!(matches!(err(404), Error::NotFound(_)));
        assert!(matches!(err(502), Error::Transport(_)));
        assert!(matches!(err(409), Error::Engine(_)));
    }

    #[test]
    fn embedded_stream_error_is_protocol() {
        let err = engine_error(bollard::errors::Error::DockerStreamError {
            error: "unauthorized".into(),
        });
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn consume_fails_on_embedded_error() {
        let events = vec![
            Ok(StatusLine {
                status: "Preparing".into(),
                ..StatusLine::default()
            }),
            Ok(StatusLine {
                error: "denied: requested access to the resource is denied".into(),
                ..StatusLine::default()
            }),
        ];
        let err = consume("t.com/app:v1", futures::stream::iter(events))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(m) if m.contains("denied")));
    }

    #[tokio::test]
    async fn consume_drains_clean_stream() {
        let events = (1..=60).map(|i| {
            Ok::<_, bollard::errors::Error>(StatusLine {
                status: "Pushing".into(),
                progress_detail: crate::progress::Detail { current: i, total: 60 },
                ..StatusLine::default()
            })
        });
        consume("t.com/app:v1", futures::stream::iter(events))
            .await
            .unwrap();
    }

    #[test]
    fn version_defaults_to_latest() {
        assert_eq!(version_of(&Reference::parse("app")), "latest");
        assert_eq!(version_of(&Reference::parse("app:v1")), "v1");
        assert_eq!(version_of(&Reference::parse("app@sha256:ab")), "sha256:ab");
    }

    #[test]
    fn anonymous_auth_sends_no_credentials() {
        let anon = EncodedAuth::encode(&Credentials::default()).unwrap();
        assert!(docker_credentials(&anon).unwrap().is_none());
        assert!(matches!(registry_auth(&anon).unwrap(), RegistryAuth::Anonymous));

        let basic = EncodedAuth::encode(&Credentials::new("u", "p")).unwrap();
        let creds = docker_credentials(&basic).unwrap().unwrap();
        assert_eq!(creds.username.as_deref(), Some("u"));
    }
}
