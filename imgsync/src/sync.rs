//! Reconciliation: bring the target registry in line with the manifest.
//!
//! For each source, in order:
//! 1. probe the target registry for the rewritten image;
//! 2. if absent (or `force`), queue it;
//! 3. for each queued source: pull the source if the engine lacks it, tag it
//!    under the target name, and push.
//!
//! Sources are processed serially. The first failure aborts the run; earlier
//! pushes stay in place and the next run re-probes.

use std::time::Duration;

use imgsync_oci::{AuthResolver, Registry};

use crate::manifest::{Side, Source};
use crate::{Error, Result};

/// Deadline applied when none is configured.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Reconciliation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct Options {
    /// Push even when the target already has the image.
    pub force: bool,
    /// Report queued work without transferring anything.
    pub dry_run: bool,
    /// Upper bound for the whole run.
    pub deadline: Duration,
}

impl Options {
    /// Sets `force`.
    #[must_use]
    pub const fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Sets `dry_run`.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Sets the deadline.
    #[must_use]
    pub const fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            force: false,
            dry_run: false,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

/// A source queued for transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Planned {
    /// Source image.
    pub image: String,
    /// Destination image.
    pub target: String,
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Outcome {
    /// Nothing needed pushing.
    UpToDate,
    /// Dry run: these would have been pushed.
    Planned(Vec<Planned>),
    /// These were pushed.
    Pushed(Vec<Planned>),
}

/// Drives a [`Registry`] to reconcile a list of sources.
#[derive(Debug)]
pub struct Reconciler<'a, R> {
    registry: &'a R,
    auth: &'a AuthResolver,
    options: Options,
}

impl<'a, R: Registry> Reconciler<'a, R> {
    /// Creates a reconciler.
    pub const fn new(registry: &'a R, auth: &'a AuthResolver, options: Options) -> Self {
        Self {
            registry,
            auth,
            options,
        }
    }

    /// Reconciles `sources` against their targets within the deadline.
    pub async fn run(&self, sources: &[Source]) -> Result<Outcome> {
        self.with_deadline(self.reconcile(sources)).await
    }

    /// Pulls every image of `side` the local engine does not already hold.
    ///
    /// Returns the pulled images.
    pub async fn pull(&self, sources: &[Source], side: Side) -> Result<Vec<String>> {
        self.with_deadline(async {
            let mut pulled = Vec::new();
            for source in sources {
                let image = source.image_for(side);
                if self.on_host(&image).await? {
                    tracing::info!(image = %image, "already present locally");
                    continue;
                }
                let (host, configured) = source.registry_for(side);
                let auth = self.auth.resolve(host, configured).await?;
                tracing::info!(image = %image, "pulling");
                self.registry
                    .pull_and_wait(&image, &auth)
                    .await
                    .map_err(Error::step("pull", &image))?;
                pulled.push(image);
            }
            Ok(pulled)
        })
        .await
    }

    async fn reconcile(&self, sources: &[Source]) -> Result<Outcome> {
        let mut queue = Vec::new();
        for source in sources {
            let target = source.target_image();
            let auth = self
                .auth
                .resolve(&source.target.host, source.target.auth.as_ref())
                .await?;
            let exists = self
                .registry
                .image_exists_at_remote(&target, &auth)
                .await
                .map_err(Error::step("probe", &target))?;
            if exists && !self.options.force {
                tracing::debug!(target = %target, "already at target");
                continue;
            }
            queue.push(source);
        }

        if queue.is_empty() {
            tracing::info!("all images up to date");
            return Ok(Outcome::UpToDate);
        }

        let plan: Vec<Planned> = queue
            .iter()
            .map(|s| Planned {
                image: s.image(),
                target: s.target_image(),
            })
            .collect();

        if self.options.dry_run {
            for p in &plan {
                tracing::info!("{} would be pushed as {}", p.image, p.target);
            }
            return Ok(Outcome::Planned(plan));
        }

        for (source, p) in queue.into_iter().zip(&plan) {
            self.transfer(source, p).await?;
        }
        Ok(Outcome::Pushed(plan))
    }

    /// Pull (if needed), tag, and push one source.
    async fn transfer(&self, source: &Source, plan: &Planned) -> Result<()> {
        let Planned { image, target } = plan;

        let pulled = if self.on_host(image).await? {
            false
        } else {
            let auth = self.auth.resolve(&source.host, source.auth.as_ref()).await?;
            tracing::info!(image = %image, "pulling");
            self.registry
                .pull_and_wait(image, &auth)
                .await
                .map_err(Error::step("pull", image))?;
            true
        };

        if pulled || !self.on_host(target).await? {
            self.registry
                .tag(image, target)
                .await
                .map_err(Error::step("tag", image))?;
        }

        let auth = self
            .auth
            .resolve(&source.target.host, source.target.auth.as_ref())
            .await?;
        tracing::info!(image = %image, target = %target, "pushing");
        self.registry
            .push_and_wait(target, &auth)
            .await
            .map_err(Error::step("push", target))
    }

    async fn on_host(&self, image: &str) -> Result<bool> {
        self.registry
            .image_exists_on_host(image)
            .await
            .map_err(Error::step("inspect local", image))
    }

    async fn with_deadline<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.options.deadline, fut)
            .await
            .map_err(|_| Error::Timeout(self.options.deadline))?
    }
}


#[cfg(test)]
mod tests {
    use imgsync_oci::Keychain;
    use tempfile::TempDir;

    use super::fake::{Call, FakeRegistry};
    use super::*;
    use crate::manifest::{Target, sources_from_images};

    fn resolver(dir: &TempDir) -> AuthResolver {
        AuthResolver::with_keychain(Keychain::from_path(dir.path().join("config.json")))
    }

    fn sources(images: &[&str], target: &str) -> Vec<Source> {
        let images: Vec<String> = images.iter().map(|s| (*s).to_owned()).collect();
        sources_from_images(&images, &Target::parse(target))
    }

    fn pushes(calls: &[Call]) -> Vec<&str> {
        calls
            .iter()
            .filter_map(|c| match c {
                Call::Push(i) => Some(i.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn pushes_only_absent_images() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::with_remote(&["t.com/a:1", "t.com/b:2"]);
        let auth = resolver(&dir);
        let srcs = sources(&["a:1", "b:2", "quay.io/c:3"], "t.com");

        let outcome = Reconciler::new(&registry, &auth, Options::default())
            .run(&srcs)
            .await
            .unwrap();

        let calls = registry.calls();
        assert_eq!(pushes(&calls), ["t.com/c:3"]);
        assert_eq!(
            calls,
            [
                Call::Pull("quay.io/c:3".into()),
                Call::Tag("quay.io/c:3".into(), "t.com/c:3".into()),
                Call::Push("t.com/c:3".into()),
            ]
        );
        assert!(matches!(outcome, Outcome::Pushed(p) if p.len() == 1));
    }

    #[tokio::test]
    async fn dry_run_transfers_nothing() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::with_remote(&["t.com/a:1", "t.com/b:2"]);
        let auth = resolver(&dir);
        let srcs = sources(&["a:1", "b:2", "quay.io/c:3"], "t.com");

        let outcome = Reconciler::new(&registry, &auth, Options::default().dry_run(true))
            .run(&srcs)
            .await
            .unwrap();

        assert!(registry.calls().is_empty());
        assert_eq!(
            outcome,
            Outcome::Planned(vec![Planned {
                image: "quay.io/c:3".into(),
                target: "t.com/c:3".into(),
            }])
        );
    }

    #[tokio::test]
    async fn digest_source_is_tagged_by_hex() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::default();
        let auth = resolver(&dir);
        let srcs = sources(&["host.io/repo@sha256:abc"], "t.com");

        Reconciler::new(&registry, &auth, Options::default())
            .run(&srcs)
            .await
            .unwrap();

        let tag = Call::Tag("host.io/repo@sha256:abc".into(), "t.com/repo:abc".into());
        assert!(registry.calls().contains(&tag));
        assert_eq!(pushes(&registry.calls()), ["t.com/repo:abc"]);
    }

    #[tokio::test]
    async fn latest_is_always_pushed() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::with_remote(&["t.com/app:latest"]);
        let auth = resolver(&dir);
        let srcs = sources(&["app:latest"], "t.com");

        Reconciler::new(&registry, &auth, Options::default())
            .run(&srcs)
            .await
            .unwrap();

        assert_eq!(pushes(&registry.calls()), ["t.com/app:latest"]);
    }

    #[tokio::test]
    async fn up_to_date_unless_forced() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::with_remote(&["t.com/a:1"]);
        let auth = resolver(&dir);
        let srcs = sources(&["a:1"], "t.com");

        let outcome = Reconciler::new(&registry, &auth, Options::default())
            .run(&srcs)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::UpToDate);
        assert!(registry.calls().is_empty());

        Reconciler::new(&registry, &auth, Options::default().force(true))
            .run(&srcs)
            .await
            .unwrap();
        assert_eq!(pushes(&registry.calls()), ["t.com/a:1"]);
    }

    #[tokio::test]
    async fn present_locally_skips_pull() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::default();
        registry.local.borrow_mut().push("quay.io/a:1".into());
        let auth = resolver(&dir);
        let srcs = sources(&["quay.io/a:1"], "t.com/mirror");

        Reconciler::new(&registry, &auth, Options::default())
            .run(&srcs)
            .await
            .unwrap();

        assert_eq!(
            registry.calls(),
            [
                Call::Tag("quay.io/a:1".into(), "t.com/mirror/a:1".into()),
                Call::Push("t.com/mirror/a:1".into()),
            ]
        );
    }

    #[tokio::test]
    async fn failure_aborts_remaining_sources() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry {
            fail_push: true,
            ..FakeRegistry::default()
        };
        let auth = resolver(&dir);
        let srcs = sources(&["a:1", "b:1"], "t.com");

        let err = Reconciler::new(&registry, &auth, Options::default())
            .run(&srcs)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Registry { op: "push", .. }));
        assert_eq!(pushes(&registry.calls()), ["t.com/a:1"]);
    }

    #[tokio::test]
    async fn pull_skips_local_images() {
        let dir = TempDir::new().unwrap();
        let registry = FakeRegistry::default();
        registry.local.borrow_mut().push("a:1".into());
        let auth = resolver(&dir);
        let srcs = sources(&["a:1", "b:2"], "t.com");

        let pulled = Reconciler::new(&registry, &auth, Options::default())
            .pull(&srcs, Side::Source)
            .await
            .unwrap();

        assert_eq!(pulled, ["b:2"]);
        assert_eq!(registry.calls(), [Call::Pull("b:2".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_is_reported() {
        struct Stalled;
        impl Registry for Stalled {
            async fn images_on_host(&self) -> imgsync_oci::Result<Vec<String>> {
                Ok(Vec::new())
            }
            async fn digests_on_host(&self) -> imgsync_oci::Result<Vec<String>> {
                Ok(Vec::new())
            }
            async fn image_exists_at_remote(
                &self,
                _image: &str,
                _auth: &imgsync_oci::EncodedAuth,
            ) -> imgsync_oci::Result<bool> {
                std::future::pending().await
            }
            async fn tags_for_repository(
                &self,
                _host: &str,
                _repository: &str,
                _auth: &imgsync_oci::EncodedAuth,
            ) -> imgsync_oci::Result<Vec<String>> {
                Ok(Vec::new())
            }
            async fn tag(&self, _source: &str, _target: &str) -> imgsync_oci::Result<()> {
                Ok(())
            }
            async fn pull_and_wait(
                &self,
                _image: &str,
                _auth: &imgsync_oci::EncodedAuth,
            ) -> imgsync_oci::Result<()> {
                Ok(())
            }
            async fn push_and_wait(
                &self,
                _image: &str,
                _auth: &imgsync_oci::EncodedAuth,
            ) -> imgsync_oci::Result<()> {
                Ok(())
            }
        }

        let dir = TempDir::new().unwrap();
        let auth = resolver(&dir);
        let deadline = Duration::from_secs(60);
        let err = Reconciler::new(&Stalled, &auth, Options::default().deadline(deadline))
            .run(&sources(&["a:1"], "t.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(d) if d == deadline));
    }
}
