//! Declarative container image synchronization between registries.
//!
//! A [`Manifest`] lists source images and a target registry. The
//! [`Reconciler`] pulls each source absent from the target, retags it under
//! the target, and pushes it.
//!
//! # Quick start
//!
//! ```no_run
//! use imgsync::{Manifest, Options, Reconciler};
//! use imgsync_oci::{AuthResolver, Client};
//!
//! # async fn run() -> imgsync::Result<()> {
//! let manifest = Manifest::load(".images.yaml".as_ref())?;
//! let client = Client::connect()?;
//! let auth = AuthResolver::new();
//!
//! Reconciler::new(&client, &auth, Options::default())
//!     .run(&manifest.sources)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Manifests can be bootstrapped from Kubernetes resources with
//! [`Manifest::with_autodetect`], and [`upgrade::check`] reports newer
//! upstream semver tags.

#![allow(clippy::missing_docs_in_private_items)]

mod error;
pub mod kube;
pub mod manifest;
pub mod sync;
pub mod upgrade;

pub use error::{Error, Result};
pub use manifest::{Manifest, Side, Source, Target};
pub use sync::{Options, Outcome, Planned, Reconciler};
pub use upgrade::Upgrade;
