//! Manifest commands: create, update.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use imgsync::{Manifest, Target};

/// Arguments for `imgsync create`.
#[derive(clap::Args)]
pub struct CreateArgs {
    /// Directory of Kubernetes resources to scan for images.
    pub path: Option<PathBuf>,

    /// Target registry and repository prefix (e.g. registry.example.com/mirror).
    #[arg(short = 't', long, required = true)]
    pub target: String,
}

/// Arguments for `imgsync update`.
#[derive(clap::Args)]
pub struct UpdateArgs {
    /// Directory of Kubernetes resources to scan for images.
    pub path: PathBuf,
}

pub fn create(manifest: &Path, args: &CreateArgs) -> Result<()> {
    if manifest.exists() {
        anyhow::bail!("{} already exists", manifest.display());
    }
    let target = Target::parse(&args.target);
    anyhow::ensure!(!target.host.is_empty(), "target {:?} has no host", args.target);

    let m = match &args.path {
        Some(dir) => Manifest::with_autodetect(target, dir)
            .with_context(|| format!("scan {}", dir.display()))?,
        None => Manifest::new(target),
    };
    m.save(manifest)
        .with_context(|| format!("write {}", manifest.display()))?;
    tracing::info!(path = %manifest.display(), sources = m.sources.len(), "created manifest");
    Ok(())
}

pub fn update(manifest: &Path, args: &UpdateArgs) -> Result<()> {
    let mut m = Manifest::load(manifest)?;
    m.update(&args.path)
        .with_context(|| format!("scan {}", args.path.display()))?;
    m.save(manifest)
        .with_context(|| format!("write {}", manifest.display()))?;
    Ok(())
}
