//! Image commands: list, pull, push, check.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use imgsync::manifest::sources_from_images;
use imgsync::{Manifest, Options, Outcome, Reconciler, Side, Source, Target};
use imgsync_oci::{AuthResolver, Client};

/// Which image strings a command addresses.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum Variant {
    /// Upstream images.
    Source,
    /// Images rewritten for the target registry.
    #[default]
    Target,
}

impl From<Variant> for Side {
    fn from(v: Variant) -> Self {
        match v {
            Variant::Source => Self::Source,
            Variant::Target => Self::Target,
        }
    }
}

/// Arguments for `imgsync list`.
#[derive(clap::Args)]
pub struct ListArgs {
    /// Image strings to print.
    #[arg(default_value = "target")]
    pub variant: Variant,

    /// Write the list to a file instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

/// Arguments for `imgsync pull`.
#[derive(clap::Args)]
pub struct PullArgs {
    /// Image strings to pull.
    pub variant: Variant,

    /// Seconds before the whole operation is abandoned.
    #[arg(long, default_value_t = 1800)]
    pub timeout: u64,
}

/// Arguments for `imgsync push`.
#[derive(clap::Args)]
pub struct PushArgs {
    /// Report what would be pushed without transferring anything.
    #[arg(long = "dryrun")]
    pub dry_run: bool,

    /// Push even if the target already has the image.
    #[arg(long)]
    pub force: bool,

    /// Push these images instead of the manifest's sources.
    #[arg(short = 'i', long, num_args = 1..)]
    pub images: Vec<String>,

    /// Override the target registry and repository prefix.
    #[arg(short = 't', long)]
    pub target: Option<String>,

    /// Seconds before the whole operation is abandoned.
    #[arg(long, default_value_t = 1800)]
    pub timeout: u64,
}

pub fn list(manifest: &Path, args: &ListArgs) -> Result<()> {
    let m = Manifest::load(manifest)?;
    let images = m.images(args.variant.into());

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            std::fs::File::create(path).with_context(|| format!("create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };
    for image in &images {
        writeln!(out, "{image}")?;
    }
    out.flush()?;
    Ok(())
}

pub async fn pull(manifest: &Path, args: &PullArgs) -> Result<()> {
    let m = Manifest::load(manifest)?;
    let client = connect()?;
    let auth = AuthResolver::new();
    let options = Options::default().deadline(Duration::from_secs(args.timeout));

    let pulled = Reconciler::new(&client, &auth, options)
        .pull(&m.sources, args.variant.into())
        .await
        .context("pull")?;
    for image in &pulled {
        println!("{image}");
    }
    Ok(())
}

pub async fn push(manifest: &Path, args: &PushArgs) -> Result<()> {
    let sources = push_sources(manifest, args)?;
    let client = connect()?;
    let auth = AuthResolver::new();
    let options = Options::default()
        .force(args.force)
        .dry_run(args.dry_run)
        .deadline(Duration::from_secs(args.timeout));

    let outcome = Reconciler::new(&client, &auth, options)
        .run(&sources)
        .await
        .context("push")?;
    if let Outcome::Pushed(pushed) = outcome {
        for p in &pushed {
            println!("{}", p.target);
        }
    }
    Ok(())
}

pub async fn check(manifest: &Path) -> Result<()> {
    let m = Manifest::load(manifest)?;
    let client = connect()?;
    let auth = AuthResolver::new();

    let upgrades = imgsync::upgrade::check(&client, &auth, &m.sources)
        .await
        .context("check upgrades")?;
    if upgrades.is_empty() {
        println!("no upgrades available");
    }
    for u in &upgrades {
        println!("{}: {}", u.image, u.newer.join(", "));
    }
    Ok(())
}

/// Sources for `push`: explicit images, or the manifest's, optionally
/// retargeted.
fn push_sources(manifest: &Path, args: &PushArgs) -> Result<Vec<Source>> {
    let target = args.target.as_deref().map(Target::parse);

    if !args.images.is_empty() {
        let target = match target {
            Some(t) => t,
            None => Manifest::load(manifest)?.target,
        };
        return Ok(sources_from_images(&args.images, &target));
    }

    let mut sources = Manifest::load(manifest)?.sources;
    if let Some(t) = target {
        for s in &mut sources {
            let auth = s
                .target
                .host
                .eq_ignore_ascii_case(&t.host)
                .then(|| s.target.auth.take())
                .flatten();
            s.target = t.clone();
            s.target.auth = auth;
        }
    }
    Ok(sources)
}

fn connect() -> Result<Client> {
    Client::connect().context("connect to container engine")
}
