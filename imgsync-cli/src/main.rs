//! CLI for declarative container image synchronization.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod images;
mod manifest;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "imgsync",
    version,
    about = "Mirror container images into a target registry"
)]
struct Cli {
    /// Path to the image manifest.
    #[arg(
        short = 'm',
        long,
        global = true,
        env = "IMGSYNC_MANIFEST",
        default_value = imgsync::manifest::DEFAULT_PATH
    )]
    manifest: PathBuf,

    /// Log at debug level unless RUST_LOG is set.
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a new manifest, optionally populated from Kubernetes resources.
    Create(manifest::CreateArgs),

    /// Rescan Kubernetes resources into the existing manifest.
    Update(manifest::UpdateArgs),

    /// Print resolved image strings.
    #[command(visible_alias = "ls")]
    List(images::ListArgs),

    /// Pull images missing from the local engine.
    Pull(images::PullArgs),

    /// Push images missing from the target registry.
    Push(images::PushArgs),

    /// Report newer upstream semver tags.
    Check,

    /// Print the program version.
    Version,

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if let Err(e) = cli.dispatch().await {
        eprintln!("imgsync: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    async fn dispatch(self) -> Result<()> {
        let path = self.manifest;
        match self.command {
            Command::Create(args) => manifest::create(&path, &args),
            Command::Update(args) => manifest::update(&path, &args),
            Command::List(args) => images::list(&path, &args),
            Command::Pull(args) => images::pull(&path, &args).await,
            Command::Push(args) => images::push(&path, &args).await,
            Command::Check => images::check(&path).await,
            Command::Version => {
                println!("imgsync {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
            Command::Completion { shell } => {
                clap_complete::generate(
                    shell,
                    &mut Self::command(),
                    "imgsync",
                    &mut std::io::stdout(),
                );
                Ok(())
            }
        }
    }
}

/// Logs to stderr, filtered by `RUST_LOG` when set.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn manifest_flag_is_global() {
        let cli = Cli::try_parse_from(["imgsync", "list", "-m", "x.yaml", "source"]).unwrap();
        assert_eq!(cli.manifest, PathBuf::from("x.yaml"));
        assert!(matches!(cli.command, Command::List(_)));
    }

    #[test]
    fn push_flags() {
        let cli = Cli::try_parse_from([
            "imgsync", "push", "--dryrun", "--force", "-t", "t.com/m", "-i", "a:1", "b:2",
        ])
        .unwrap();
        let Command::Push(args) = cli.command else {
            panic!("expected push");
        };
        assert!(args.dry_run && args.force);
        assert_eq!(args.target.as_deref(), Some("t.com/m"));
        assert_eq!(args.images, ["a:1", "b:2"]);
    }
}
