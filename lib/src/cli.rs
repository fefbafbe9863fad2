//! The `rehost` command-line surface. `cli/src/main.rs` is a thin shell
//! that just calls [`run_from_iter`]; all argument parsing and dispatch
//! lives here so it's testable without a process boundary.

use anyhow::{bail, Result};
use camino::Utf8PathBuf;
use clap::Parser;

use crate::inspect::InspectFlags;
use crate::pipeline::{self, PipelineOptions};

#[derive(Debug, Parser)]
#[command(name = "rehost", about = "Inspect a host and emit a bootc rebuild recipe", version)]
struct Cli {
    /// Root of the host filesystem to inspect, e.g. `/` or a bind-mounted
    /// host root under `/mnt/host`.
    #[arg(long, default_value = "/")]
    host_root: Utf8PathBuf,

    /// Directory the Containerfile, staged config tree, and reports are
    /// written into. Created if missing.
    #[arg(short, long, default_value = "./rehost-output")]
    output_dir: Utf8PathBuf,

    /// Skip inspection and render from a previously saved
    /// `inspection-snapshot.json` instead.
    #[arg(long)]
    from_snapshot: Option<Utf8PathBuf>,

    /// Run inspection and write the snapshot, but skip rendering.
    #[arg(long)]
    inspect_only: bool,

    /// Target OS major version, e.g. `9`, overriding the host's own
    /// `/etc/os-release` version when resolving the base image.
    #[arg(long)]
    target_version: Option<String>,

    /// Target bootc base image, overriding release-map resolution entirely.
    #[arg(long)]
    target_image: Option<String>,

    /// A file listing one baseline package name per line, overriding live
    /// base-image package queries.
    #[arg(long)]
    baseline_packages: Option<Utf8PathBuf>,

    /// Diff RPM-owned `/etc` files against their pristine package content.
    #[arg(long)]
    config_diffs: bool,

    /// Inspect compiled binaries under `/opt` and `/usr/local/bin` with
    /// `readelf`, beyond the default filename-based scan.
    #[arg(long)]
    deep_binary_scan: bool,

    /// Query the live `podman ps` state for running containers, beyond the
    /// quadlet/compose file scan.
    #[arg(long)]
    query_podman: bool,

    /// Proceed even if a preflight check (namespace, capability, MAC
    /// confinement) fails.
    #[arg(long)]
    skip_preflight: bool,

    /// Build the recipe with the external image builder and report
    /// failures. Reserved for an external-builder integration; the core
    /// pipeline accepts the flag but does not act on it.
    #[arg(long)]
    validate: bool,

    /// Push the output tree to a git remote after rendering. Reserved for
    /// an external push-helper integration; accepted but not yet wired up.
    #[arg(long, value_name = "REPO")]
    push_to_github: Option<String>,

    /// Authentication token for `--push-to-github`.
    #[arg(long, value_name = "TOKEN")]
    github_token: Option<String>,

    /// Create the pushed repository as public rather than private.
    #[arg(long)]
    public: bool,

    /// Skip confirmation prompts in interactive flows that don't exist yet
    /// in this core pipeline.
    #[arg(long)]
    yes: bool,
}

pub fn run_from_iter(args: impl Iterator<Item = String>) -> Result<()> {
    let cli = Cli::parse_from(args);

    if !cli.skip_preflight {
        let failures = crate::preflight::run();
        if !failures.is_empty() {
            for failure in &failures {
                tracing::error!("preflight check failed: {failure}");
            }
            bail!(
                "{} preflight check(s) failed; pass --skip-preflight to proceed anyway",
                failures.len()
            );
        }
    }

    let opts = PipelineOptions {
        host_root: cli.host_root,
        output_dir: cli.output_dir,
        from_snapshot: cli.from_snapshot,
        inspect_only: cli.inspect_only,
        target_version: cli.target_version,
        target_image: cli.target_image,
        baseline_packages: cli.baseline_packages,
        flags: InspectFlags {
            config_diffs: cli.config_diffs,
            deep_binary_scan: cli.deep_binary_scan,
            query_podman: cli.query_podman,
        },
    };

    pipeline::run(&opts)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_args() {
        let cli = Cli::parse_from(["rehost"]);
        assert_eq!(cli.host_root, Utf8PathBuf::from("/"));
        assert_eq!(cli.output_dir, Utf8PathBuf::from("./rehost-output"));
        assert!(!cli.inspect_only);
    }

    #[test]
    fn parses_flags_and_paths() {
        let cli = Cli::parse_from([
            "rehost",
            "--host-root",
            "/mnt/host",
            "--output-dir",
            "/tmp/out",
            "--inspect-only",
            "--config-diffs",
            "--target-version",
            "9",
        ]);
        assert_eq!(cli.host_root, Utf8PathBuf::from("/mnt/host"));
        assert_eq!(cli.output_dir, Utf8PathBuf::from("/tmp/out"));
        assert!(cli.inspect_only);
        assert!(cli.config_diffs);
        assert_eq!(cli.target_version.as_deref(), Some("9"));
    }
}
