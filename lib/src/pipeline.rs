//! Orchestrates the staged dataflow: preflight, inspectors, baseline
//! resolution, redaction, persistence, and rendering.
//!
//! Either loads a pre-existing snapshot from disk and runs renderers, or runs
//! inspectors then redaction then persistence then (optionally) renderers.
//! Snapshot section population order is fixed: RPM, then config (which
//! depends on RPM's owned-file set), then services (which may consume
//! base-image preset text), then the remaining inspectors in the order
//! listed in §4.4. Redaction runs after all inspectors; serialization runs
//! after redaction.

use std::sync::Arc;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use fn_error_context::context;

use crate::baseline::{BaselineRequest, BaselineResolver};
use crate::executor::{Executor, ProcessExecutor};
use crate::inspect::{self, InspectFlags};
use crate::redact::redact_snapshot;
use crate::render;
use crate::schema::Snapshot;

/// Everything the pipeline needs to know to run; maps closely onto the CLI
/// surface in spec §6.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub host_root: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub from_snapshot: Option<Utf8PathBuf>,
    pub inspect_only: bool,
    pub target_version: Option<String>,
    pub target_image: Option<String>,
    pub baseline_packages: Option<Utf8PathBuf>,
    pub flags: InspectFlags,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            host_root: "/".into(),
            output_dir: "./rehost-output".into(),
            from_snapshot: None,
            inspect_only: false,
            target_version: None,
            target_image: None,
            baseline_packages: None,
            flags: InspectFlags::default(),
        }
    }
}

/// Run the pipeline end to end. Returns the final (redacted, possibly
/// reloaded) snapshot.
#[context("Running inspection pipeline")]
pub fn run(opts: &PipelineOptions) -> Result<Snapshot> {
    std::fs::create_dir_all(&opts.output_dir)
        .with_context(|| format!("creating output directory {}", opts.output_dir))?;

    let snapshot = if let Some(path) = &opts.from_snapshot {
        load_snapshot(path)?
    } else {
        let executor: Arc<dyn Executor> = Arc::new(ProcessExecutor);
        let mut snapshot = inspect_host(&opts.host_root, executor, opts)?;
        redact_snapshot(&mut snapshot);
        persist_snapshot(&snapshot, &opts.output_dir)?;
        if opts.inspect_only {
            return Ok(snapshot);
        }
        snapshot
    };

    render::render_all(&snapshot, &opts.output_dir)?;
    Ok(snapshot)
}

/// Run every inspector in the fixed dependency order required by §5:
/// RPM before config, services after RPM (it may reach for base-image
/// preset text), then the rest.
fn inspect_host(
    host_root: &Utf8Path,
    executor: Arc<dyn Executor>,
    opts: &PipelineOptions,
) -> Result<Snapshot> {
    let mut snapshot = Snapshot::new(host_root, Utc::now());
    snapshot.meta.hostname = std::fs::read_to_string(host_root.join("etc/hostname"))
        .ok()
        .map(|s| s.trim().to_owned())
        .filter(|s| !s.is_empty());

    let os_release = inspect::os_release::read(host_root);
    let (os_id, version_id) = os_release
        .as_ref()
        .map(|o| (o.id.clone(), o.version_id.clone()))
        .unwrap_or_default();
    snapshot.os_release = os_release;

    let resolver = BaselineResolver::new(executor.clone());
    let baseline_req = BaselineRequest {
        os_id: &os_id,
        version_id: &version_id,
        target_version: opts.target_version.as_deref(),
        target_image: opts.target_image.as_deref(),
        baseline_packages_file: opts.baseline_packages.as_deref(),
    };
    let baseline = resolver.resolve(&baseline_req, &mut snapshot.warnings);

    let rpm = inspect::rpm::run(host_root, executor.as_ref(), &baseline, &mut snapshot.warnings);
    let owned_paths = inspect::config::owned_paths_from_rpm_va(&rpm.rpm_va);
    let removed_packages = rpm.dnf_history_removed.clone();
    snapshot.rpm = Some(rpm);

    snapshot.config = Some(inspect::config::run(
        host_root,
        executor.as_ref(),
        &owned_paths,
        &removed_packages,
        opts.flags.config_diffs,
        &mut snapshot.warnings,
    ));

    let presets = resolver.query_presets(&baseline.base_image);
    snapshot.services = Some(inspect::services::run(
        host_root,
        executor.as_ref(),
        presets.as_deref(),
        &mut snapshot.warnings,
    ));

    snapshot.network = Some(inspect::network::run(host_root, executor.as_ref(), &mut snapshot.warnings));

    snapshot.storage = Some(inspect::storage::run(host_root, executor.as_ref(), &mut snapshot.warnings));

    snapshot.scheduled = Some(inspect::scheduled::run(host_root, &mut snapshot.warnings));

    snapshot.containers = Some(inspect::containers::run(
        host_root,
        executor.as_ref(),
        opts.flags.query_podman,
        &mut snapshot.warnings,
    ));

    snapshot.nonrpm = Some(inspect::nonrpm::run(
        host_root,
        executor.as_ref(),
        opts.flags.deep_binary_scan,
        &mut snapshot.warnings,
    ));

    snapshot.kernel = Some(inspect::kernel::run(host_root, executor.as_ref(), &mut snapshot.warnings));

    snapshot.selinux = Some(inspect::selinux::run(host_root, executor.as_ref(), &mut snapshot.warnings));

    snapshot.users = Some(inspect::users::run(host_root, &mut snapshot.warnings));

    Ok(snapshot)
}

#[context("Loading snapshot from {path}")]
fn load_snapshot(path: &Utf8Path) -> Result<Snapshot> {
    let contents = std::fs::read_to_string(path)?;
    let mut value: serde_json::Value = serde_json::from_str(&contents)?;
    let on_disk_version = value
        .get("schema_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    if on_disk_version > crate::schema::SCHEMA_VERSION as u64 {
        tracing::warn!(
            "snapshot schema_version {on_disk_version} is newer than this build's {}; continuing best-effort",
            crate::schema::SCHEMA_VERSION
        );
    }
    // Unknown fields are preserved as-is by round-tripping through Value
    // first and letting serde's default struct deserialization drop only
    // what it doesn't recognize for the *typed* view; the raw Value above is
    // what a future schema migration would consult.
    let _ = value.as_object_mut();
    let snapshot: Snapshot = serde_json::from_value(value)?;
    Ok(snapshot)
}

#[context("Persisting snapshot to {}", output_dir.join("inspection-snapshot.json"))]
fn persist_snapshot(snapshot: &Snapshot, output_dir: &Utf8Path) -> Result<()> {
    let path = output_dir.join("inspection-snapshot.json");
    let json = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(&path, json)?;
    Ok(())
}
