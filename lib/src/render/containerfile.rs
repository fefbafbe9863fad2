//! Renders the `Containerfile` that rebuilds the inspected host as a bootc
//! image. Layer order is fixed for cache locality: an optional pip-native
//! builder prelude, base image, repos, packages, services, firewall,
//! scheduled tasks, configuration, non-rpm software, quadlets, kernel,
//! selinux, network, then label metadata. A value that would break out of
//! a generated shell line is never embedded directly -- it becomes a
//! needs-review comment instead, so a single unusual unit name or package
//! name never blocks the rest of the recipe.

use std::fmt::Write as _;

use anyhow::Result;

use rehost_utils::PathQuotedDisplay;

use crate::render::safety::check_shell_safe;
use crate::render::staging::StagedFile;
use crate::schema::{PackageState, Snapshot, TimerSource, UnitAction};

/// A `COPY` instruction for one staged file, both sides quoted for a POSIX
/// shell the way a path containing spaces or metacharacters would need.
fn copy_line(staged: &StagedFile) -> String {
    let src = camino::Utf8Path::new("config").join(&staged.staged_rel_path);
    format!(
        "COPY {} {}",
        PathQuotedDisplay::new(&src),
        PathQuotedDisplay::new(&staged.image_path),
    )
}

pub fn render(snapshot: &Snapshot, staged: &[StagedFile]) -> Result<String> {
    let mut out = String::new();

    let base_image = snapshot.rpm.as_ref().map(|r| r.base_image.as_str()).unwrap_or("scratch");

    emit_pip_native_prelude(&mut out, snapshot, base_image)?;

    if let Some(rpm) = &snapshot.rpm {
        if rpm.no_baseline {
            writeln!(out, "# no baseline package set was available; every installed package is listed as added")?;
        }
    }
    writeln!(out, "FROM {base_image}")?;
    writeln!(out)?;

    emit_repo_files(&mut out, snapshot, staged)?;
    emit_packages(&mut out, snapshot)?;
    emit_services(&mut out, snapshot)?;
    emit_firewall(&mut out, snapshot, staged)?;
    emit_scheduled(&mut out, snapshot)?;
    emit_config_files(&mut out, snapshot, staged)?;
    emit_nonrpm(&mut out, snapshot)?;
    emit_quadlets(&mut out, staged)?;
    emit_kernel(&mut out, snapshot)?;
    emit_selinux(&mut out, snapshot)?;
    emit_network(&mut out, snapshot, staged)?;
    emit_labels(&mut out, snapshot, base_image)?;

    Ok(out)
}

/// Rebuilds pip packages flagged with compiled (`.so`) extensions against
/// this image's own glibc/Python ABI in a throwaway builder stage, rather
/// than copying the source host's binaries across a possibly different
/// base image. Named `pip-native-builder` so `emit_nonrpm` can `COPY
/// --from=` it.
fn emit_pip_native_prelude(out: &mut String, snapshot: &Snapshot, base_image: &str) -> Result<()> {
    let Some(nonrpm) = &snapshot.nonrpm else { return Ok(()) };
    let native: Vec<&str> = nonrpm
        .items
        .iter()
        .filter(|i| i.has_c_extensions)
        .flat_map(|i| i.packages.iter().map(String::as_str))
        .collect();
    if native.is_empty() {
        return Ok(());
    }
    let mut names = native;
    names.sort_unstable();
    names.dedup();

    writeln!(out, "# Multi-stage prelude: rebuild pip packages with native extensions")?;
    writeln!(out, "# against this image's Python ABI instead of copying compiled .so files")?;
    writeln!(out, "# across from a possibly different source host.")?;
    writeln!(out, "FROM {base_image} AS pip-native-builder")?;
    writeln!(out, "RUN dnf install -y gcc python3-devel python3-pip")?;
    let mut safe_names = Vec::new();
    for name in names {
        if check_shell_safe(name).is_ok() {
            safe_names.push(name);
        } else {
            writeln!(out, "# needs-review: pip package name {name:?} skipped, unsafe for a shell command")?;
        }
    }
    if !safe_names.is_empty() {
        writeln!(out, "RUN pip3 install --prefix=/pip-build {}", safe_names.join(" "))?;
    }
    writeln!(out)?;
    Ok(())
}

/// Embeds `value` in `line` if safe; otherwise writes a needs-review comment
/// in its place and returns `false` so the caller can skip emitting the
/// now-meaningless instruction.
fn sanitized(out: &mut String, value: &str, line_for: impl FnOnce(&str) -> String) -> Result<bool> {
    match check_shell_safe(value) {
        Ok(()) => {
            writeln!(out, "{}", line_for(value))?;
            Ok(true)
        }
        Err(reason) => {
            writeln!(out, "# needs-review: {value:?} not embedded ({reason})")?;
            Ok(false)
        }
    }
}

fn emit_repo_files(out: &mut String, snapshot: &Snapshot, staged: &[StagedFile]) -> Result<()> {
    let Some(rpm) = &snapshot.rpm else { return Ok(()) };
    if rpm.repo_files.is_empty() {
        return Ok(());
    }
    writeln!(out, "# Repository configuration")?;
    for file in &rpm.repo_files {
        if let Some(staged_file) = staged.iter().find(|s| s.image_path == file.path) {
            writeln!(out, "{}", copy_line(staged_file))?;
        }
    }
    writeln!(out)?;
    Ok(())
}

fn emit_packages(out: &mut String, snapshot: &Snapshot) -> Result<()> {
    let Some(rpm) = &snapshot.rpm else { return Ok(()) };
    emit_package_verb(out, "install", &rpm.packages_added, PackageState::Added)?;
    emit_package_verb(out, "remove", &rpm.packages_removed, PackageState::Removed)?;
    Ok(())
}

fn emit_package_verb(
    out: &mut String,
    verb: &str,
    entries: &[crate::schema::PackageEntry],
    expected_state: PackageState,
) -> Result<()> {
    let mut names: Vec<&str> = entries
        .iter()
        .filter(|e| e.state == expected_state)
        .map(|e| e.name.as_str())
        .collect();
    if names.is_empty() {
        return Ok(());
    }
    names.sort_unstable();
    names.dedup();
    let mut safe_names = Vec::new();
    for name in names {
        if check_shell_safe(name).is_ok() {
            safe_names.push(name);
        } else {
            writeln!(out, "# needs-review: package name {name:?} skipped, unsafe for a shell command")?;
        }
    }
    if !safe_names.is_empty() {
        writeln!(out, "RUN dnf {verb} -y {}", safe_names.join(" "))?;
    }
    writeln!(out)?;
    Ok(())
}

fn emit_services(out: &mut String, snapshot: &Snapshot) -> Result<()> {
    let Some(services) = &snapshot.services else { return Ok(()) };
    if services.state_changes.iter().all(|c| c.action == UnitAction::Unchanged) {
        return Ok(());
    }
    writeln!(out, "# Service state")?;
    for change in &services.state_changes {
        let verb = match change.action {
            UnitAction::Enable => "enable",
            UnitAction::Disable => "disable",
            UnitAction::Mask => "mask",
            UnitAction::Unchanged => continue,
        };
        sanitized(out, &change.unit, |unit| format!("RUN systemctl {verb} {unit}"))?;
    }
    writeln!(out)?;
    Ok(())
}

fn emit_firewall(out: &mut String, snapshot: &Snapshot, staged: &[StagedFile]) -> Result<()> {
    let Some(network) = &snapshot.network else { return Ok(()) };
    if network.firewall_zones.is_empty() && network.firewall_direct_rules.is_empty() {
        return Ok(());
    }
    writeln!(out, "# Firewall configuration")?;
    for zone in &network.firewall_zones {
        if let Some(staged_file) = staged.iter().find(|s| s.image_path == zone.path) {
            writeln!(out, "{}", copy_line(staged_file))?;
        }
        for service in &zone.services {
            writeln!(out, "# equivalent: firewall-cmd --zone={} --add-service={service} --permanent", zone.name)?;
        }
        for port in &zone.ports {
            writeln!(out, "# equivalent: firewall-cmd --zone={} --add-port={port} --permanent", zone.name)?;
        }
    }
    writeln!(out)?;
    Ok(())
}

fn emit_scheduled(out: &mut String, snapshot: &Snapshot) -> Result<()> {
    let Some(scheduled) = &snapshot.scheduled else { return Ok(()) };
    if scheduled.generated_timer_units.is_empty() && scheduled.systemd_timers.is_empty() && scheduled.at_jobs.is_empty()
    {
        return Ok(());
    }
    writeln!(out, "# Scheduled tasks")?;
    for timer in &scheduled.systemd_timers {
        match timer.source {
            TimerSource::Local => {
                sanitized(out, &timer.name, |name| format!("RUN systemctl enable {name}"))?;
            }
            TimerSource::Vendor => {
                writeln!(out, "# vendor timer {} already ships enabled by preset policy", timer.name)?;
            }
        }
    }
    for unit in &scheduled.generated_timer_units {
        sanitized(out, &unit.name, |name| format!("RUN systemctl enable {name}"))?;
    }
    for job in &scheduled.at_jobs {
        writeln!(out, "# needs-review: at-job from {} has no systemd equivalent: {}", job.path, job.command)?;
    }
    writeln!(out)?;
    Ok(())
}

fn emit_config_files(out: &mut String, snapshot: &Snapshot, staged: &[StagedFile]) -> Result<()> {
    let Some(config) = &snapshot.config else { return Ok(()) };
    if config.files.is_empty() {
        return Ok(());
    }
    writeln!(out, "# Configuration ({} file(s) tracked)", config.files.len())?;
    for file in &config.files {
        if let Some(staged_file) = staged.iter().find(|s| s.image_path == file.path) {
            writeln!(out, "{}", copy_line(staged_file))?;
        }
        if let Some(kind) = file.kind {
            writeln!(out, "#   {} ({kind:?})", file.path)?;
        }
    }
    writeln!(out)?;
    Ok(())
}

fn emit_nonrpm(out: &mut String, snapshot: &Snapshot) -> Result<()> {
    let Some(nonrpm) = &snapshot.nonrpm else { return Ok(()) };
    if nonrpm.items.is_empty() {
        return Ok(());
    }
    writeln!(out, "# Non-RPM software")?;
    for item in &nonrpm.items {
        if item.has_c_extensions && !item.packages.is_empty() {
            writeln!(out, "COPY --from=pip-native-builder /pip-build {}", PathQuotedDisplay::new(&item.path))?;
            continue;
        }
        writeln!(
            out,
            "# needs-review: {:?} at {} ({}) not reproduced automatically",
            item.method,
            item.path,
            item.lang.as_deref().unwrap_or("unknown language")
        )?;
    }
    writeln!(out)?;
    Ok(())
}

fn emit_quadlets(out: &mut String, staged: &[StagedFile]) -> Result<()> {
    let quadlets: Vec<&StagedFile> = staged.iter().filter(|s| s.image_path.as_str().contains("containers/systemd")).collect();
    if quadlets.is_empty() {
        return Ok(());
    }
    writeln!(out, "# Quadlet units")?;
    for file in quadlets {
        writeln!(out, "{}", copy_line(file))?;
    }
    writeln!(out)?;
    Ok(())
}

fn emit_kernel(out: &mut String, snapshot: &Snapshot) -> Result<()> {
    let Some(kernel) = &snapshot.kernel else { return Ok(()) };
    if kernel.cmdline.is_empty() {
        return Ok(());
    }
    writeln!(out, "# Kernel command line (apply at deploy time, not buildable into the image)")?;
    writeln!(out, "#   kargs --append=\"{}\"", kernel.cmdline)?;
    writeln!(out)?;
    Ok(())
}

fn emit_selinux(out: &mut String, snapshot: &Snapshot) -> Result<()> {
    let Some(selinux) = &snapshot.selinux else { return Ok(()) };
    if selinux.custom_modules.is_empty() && selinux.boolean_overrides.is_empty() && !selinux.fips_mode {
        return Ok(());
    }
    writeln!(out, "# SELinux")?;
    for module in &selinux.custom_modules {
        sanitized(out, module, |m| format!("RUN semodule -i /usr/share/selinux/packages/{m}.pp || true"))?;
    }
    for (name, value) in &selinux.boolean_overrides {
        let state = if *value { "on" } else { "off" };
        sanitized(out, name, |n| format!("RUN setsebool -P {n} {state}"))?;
    }
    if selinux.fips_mode {
        writeln!(out, "# FIPS mode was enabled on the source host; enable it at deploy time")?;
    }
    writeln!(out)?;
    Ok(())
}

fn emit_network(out: &mut String, snapshot: &Snapshot, staged: &[StagedFile]) -> Result<()> {
    let Some(network) = &snapshot.network else { return Ok(()) };
    if network.connections.is_empty() && network.proxy.is_empty() && network.hosts_additions.is_empty() {
        return Ok(());
    }
    writeln!(out, "# Network")?;
    for conn in &network.connections {
        match conn.method {
            crate::schema::ConnectionMethod::Static => {
                if let Some(staged_file) = staged.iter().find(|s| s.image_path == conn.path) {
                    writeln!(out, "{}", copy_line(staged_file))?;
                }
            }
            crate::schema::ConnectionMethod::Dhcp | crate::schema::ConnectionMethod::Other => {
                writeln!(out, "# {} ({:?}) deferred to kickstart network configuration", conn.name, conn.method)?;
            }
        }
    }
    for proxy in &network.proxy {
        writeln!(out, "ENV {}={}", proxy.key, proxy.value)?;
    }
    if !network.hosts_additions.is_empty() {
        writeln!(out, "RUN cat >> /etc/hosts <<'EOF'")?;
        for line in &network.hosts_additions {
            writeln!(out, "{line}")?;
        }
        writeln!(out, "EOF")?;
    }
    writeln!(out)?;
    Ok(())
}

fn emit_labels(out: &mut String, snapshot: &Snapshot, base_image: &str) -> Result<()> {
    writeln!(out, "LABEL org.opencontainers.image.base.name=\"{base_image}\"")?;
    writeln!(out, "LABEL io.github.rehost.schema-version=\"{}\"", crate::schema::SCHEMA_VERSION)?;
    writeln!(out, "LABEL io.github.rehost.generated=\"{}\"", snapshot.meta.timestamp.to_rfc3339())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PackageEntry, RpmSection};

    fn base_snapshot() -> Snapshot {
        let mut snap = Snapshot::new("/", chrono::DateTime::UNIX_EPOCH);
        snap.rpm = Some(RpmSection {
            base_image: "quay.io/centos-bootc/centos-bootc:stream9".to_owned(),
            packages_added: vec![PackageEntry {
                name: "httpd".to_owned(),
                epoch: "0".to_owned(),
                version: "2.4".to_owned(),
                release: "1".to_owned(),
                arch: "x86_64".to_owned(),
                state: PackageState::Added,
            }],
            ..Default::default()
        });
        snap
    }

    #[test]
    fn emits_from_and_install_layer() {
        let snap = base_snapshot();
        let rendered = render(&snap, &[]).unwrap();
        assert!(rendered.starts_with("FROM quay.io/centos-bootc/centos-bootc:stream9\n"));
        assert!(rendered.contains("RUN dnf install -y httpd"));
    }

    #[test]
    fn unsafe_package_name_becomes_needs_review_comment_not_an_error() {
        let mut snap = base_snapshot();
        snap.rpm.as_mut().unwrap().packages_added[0].name = "httpd; rm -rf /".to_owned();
        let rendered = render(&snap, &[]).unwrap();
        assert!(rendered.contains("# needs-review: package name \"httpd; rm -rf /\" skipped"));
        assert!(!rendered.contains("RUN dnf install"));
    }

    #[test]
    fn no_baseline_gets_a_leading_comment() {
        let mut snap = base_snapshot();
        snap.rpm.as_mut().unwrap().no_baseline = true;
        let rendered = render(&snap, &[]).unwrap();
        assert!(rendered.starts_with("# no baseline package set was available"));
    }

    #[test]
    fn pip_native_extension_gets_a_builder_prelude_and_copy_from() {
        use crate::schema::{NonRpmItem, NonRpmMethod, NonRpmSoftwareSection};
        let mut snap = base_snapshot();
        snap.nonrpm = Some(NonRpmSoftwareSection {
            items: vec![NonRpmItem {
                method: NonRpmMethod::PythonVenv,
                path: "/opt/app/venv".into(),
                has_c_extensions: true,
                packages: vec!["numpy".to_owned()],
                ..Default::default()
            }],
        });
        let rendered = render(&snap, &[]).unwrap();
        assert!(rendered.starts_with("# Multi-stage prelude"));
        assert!(rendered.contains("FROM quay.io/centos-bootc/centos-bootc:stream9 AS pip-native-builder"));
        assert!(rendered.contains("RUN pip3 install --prefix=/pip-build numpy"));
        assert!(rendered.contains("COPY --from=pip-native-builder /pip-build /opt/app/venv"));
    }

    #[test]
    fn nonrpm_without_c_extensions_stays_a_comment() {
        use crate::schema::{NonRpmItem, NonRpmMethod, NonRpmSoftwareSection};
        let mut snap = base_snapshot();
        snap.nonrpm = Some(NonRpmSoftwareSection {
            items: vec![NonRpmItem {
                method: NonRpmMethod::CompiledBinary,
                path: "/opt/app/bin/server".into(),
                ..Default::default()
            }],
        });
        let rendered = render(&snap, &[]).unwrap();
        assert!(!rendered.contains("pip-native-builder"));
        assert!(rendered.contains("# needs-review: CompiledBinary at /opt/app/bin/server"));
    }
}
