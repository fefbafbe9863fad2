//! Detects conditions that silently break host inspection from inside a
//! container: a user namespace, a private PID namespace, a missing
//! `CAP_SYS_ADMIN`, or a confining mandatory-access-control label.
//!
//! Each check inspects a specific procfs file and returns `None` when the
//! file is unreadable, so the check is best-effort on non-Linux or under
//! unusual confinement. An empty result from [`run`] means the process may
//! proceed; a nonempty one means the operator must either fix the
//! environment or pass `--skip-preflight`.

use std::fs;

/// CAP_SYS_ADMIN's bit position in the `CapEff` bitmask from `/proc/self/status`.
const CAP_SYS_ADMIN_BIT: u64 = 21;

/// Run all preflight checks and return a human-readable error for each one
/// that fails. An empty vec means the process has what it needs to cross
/// into host namespaces.
pub fn run() -> Vec<String> {
    [
        check_user_namespace(),
        check_pid_namespace(),
        check_cap_sys_admin(),
        check_mac_confinement(),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// `uid 0` inside a user namespace does not mean `uid 0` outside of it. An
/// identity mapping line in `uid_map` looks like `0 0 4294967295`; anything
/// else means we're confined to a sub-range of the host's UIDs.
fn check_user_namespace() -> Option<String> {
    let contents = fs::read_to_string("/proc/self/uid_map").ok()?;
    let first_line = contents.lines().next()?;
    let fields: Vec<&str> = first_line.split_whitespace().collect();
    let [inside, outside, _count] = fields[..] else {
        return None;
    };
    if inside == "0" && outside != "0" {
        return Some(format!(
            "running inside a user namespace (uid 0 maps to host uid {outside}); \
             host inspection requires a real privileged container"
        ));
    }
    None
}

/// When the container doesn't share the host's PID namespace, PID 1 is the
/// container's own entrypoint rather than the host's init, so anything that
/// shells into "the host" by PID namespace tricks (none of our inspectors do,
/// but downstream namespace-entry invocations rely on this) silently targets
/// the wrong process tree.
fn check_pid_namespace() -> Option<String> {
    let self_ns = fs::read_link("/proc/self/ns/pid").ok()?;
    let init_ns = fs::read_link("/proc/1/ns/pid").ok()?;
    if self_ns != init_ns {
        return Some(
            "not sharing the host PID namespace (process 1 is not the host init); \
             run with --pid=host"
                .to_owned(),
        );
    }
    None
}

/// Parses the `CapEff` hex bitmask from `/proc/self/status` and checks for
/// `CAP_SYS_ADMIN`, required to cross into other namespaces.
fn check_cap_sys_admin() -> Option<String> {
    let status = fs::read_to_string("/proc/self/status").ok()?;
    let line = status.lines().find(|l| l.starts_with("CapEff:"))?;
    let hex = line.split_whitespace().nth(1)?;
    let mask = u64::from_str_radix(hex, 16).ok()?;
    if mask & (1 << CAP_SYS_ADMIN_BIT) == 0 {
        return Some("missing CAP_SYS_ADMIN; run with --privileged or --cap-add=SYS_ADMIN".to_owned());
    }
    None
}

/// A confining SELinux domain (anything but `unconfined_t`/`spc_t`) blocks
/// the wide filesystem and procfs access inspection needs.
fn check_mac_confinement() -> Option<String> {
    let label = fs::read_to_string("/proc/self/attr/current").ok()?;
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    let domain = label.split(':').nth(2).unwrap_or(label);
    let allowed = ["unconfined_t", "spc_t", "container_runtime_t"];
    if !allowed.contains(&domain) && domain != "kernel" {
        return Some(format!(
            "confined by MAC label '{label}'; host inspection needs an unconfined \
             or spc_t domain"
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preflight_on_this_host_is_best_effort() {
        // We can't assert a specific outcome since it depends on the
        // sandbox this test happens to run in, but it must never panic.
        let _ = run();
    }

    #[test]
    fn cap_sys_admin_bit_position() {
        // CapEff full set has bit 21 set; a process with no caps does not.
        let full = u64::MAX;
        assert_ne!(full & (1 << CAP_SYS_ADMIN_BIT), 0);
        assert_eq!(0u64 & (1 << CAP_SYS_ADMIN_BIT), 0);
    }
}
