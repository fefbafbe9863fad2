//! The eleven inspectors. Each reads a slice of the host filesystem under
//! `host_root` and, where necessary, invokes a host-side command through a
//! pluggable [`crate::executor::Executor`]. Every inspector returns its
//! section directly (never a `Result`): I/O and subprocess failures are
//! caught internally and recorded on the shared `warnings` vec, with the
//! function falling back to the best partial result it can still produce.

pub mod config;
pub mod containers;
pub mod kernel;
pub mod network;
pub mod nonrpm;
pub mod os_release;
pub mod rpm;
pub mod scheduled;
pub mod selinux;
pub mod services;
pub mod storage;
pub mod users;

/// Opt-in heavier-inspection flags, corresponding to the CLI flags in §6 of
/// the same name.
#[derive(Debug, Clone, Copy, Default)]
pub struct InspectFlags {
    pub config_diffs: bool,
    pub deep_binary_scan: bool,
    pub query_podman: bool,
}
