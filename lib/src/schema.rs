//! The typed snapshot that mediates between inspectors and renderers.
//!
//! Every section is optional so the pipeline tolerates partial inspection;
//! every text-bearing field is captured eagerly so rendering is a pure
//! function of the snapshot. Container and map fields default to empty,
//! never absent, so renderers never have to branch on "present but empty".

use std::collections::BTreeMap;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The schema version of this crate. Bump whenever a breaking change is made
/// to the shape of [`Snapshot`]; a snapshot from a newer version than this
/// one is loaded best-effort with a warning, never rejected outright.
pub const SCHEMA_VERSION: u32 = 1;

/// The top-level, serializable record produced by one run of the pipeline.
/// Owns every section; immutable after redaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub schema_version: u32,
    pub meta: Meta,
    #[serde(default)]
    pub os_release: Option<OsRelease>,
    #[serde(default)]
    pub rpm: Option<RpmSection>,
    #[serde(default)]
    pub config: Option<ConfigSection>,
    #[serde(default)]
    pub services: Option<ServiceSection>,
    #[serde(default)]
    pub network: Option<NetworkSection>,
    #[serde(default)]
    pub storage: Option<StorageSection>,
    #[serde(default)]
    pub scheduled: Option<ScheduledTaskSection>,
    #[serde(default)]
    pub containers: Option<ContainerSection>,
    #[serde(default)]
    pub nonrpm: Option<NonRpmSoftwareSection>,
    #[serde(default)]
    pub kernel: Option<KernelBootSection>,
    #[serde(default)]
    pub selinux: Option<SelinuxSection>,
    #[serde(default)]
    pub users: Option<UserGroupSection>,
    /// Append-only; written by inspectors, the baseline resolver, and
    /// redaction, never by renderers.
    #[serde(default)]
    pub warnings: Vec<Warning>,
    /// Append-only; exactly one record per substring the redaction pass
    /// replaced.
    #[serde(default)]
    pub redactions: Vec<Redaction>,
}

impl Snapshot {
    pub fn new(host_root: impl Into<Utf8PathBuf>, timestamp: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            meta: Meta {
                host_root: host_root.into(),
                hostname: None,
                timestamp,
            },
            ..Default::default()
        }
    }

    pub fn warn(&mut self, source: impl Into<String>, message: impl Into<String>, severity: Severity) {
        self.warnings.push(Warning {
            source: source.into(),
            message: message.into(),
            severity,
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Meta {
    pub host_root: Utf8PathBuf,
    #[serde(default)]
    pub hostname: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            host_root: Utf8PathBuf::from("/"),
            hostname: None,
            timestamp: DateTime::UNIX_EPOCH,
        }
    }
}

/// Severity of a structured warning. `Error` severity is used for conditions
/// (such as a cross-major-version baseline target) that don't abort the run
/// but demand operator attention.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Warning {
    /// Name of the inspector or component that raised this.
    pub source: String,
    pub message: String,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Redaction {
    /// Dotted path naming the snapshot field (or subfield) whose content was
    /// altered, e.g. `config.files[/etc/foo.conf].content`.
    pub field: String,
    pub replacement: String,
    pub pattern: String,
}

/// Parsed contents of `/etc/os-release`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub version_id: String,
    #[serde(default)]
    pub pretty_name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------
// RPM
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    Added,
    Removed,
    Modified,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageEntry {
    pub name: String,
    pub epoch: String,
    pub version: String,
    pub release: String,
    pub arch: String,
    pub state: PackageState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpmVaEntry {
    pub path: Utf8PathBuf,
    /// The nine-character modification-summary prefix from `rpm -Va`.
    pub flags: String,
    #[serde(default)]
    pub package: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoFile {
    pub path: Utf8PathBuf,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpmSection {
    #[serde(default)]
    pub packages_added: Vec<PackageEntry>,
    #[serde(default)]
    pub packages_removed: Vec<PackageEntry>,
    #[serde(default)]
    pub packages_modified: Vec<PackageEntry>,
    #[serde(default)]
    pub rpm_va: Vec<RpmVaEntry>,
    #[serde(default)]
    pub repo_files: Vec<RepoFile>,
    #[serde(default)]
    pub dnf_history_removed: Vec<String>,
    #[serde(default)]
    pub base_image: String,
    #[serde(default)]
    pub baseline_package_names: Option<Vec<String>>,
    #[serde(default)]
    pub no_baseline: bool,
}

// ---------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConfigFileKind {
    RpmOwnedModified,
    Unowned,
    Orphaned,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigFileEntry {
    pub path: Utf8PathBuf,
    pub kind: Option<ConfigFileKind>,
    pub content: String,
    #[serde(default)]
    pub rpm_va_flags: Option<String>,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub diff_against_rpm: Option<String>,
}

impl Default for ConfigFileKind {
    fn default() -> Self {
        Self::Unowned
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigSection {
    #[serde(default)]
    pub files: Vec<ConfigFileEntry>,
}

// ---------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnitAction {
    Enable,
    Disable,
    Mask,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceStateChange {
    pub unit: String,
    pub current_state: String,
    pub default_state: String,
    pub action: UnitAction,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceSection {
    #[serde(default)]
    pub state_changes: Vec<ServiceStateChange>,
    #[serde(default)]
    pub enabled_units: Vec<String>,
    #[serde(default)]
    pub disabled_units: Vec<String>,
}

// ---------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMethod {
    Static,
    Dhcp,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConnection {
    pub path: Utf8PathBuf,
    pub name: String,
    pub method: ConnectionMethod,
    #[serde(rename = "type")]
    pub conn_type: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallZone {
    pub name: String,
    pub path: Utf8PathBuf,
    pub content: String,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub rich_rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirewallDirectRule {
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_ipv")]
    pub ipv: String,
    #[serde(default = "default_chain")]
    pub chain: String,
    pub args: String,
}

fn default_priority() -> String {
    "0".to_owned()
}
fn default_table() -> String {
    "filter".to_owned()
}
fn default_ipv() -> String {
    "ipv4".to_owned()
}
fn default_chain() -> String {
    "INPUT".to_owned()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResolvProvenance {
    NetworkManager,
    SystemdResolved,
    Static,
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxySetting {
    pub key: String,
    pub value: String,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkSection {
    #[serde(default)]
    pub connections: Vec<NetworkConnection>,
    #[serde(default)]
    pub firewall_zones: Vec<FirewallZone>,
    #[serde(default)]
    pub firewall_direct_rules: Vec<FirewallDirectRule>,
    #[serde(default)]
    pub static_routes: Vec<String>,
    #[serde(default)]
    pub ip_routes: Vec<String>,
    #[serde(default)]
    pub ip_rules: Vec<String>,
    #[serde(default)]
    pub resolv_provenance: Option<ResolvProvenance>,
    #[serde(default)]
    pub hosts_additions: Vec<String>,
    #[serde(default)]
    pub proxy: Vec<ProxySetting>,
}

// ---------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VarDirectory {
    pub path: Utf8PathBuf,
    /// Bytes, capped: counting stops once 10 MiB has been observed.
    pub size_estimate: u64,
    pub recommendation: StorageRecommendation,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageRecommendation {
    #[default]
    PersistentVolume,
    Ephemeral,
    ExternalShipping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRef {
    pub path: Utf8PathBuf,
    pub referenced_from: Utf8PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageSection {
    #[serde(default)]
    pub fstab_entries: Vec<String>,
    #[serde(default)]
    pub mount_points: Vec<String>,
    #[serde(default)]
    pub lvm_info: Option<String>,
    #[serde(default)]
    pub var_directories: Vec<VarDirectory>,
    #[serde(default)]
    pub credential_refs: Vec<CredentialRef>,
}

// ---------------------------------------------------------------------
// Scheduled tasks
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CronJob {
    pub source: Utf8PathBuf,
    pub schedule: String,
    pub user: Option<String>,
    pub command: String,
    pub on_calendar: Option<String>,
    pub converted: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimerSource {
    Local,
    Vendor,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemdTimer {
    pub name: String,
    pub source: TimerSource,
    pub on_calendar: Option<String>,
    pub exec_start: Option<String>,
    pub timer_content: String,
    pub service_content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AtJob {
    pub path: Utf8PathBuf,
    pub command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedTimerUnit {
    pub name: String,
    pub timer_content: String,
    pub service_content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduledTaskSection {
    #[serde(default)]
    pub cron_jobs: Vec<CronJob>,
    #[serde(default)]
    pub systemd_timers: Vec<SystemdTimer>,
    #[serde(default)]
    pub at_jobs: Vec<AtJob>,
    #[serde(default)]
    pub generated_timer_units: Vec<GeneratedTimerUnit>,
}

// ---------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuadletUnit {
    pub path: Utf8PathBuf,
    pub image: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComposeService {
    pub path: Utf8PathBuf,
    pub service: String,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunningContainer {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub mounts: Vec<String>,
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSection {
    #[serde(default)]
    pub quadlet_units: Vec<QuadletUnit>,
    #[serde(default)]
    pub compose_files: Vec<ComposeService>,
    #[serde(default)]
    pub running_containers: Vec<RunningContainer>,
}

// ---------------------------------------------------------------------
// Non-RPM software
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NonRpmMethod {
    #[default]
    CompiledBinary,
    PythonVenv,
    Git,
    SystemPip,
    Lockfile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NonRpmItem {
    pub method: NonRpmMethod,
    pub path: Utf8PathBuf,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub shared_libs: Vec<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub git_remote: Option<String>,
    #[serde(default)]
    pub git_commit: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub has_c_extensions: bool,
    #[serde(default)]
    pub files: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub content: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NonRpmSoftwareSection {
    #[serde(default)]
    pub items: Vec<NonRpmItem>,
}

// ---------------------------------------------------------------------
// Kernel / boot
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct KernelBootSection {
    #[serde(default)]
    pub cmdline: String,
    #[serde(default)]
    pub grub_defaults: BTreeMap<String, String>,
    #[serde(default)]
    pub sysctl_overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub loaded_modules: Vec<String>,
    #[serde(default)]
    pub non_default_modules: Vec<String>,
    #[serde(default)]
    pub modules_load_d: Vec<RepoFile>,
    #[serde(default)]
    pub modprobe_d: Vec<RepoFile>,
    #[serde(default)]
    pub dracut_conf: Vec<RepoFile>,
}

// ---------------------------------------------------------------------
// SELinux
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelinuxSection {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub policy_type: String,
    #[serde(default)]
    pub custom_modules: Vec<String>,
    #[serde(default)]
    pub boolean_overrides: BTreeMap<String, bool>,
    #[serde(default)]
    pub fcontext_rules: Vec<String>,
    #[serde(default)]
    pub audit_rules: Vec<RepoFile>,
    #[serde(default)]
    pub fips_mode: bool,
    #[serde(default)]
    pub pam_configs: Vec<String>,
}

// ---------------------------------------------------------------------
// Users / groups
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub gid: u32,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserGroupSection {
    #[serde(default)]
    pub users: Vec<UserEntry>,
    #[serde(default)]
    pub groups: Vec<GroupEntry>,
    #[serde(default)]
    pub sudoers_rules: Vec<String>,
    #[serde(default)]
    pub ssh_authorized_keys_refs: Vec<Utf8PathBuf>,
    #[serde(default)]
    pub passwd_entries: Vec<String>,
    #[serde(default)]
    pub shadow_entries: Vec<String>,
    #[serde(default)]
    pub group_entries: Vec<String>,
    #[serde(default)]
    pub gshadow_entries: Vec<String>,
    #[serde(default)]
    pub subuid_entries: Vec<String>,
    #[serde(default)]
    pub subgid_entries: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sections_serialize_as_empty_not_null() {
        let section = ConfigSection::default();
        let json = serde_json::to_value(&section).unwrap();
        assert_eq!(json["files"], serde_json::json!([]));
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let snap = Snapshot::new("/mnt/host", DateTime::UNIX_EPOCH);
        let json = serde_json::to_string_pretty(&snap).unwrap();
        let reloaded: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, reloaded);
    }

    #[test]
    fn unknown_fields_at_load_are_ignored_not_rejected() {
        let mut value = serde_json::to_value(Snapshot::new("/", DateTime::UNIX_EPOCH)).unwrap();
        value["from_the_future"] = serde_json::json!("surprise");
        let loaded: Result<Snapshot, _> = serde_json::from_value(value);
        assert!(loaded.is_ok());
    }

    #[test]
    fn firewall_direct_rule_defaults_match_spec() {
        let json = serde_json::json!({"args": "-j ACCEPT"});
        let rule: FirewallDirectRule = serde_json::from_value(json).unwrap();
        assert_eq!(rule.priority, "0");
        assert_eq!(rule.table, "filter");
        assert_eq!(rule.ipv, "ipv4");
        assert_eq!(rule.chain, "INPUT");
    }
}
