//! Collects podman quadlet units, compose files, and, when explicitly
//! requested, currently running containers.

use camino::Utf8Path;
use walkdir::WalkDir;

use crate::executor::Executor;
use crate::schema::{ComposeService, ContainerSection, QuadletUnit, RunningContainer, Warning};

const QUADLET_DIRS: &[&str] = &[
    "etc/containers/systemd",
    "usr/share/containers/systemd",
];

pub fn run(
    host_root: &Utf8Path,
    executor: &dyn Executor,
    query_podman: bool,
    warnings: &mut Vec<Warning>,
) -> ContainerSection {
    ContainerSection {
        quadlet_units: collect_quadlet_units(host_root),
        compose_files: collect_compose_files(host_root),
        running_containers: if query_podman {
            collect_running_containers(executor, warnings)
        } else {
            Vec::new()
        },
    }
}

fn collect_quadlet_units(host_root: &Utf8Path) -> Vec<QuadletUnit> {
    let mut out = Vec::new();
    for dir in QUADLET_DIRS {
        let full = host_root.join(dir);
        let Ok(entries) = std::fs::read_dir(&full) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some("container") | Some("image") | Some("pod") | Some("network") | Some("volume")) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else { continue };
            let image = tini::Ini::from_string(&content)
                .ok()
                .and_then(|ini| ini.get::<String>("Container", "Image").or_else(|| ini.get::<String>("Image", "Image")));
            let Ok(camino_path) = camino::Utf8PathBuf::from_path_buf(path) else { continue };
            out.push(QuadletUnit {
                path: host_relative(host_root, &camino_path),
                image,
                content,
            });
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

fn collect_compose_files(host_root: &Utf8Path) -> Vec<ComposeService> {
    let mut out = Vec::new();
    let candidates = [host_root.join("opt"), host_root.join("etc/compose")];
    for root in candidates {
        if !root.exists() {
            continue;
        }
        for entry in WalkDir::new(&root).max_depth(4).into_iter().flatten() {
            let Some(name) = entry.file_name().to_str() else { continue };
            if name != "docker-compose.yml" && name != "docker-compose.yaml" && name != "compose.yml" && name != "compose.yaml" {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else { continue };
            let Ok(camino_path) = camino::Utf8PathBuf::from_path_buf(entry.path().to_path_buf()) else { continue };
            let path = host_relative(host_root, &camino_path);
            for (service, image) in parse_compose_services(&content) {
                out.push(ComposeService {
                    path: path.clone(),
                    service,
                    image,
                });
            }
        }
    }
    out.sort_by(|a, b| (a.path.clone(), a.service.clone()).cmp(&(b.path.clone(), b.service.clone())));
    out
}

/// Deliberately not a full YAML parser: pulls `  <name>:` service headers
/// under a `services:` block and any `image:` line nested beneath them.
/// Sufficient for surfacing what images a compose file references without
/// adding a YAML dependency the rest of the crate has no other use for.
fn parse_compose_services(content: &str) -> Vec<(String, Option<String>)> {
    let mut services = Vec::new();
    let mut in_services = false;
    let mut current: Option<(String, Option<String>)> = None;
    for line in content.lines() {
        let indent = line.len() - line.trim_start().len();
        let trimmed = line.trim();
        if trimmed == "services:" {
            in_services = true;
            continue;
        }
        if !in_services {
            continue;
        }
        if indent == 0 && !trimmed.is_empty() {
            // left the services block
            if let Some(c) = current.take() {
                services.push(c);
            }
            in_services = false;
            continue;
        }
        if indent == 2 {
            if let Some(name) = trimmed.strip_suffix(':') {
                if let Some(c) = current.take() {
                    services.push(c);
                }
                current = Some((name.to_owned(), None));
            }
        } else if indent > 2 {
            if let Some(image) = trimmed.strip_prefix("image:") {
                if let Some((_, img)) = current.as_mut() {
                    *img = Some(image.trim().trim_matches('"').to_owned());
                }
            }
        }
    }
    if let Some(c) = current {
        services.push(c);
    }
    services
}

fn collect_running_containers(executor: &dyn Executor, warnings: &mut Vec<Warning>) -> Vec<RunningContainer> {
    let output = executor.run(
        &["podman", "ps", "--format", "{{.Names}}\t{{.Image}}"],
        None,
    );
    if !output.success() {
        warnings.push(Warning {
            source: "containers".to_owned(),
            message: "podman ps failed; skipping running container inspection".to_owned(),
            severity: crate::schema::Severity::Info,
        });
        return Vec::new();
    }
    output
        .stdout_lines()
        .into_iter()
        .filter_map(|line| {
            let (name, image) = line.split_once('\t')?;
            Some(RunningContainer {
                name: name.to_owned(),
                image: image.to_owned(),
                ..Default::default()
            })
        })
        .collect()
}

fn host_relative(host_root: &Utf8Path, full: &Utf8Path) -> camino::Utf8PathBuf {
    full.strip_prefix(host_root)
        .map(|p| camino::Utf8PathBuf::from(format!("/{}", p.as_str().trim_start_matches('/'))))
        .unwrap_or_else(|_| full.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecOutput, FakeExecutor};

    #[test]
    fn parses_compose_service_images() {
        let content = "services:\n  web:\n    image: nginx:latest\n  db:\n    image: postgres:15\n";
        let services = parse_compose_services(content);
        assert_eq!(services.len(), 2);
        assert_eq!(services[0], ("web".to_owned(), Some("nginx:latest".to_owned())));
        assert_eq!(services[1], ("db".to_owned(), Some("postgres:15".to_owned())));
    }

    #[test]
    fn running_containers_skipped_without_flag() {
        let exec = FakeExecutor::always_missing();
        let mut warnings = Vec::new();
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let section = run(root, &exec, false, &mut warnings);
        assert!(section.running_containers.is_empty());
        assert!(warnings.is_empty());
    }

    #[test]
    fn parses_running_containers_when_requested() {
        let exec = FakeExecutor::constant(ExecOutput {
            stdout: b"web\tnginx:latest\n".to_vec(),
            stderr: String::new(),
            exit_code: 0,
        });
        let mut warnings = Vec::new();
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let section = run(root, &exec, true, &mut warnings);
        assert_eq!(section.running_containers.len(), 1);
        assert_eq!(section.running_containers[0].name, "web");
    }
}
