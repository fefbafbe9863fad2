//! Collects NetworkManager connection profiles, firewalld zones and direct
//! rules, static routing config, resolver provenance, `/etc/hosts`
//! additions, and proxy environment settings.

use camino::Utf8Path;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::executor::Executor;
use crate::schema::{
    ConnectionMethod, FirewallDirectRule, FirewallZone, NetworkConnection, NetworkSection,
    ProxySetting, ResolvProvenance, Severity, Warning,
};

pub fn run(host_root: &Utf8Path, executor: &dyn Executor, warnings: &mut Vec<Warning>) -> NetworkSection {
    NetworkSection {
        connections: collect_connections(host_root, warnings),
        firewall_zones: collect_firewall_zones(host_root, warnings),
        firewall_direct_rules: collect_direct_rules(host_root),
        static_routes: collect_static_routes(host_root),
        ip_routes: run_lines(executor, &["ip", "route", "show"]),
        ip_rules: run_lines(executor, &["ip", "rule", "show"]),
        resolv_provenance: detect_resolv_provenance(host_root),
        hosts_additions: collect_hosts_additions(host_root),
        proxy: collect_proxy(host_root),
    }
}

fn run_lines(executor: &dyn Executor, argv: &[&str]) -> Vec<String> {
    let output = executor.run(argv, None);
    if !output.success() {
        return Vec::new();
    }
    output.stdout_lines()
}

fn collect_connections(host_root: &Utf8Path, warnings: &mut Vec<Warning>) -> Vec<NetworkConnection> {
    let dir = host_root.join("etc/NetworkManager/system-connections");
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("nmconnection") {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let ini = match tini::Ini::from_string(&content) {
            Ok(ini) => ini,
            Err(_) => {
                warnings.push(Warning {
                    source: "network".to_owned(),
                    message: format!("could not parse {}", path.display()),
                    severity: Severity::Info,
                });
                continue;
            }
        };
        let name: String = ini
            .get("connection", "id")
            .unwrap_or_else(|| path.file_stem().unwrap().to_string_lossy().into_owned());
        let conn_type: String = ini.get("connection", "type").unwrap_or_default();
        let ipv4_method: Option<String> = ini.get("ipv4", "method");
        let method = match ipv4_method.as_deref() {
            Some("manual") => ConnectionMethod::Static,
            Some("auto") | None => ConnectionMethod::Dhcp,
            Some(_) => ConnectionMethod::Other,
        };
        let rel = format!(
            "/etc/NetworkManager/system-connections/{}",
            path.file_name().unwrap().to_string_lossy()
        );
        out.push(NetworkConnection {
            path: rel.into(),
            name,
            method,
            conn_type,
            content,
        });
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}

fn collect_firewall_zones(host_root: &Utf8Path, warnings: &mut Vec<Warning>) -> Vec<FirewallZone> {
    let dir = host_root.join("etc/firewalld/zones");
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("xml") {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let name = path.file_stem().unwrap().to_string_lossy().into_owned();
        let (services, ports, rich_rules) = match parse_zone_xml(&content) {
            Ok(parsed) => parsed,
            Err(e) => {
                warnings.push(Warning {
                    source: "network".to_owned(),
                    message: format!("failed to parse firewalld zone {name}: {e}"),
                    severity: Severity::Warning,
                });
                (Vec::new(), Vec::new(), Vec::new())
            }
        };
        out.push(FirewallZone {
            name: name.clone(),
            path: format!("/etc/firewalld/zones/{name}.xml").into(),
            content,
            services,
            ports,
            rich_rules,
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    out
}

fn parse_zone_xml(content: &str) -> Result<(Vec<String>, Vec<String>, Vec<String>), quick_xml::Error> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);
    let mut services = Vec::new();
    let mut ports = Vec::new();
    let mut rich_rules = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Empty(e) | Event::Start(e) => {
                let tag = e.name();
                match tag.as_ref() {
                    b"service" => {
                        if let Some(name) = attr(&e, b"name") {
                            services.push(name);
                        }
                    }
                    b"port" => {
                        let port = attr(&e, b"port");
                        let proto = attr(&e, b"protocol");
                        if let (Some(port), Some(proto)) = (port, proto) {
                            ports.push(format!("{port}/{proto}"));
                        }
                    }
                    b"rule" => {
                        // collected via Text events below for nested rule XML
                    }
                    _ => {}
                }
            }
            Event::Text(_) => {}
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    // `rule` elements in firewalld zone XML can nest further elements, so we
    // take a second, simpler pass that re-extracts each top-level `<rule ...>
    // ... </rule>` block verbatim rather than trying to reconstruct it from
    // parser events.
    rich_rules.extend(extract_rule_blocks(content));
    Ok((services, ports, rich_rules))
}

fn attr(e: &quick_xml::events::BytesStart, key: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == key {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

fn extract_rule_blocks(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("<rule") {
        let tail = &rest[start..];
        if let Some(end) = tail.find("</rule>") {
            out.push(tail[..end + "</rule>".len()].to_owned());
            rest = &tail[end + "</rule>".len()..];
        } else if let Some(end) = tail.find("/>") {
            out.push(tail[..end + 2].to_owned());
            rest = &tail[end + 2..];
        } else {
            break;
        }
    }
    out
}

fn collect_direct_rules(host_root: &Utf8Path) -> Vec<FirewallDirectRule> {
    let path = host_root.join("etc/firewalld/direct.xml");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut reader = Reader::from_str(&content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        let event = match reader.read_event_into(&mut buf) {
            Ok(e) => e,
            Err(_) => break,
        };
        match event {
            Event::Start(e) if e.name().as_ref() == b"rule" => {
                let priority = attr(&e, b"priority").unwrap_or_else(|| "0".to_owned());
                let table = attr(&e, b"table").unwrap_or_else(|| "filter".to_owned());
                let ipv = attr(&e, b"ipv").unwrap_or_else(|| "ipv4".to_owned());
                let chain = attr(&e, b"chain").unwrap_or_else(|| "INPUT".to_owned());
                let args = match reader.read_event_into(&mut buf) {
                    Ok(Event::Text(t)) => t.unescape().unwrap_or_default().into_owned(),
                    _ => String::new(),
                };
                out.push(FirewallDirectRule {
                    priority,
                    table,
                    ipv,
                    chain,
                    args,
                });
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    out
}

fn collect_static_routes(host_root: &Utf8Path) -> Vec<String> {
    let dir = host_root.join("etc/sysconfig/network-scripts");
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with("route-") {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        for line in content.lines() {
            let line = line.trim();
            if !line.is_empty() && !line.starts_with('#') {
                out.push(line.to_owned());
            }
        }
    }
    out
}

fn detect_resolv_provenance(host_root: &Utf8Path) -> Option<ResolvProvenance> {
    let path = host_root.join("etc/resolv.conf");
    let content = std::fs::read_to_string(&path).ok()?;
    if content.contains("Generated by NetworkManager") {
        Some(ResolvProvenance::NetworkManager)
    } else if content.contains("systemd-resolved") {
        Some(ResolvProvenance::SystemdResolved)
    } else if content.lines().any(|l| l.trim_start().starts_with("nameserver")) {
        Some(ResolvProvenance::Static)
    } else {
        Some(ResolvProvenance::Unknown)
    }
}

fn collect_hosts_additions(host_root: &Utf8Path) -> Vec<String> {
    const DEFAULT_NAMES: &[&str] = &["localhost", "localhost.localdomain", "localhost4", "localhost6"];
    let path = host_root.join("etc/hosts");
    let Ok(content) = std::fs::read_to_string(&path) else {
        return Vec::new();
    };
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter(|l| !DEFAULT_NAMES.iter().any(|n| l.contains(n)))
        .map(|l| l.to_owned())
        .collect()
}

fn collect_proxy(host_root: &Utf8Path) -> Vec<ProxySetting> {
    let mut out = Vec::new();
    for (path, source) in [
        ("etc/environment", "/etc/environment"),
        ("etc/sysconfig/network", "/etc/sysconfig/network"),
    ] {
        let Ok(content) = std::fs::read_to_string(host_root.join(path)) else {
            continue;
        };
        for line in content.lines() {
            let line = line.trim();
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key_upper = key.trim().to_uppercase();
            if key_upper.ends_with("_PROXY") {
                out.push(ProxySetting {
                    key: key.trim().to_owned(),
                    value: value.trim().trim_matches('"').to_owned(),
                    source: source.to_owned(),
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FakeExecutor;

    #[test]
    fn parses_zone_services_and_ports() {
        let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<zone>
  <short>Public</short>
  <service name="ssh"/>
  <port port="8080" protocol="tcp"/>
</zone>"#;
        let (services, ports, _) = parse_zone_xml(xml).unwrap();
        assert_eq!(services, vec!["ssh".to_owned()]);
        assert_eq!(ports, vec!["8080/tcp".to_owned()]);
    }

    #[test]
    fn resolv_provenance_detects_networkmanager() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("etc")).unwrap();
        std::fs::write(
            root.join("etc/resolv.conf"),
            "# Generated by NetworkManager\nnameserver 1.1.1.1\n",
        )
        .unwrap();
        assert_eq!(detect_resolv_provenance(root), Some(ResolvProvenance::NetworkManager));
    }

    #[test]
    fn hosts_additions_filters_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir_all(root.join("etc")).unwrap();
        std::fs::write(
            root.join("etc/hosts"),
            "127.0.0.1 localhost\n10.0.0.5 myapp.internal\n",
        )
        .unwrap();
        let additions = collect_hosts_additions(root);
        assert_eq!(additions, vec!["10.0.0.5 myapp.internal".to_owned()]);
    }

    #[test]
    fn empty_network_section_when_nothing_present() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let exec = FakeExecutor::always_missing();
        let mut warnings = Vec::new();
        let section = run(root, &exec, &mut warnings);
        assert!(section.connections.is_empty());
        assert!(section.ip_routes.is_empty());
    }
}
