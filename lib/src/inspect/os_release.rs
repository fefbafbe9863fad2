//! Parses `/etc/os-release`.

use camino::Utf8Path;

use crate::schema::OsRelease;

/// Read and parse `<host_root>/etc/os-release`. Returns `None` if the file
/// is missing or unparseable rather than a partial record, since every
/// downstream consumer (the baseline resolver above all) needs `id` and
/// `version_id` to do anything useful.
pub fn read(host_root: &Utf8Path) -> Option<OsRelease> {
    let path = host_root.join("etc/os-release");
    let contents = std::fs::read_to_string(&path).ok()?;
    let fields = parse(&contents);
    let id = fields.get("ID").cloned().unwrap_or_default();
    let version_id = fields.get("VERSION_ID").cloned().unwrap_or_default();
    if id.is_empty() {
        return None;
    }
    Some(OsRelease {
        id,
        version_id,
        pretty_name: fields.get("PRETTY_NAME").cloned().unwrap_or_default(),
        fields,
    })
}

fn parse(contents: &str) -> std::collections::BTreeMap<String, String> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (key, value) = line.split_once('=')?;
            let value = value.trim().trim_matches('"').to_owned();
            Some((key.trim().to_owned(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        std::fs::create_dir(root.join("etc")).unwrap();
        std::fs::write(
            root.join("etc/os-release"),
            "ID=\"centos\"\nVERSION_ID=\"9\"\nPRETTY_NAME=\"CentOS Stream 9\"\n",
        )
        .unwrap();
        let parsed = read(root).unwrap();
        assert_eq!(parsed.id, "centos");
        assert_eq!(parsed.version_id, "9");
        assert_eq!(parsed.pretty_name, "CentOS Stream 9");
    }

    #[test]
    fn missing_file_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        assert!(read(root).is_none());
    }
}
