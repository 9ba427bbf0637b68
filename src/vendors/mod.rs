// src/vendors/mod.rs

pub mod rules;

use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::extract::rows::RowFormat;
use crate::layout::LayoutMap;
use rules::{LineBlockSpec, RuleSpec, VendorRules};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VendorSpec {
    key: String,
    name: String,
    #[serde(default)]
    markers: Vec<String>,
    template: PathBuf,
    layout: PathBuf,
    #[serde(default)]
    row_format: RowFormat,
    #[serde(default)]
    line_items: LineBlockSpec,
    #[serde(default)]
    rules: BTreeMap<String, RuleSpec>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default, rename = "vendor")]
    vendors: Vec<VendorSpec>,
}

/// Everything known about one supported vendor, compiled at load time.
#[derive(Debug, Clone)]
pub struct VendorProfile {
    pub key: String,
    pub name: String,
    /// Lowercased detection markers.
    pub markers: Vec<String>,
    pub template: PathBuf,
    pub layout_path: PathBuf,
    pub layout: LayoutMap,
    pub rules: VendorRules,
}

impl VendorProfile {
    fn matches(&self, lowered_text: &str) -> bool {
        self.markers.iter().any(|m| lowered_text.contains(m.as_str()))
    }
}

/// Supported vendors keyed by vendor key. Loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct VendorRegistry {
    profiles: BTreeMap<String, VendorProfile>,
}

impl VendorRegistry {
    /// Parse the registry file, compile every rule and load every layout.
    /// All problems are reported together as `VendorConfigInvalid`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let file: RegistryFile = toml::from_str(&content)
            .map_err(|e| Error::VendorConfigInvalid(vec![format!("{}: {e}", path.display())]))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut problems = Vec::new();
        let mut profiles = BTreeMap::new();
        let mut seen = BTreeSet::new();

        for spec in file.vendors {
            let key = spec.key.trim().to_string();
            if key.is_empty() || key != normalize_vendor_key(&key) {
                problems.push(format!(
                    "vendor '{}': key must look like '{}'",
                    spec.key,
                    normalize_vendor_key(&spec.key)
                ));
                continue;
            }
            if !seen.insert(key.clone()) {
                problems.push(format!("vendor '{key}': duplicate key"));
                continue;
            }
            let before = problems.len();
            let profile = compile_profile(&key, spec, base, &mut problems);
            match profile {
                Some(p) if problems.len() == before => {
                    debug!(vendor = %key, markers = p.markers.len(), "Vendor profile compiled");
                    profiles.insert(key, p);
                }
                _ => {}
            }
        }

        if !problems.is_empty() {
            return Err(Error::VendorConfigInvalid(problems));
        }

        info!(
            registry = %path.display(),
            vendors = profiles.len(),
            "Vendor registry loaded"
        );
        Ok(Self { profiles })
    }

    pub fn get(&self, key: &str) -> Result<&VendorProfile> {
        self.profiles
            .get(key)
            .ok_or_else(|| Error::VendorUnknown(key.to_string()))
    }

    /// Pick the vendor whose markers occur in `text` (case-insensitive).
    pub fn detect(&self, text: &str) -> Result<&VendorProfile> {
        let lowered = text.to_lowercase();
        let hits: Vec<&VendorProfile> = self
            .profiles
            .values()
            .filter(|p| p.matches(&lowered))
            .collect();

        match hits.as_slice() {
            [one] => {
                info!(vendor = %one.key, "Vendor detected");
                Ok(one)
            }
            [] => Err(Error::VendorUnknown(
                "no vendor marker found in text".to_string(),
            )),
            many => Err(Error::VendorAmbiguous(
                many.iter().map(|p| p.key.clone()).collect(),
            )),
        }
    }

    /// Resolve a vendor from a display name such as a record's
    /// `vendor_name`: by normalized key, then by normalized display name,
    /// then by an OCR-tolerant fuzzy match against the keys.
    pub fn find_by_name(&self, name: &str) -> Result<&VendorProfile> {
        if name.trim().is_empty() {
            return Err(Error::VendorUnknown("record has no vendor".to_string()));
        }
        let wanted = normalize_vendor_key(name);
        if let Some(profile) = self.profiles.get(&wanted) {
            return Ok(profile);
        }
        if let Some(profile) = self
            .profiles
            .values()
            .find(|p| normalize_vendor_key(&p.name) == wanted)
        {
            return Ok(profile);
        }

        let hits: Vec<&VendorProfile> = self
            .profiles
            .values()
            .filter(|p| fuzzy_match(&wanted, &p.key))
            .collect();
        match hits.as_slice() {
            [one] => {
                info!(name = %name, vendor = %one.key, "Vendor matched by similar name");
                Ok(one)
            }
            [] => Err(Error::VendorUnknown(name.to_string())),
            many => Err(Error::VendorAmbiguous(
                many.iter().map(|p| p.key.clone()).collect(),
            )),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn from_profiles(profiles: impl IntoIterator<Item = VendorProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.key.clone(), p)).collect(),
        }
    }
}

fn compile_profile(
    key: &str,
    spec: VendorSpec,
    base: &Path,
    problems: &mut Vec<String>,
) -> Option<VendorProfile> {
    let markers: Vec<String> = spec
        .markers
        .iter()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect();
    if markers.is_empty() {
        problems.push(format!("vendor '{key}': no detection markers"));
    }

    let template = base.join(&spec.template);
    if !template.is_file() {
        problems.push(format!(
            "vendor '{key}': template {} not found",
            template.display()
        ));
    }

    let layout_path = base.join(&spec.layout);
    let layout = LayoutMap::load(&layout_path)
        .map_err(|e| problems.extend(e.into_iter().map(|p| format!("vendor '{key}': {p}"))))
        .ok();

    let rules = VendorRules::compile(&spec.rules, spec.row_format, &spec.line_items)
        .map_err(|e| problems.extend(e.into_iter().map(|p| format!("vendor '{key}': {p}"))))
        .ok();

    Some(VendorProfile {
        key: key.to_string(),
        name: spec.name.trim().to_string(),
        markers,
        template,
        layout_path,
        layout: layout?,
        rules: rules?,
    })
}

/// One key contains the other, or their character sets overlap by at least
/// 80% (Jaccard), which absorbs single misread characters.
fn fuzzy_match(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a.contains(b) || b.contains(a) {
        return true;
    }
    let sa: BTreeSet<char> = a.chars().collect();
    let sb: BTreeSet<char> = b.chars().collect();
    let shared = sa.intersection(&sb).count();
    let all = sa.union(&sb).count();
    shared as f64 / all as f64 >= 0.8
}

/// Turn a display name into a registry key: lowercase words joined by `_`.
pub fn normalize_vendor_key(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else if c.is_whitespace() || c == '_' || c == '-' {
                ' '
            } else {
                '\0'
            }
        })
        .filter(|c| *c != '\0')
        .collect();
    let key = cleaned.split_whitespace().collect::<Vec<_>>().join("_");
    if key.is_empty() {
        "unknown_vendor".to_string()
    } else {
        key
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn profile(key: &str, name: &str, marker: &str) -> VendorProfile {
        VendorProfile {
            key: key.to_string(),
            name: name.to_string(),
            markers: vec![marker.to_lowercase()],
            template: PathBuf::from(format!("{key}.pdf")),
            layout_path: PathBuf::from(format!("{key}.toml")),
            layout: LayoutMap::default(),
            rules: VendorRules::compile(
                &BTreeMap::new(),
                RowFormat::Trailing,
                &LineBlockSpec::default(),
            )
            .unwrap(),
        }
    }

    pub(crate) fn sap_profile() -> VendorProfile {
        let mut p = profile("acme_associates", "Acme Associates", "Acme Associates");
        p.rules = VendorRules::compile(
            &BTreeMap::new(),
            RowFormat::SapB1,
            &LineBlockSpec {
                start: Some(r"(?i)Item\s*No.*Description".into()),
                end: None,
            },
        )
        .unwrap();
        p
    }

    const LAYOUT: &str = "[fields.po_number]\nx = 400\ny = 700\n";

    fn write_fixture(dir: &Path, registry: &str) -> PathBuf {
        fs::create_dir_all(dir.join("layouts")).unwrap();
        fs::create_dir_all(dir.join("templates")).unwrap();
        fs::write(dir.join("layouts/acme.toml"), LAYOUT).unwrap();
        fs::write(dir.join("layouts/globex.toml"), LAYOUT).unwrap();
        fs::write(dir.join("templates/acme.pdf"), b"%PDF-1.5\n").unwrap();
        fs::write(dir.join("templates/globex.pdf"), b"%PDF-1.5\n").unwrap();
        let path = dir.join("vendors.toml");
        fs::write(&path, registry).unwrap();
        path
    }

    const REGISTRY: &str = r#"
        [[vendor]]
        key = "acme_associates"
        name = "Acme Associates"
        markers = ["ACME ASSOCIATES", "acme-assoc.com"]
        template = "templates/acme.pdf"
        layout = "layouts/acme.toml"

        [vendor.rules.notes]
        label = "Remarks"

        [[vendor]]
        key = "globex"
        name = "Globex Corporation"
        markers = ["Globex"]
        template = "templates/globex.pdf"
        layout = "layouts/globex.toml"
        row_format = "sap_b1"

        [vendor.line_items]
        start = "(?i)item\\s*no"
    "#;

    #[test]
    fn test_load_registry() {
        let dir = tempfile::tempdir().unwrap();
        let reg = VendorRegistry::load(write_fixture(dir.path(), REGISTRY)).unwrap();
        assert_eq!(reg.keys().collect::<Vec<_>>(), vec!["acme_associates", "globex"]);

        let globex = reg.get("globex").unwrap();
        assert_eq!(globex.rules.row_format, RowFormat::SapB1);
        assert!(globex.rules.block.start.is_some());
        assert_eq!(globex.template, dir.path().join("templates/globex.pdf"));
        assert!(matches!(reg.get("initech"), Err(Error::VendorUnknown(_))));
    }

    #[test]
    fn test_detect_unique_ambiguous_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let reg = VendorRegistry::load(write_fixture(dir.path(), REGISTRY)).unwrap();

        let hit = reg.detect("PO#: 10234\nacme associates\nWidget").unwrap();
        assert_eq!(hit.key, "acme_associates");
        let hit = reg.detect("orders@ACME-ASSOC.COM").unwrap();
        assert_eq!(hit.key, "acme_associates");

        match reg.detect("Acme Associates c/o GLOBEX") {
            Err(Error::VendorAmbiguous(keys)) => assert_eq!(keys, vec!["acme_associates", "globex"]),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(reg.detect("Initech"), Err(Error::VendorUnknown(_))));
    }

    #[test]
    fn test_invalid_registry_reports_everything() {
        let dir = tempfile::tempdir().unwrap();
        let registry = r#"
            [[vendor]]
            key = "acme_associates"
            name = "Acme"
            markers = ["ACME"]
            template = "templates/missing.pdf"
            layout = "layouts/acme.toml"

            [vendor.rules.total]
            pattern = "(unclosed"

            [[vendor]]
            key = "acme_associates"
            name = "Acme again"
            markers = ["ACME"]
            template = "templates/acme.pdf"
            layout = "layouts/acme.toml"

            [[vendor]]
            key = "globex"
            name = "Globex"
            template = "templates/globex.pdf"
            layout = "layouts/nowhere.toml"
        "#;
        let err = VendorRegistry::load(write_fixture(dir.path(), registry)).unwrap_err();
        let Error::VendorConfigInvalid(problems) = err else {
            panic!("unexpected error: {err}");
        };
        // missing template, bad pattern, duplicate key, no markers, missing layout
        assert_eq!(problems.len(), 5, "{problems:#?}");
        assert!(problems.iter().any(|p| p.contains("duplicate key")));
        assert!(problems.iter().any(|p| p.contains("missing.pdf")));
    }

    #[test]
    fn test_unparseable_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_fixture(dir.path(), "[[vendor]]\nkey = 3\n");
        assert!(matches!(
            VendorRegistry::load(path),
            Err(Error::VendorConfigInvalid(_))
        ));
    }

    #[test]
    fn test_normalize_vendor_key() {
        assert_eq!(normalize_vendor_key("Acme Associates"), "acme_associates");
        assert_eq!(normalize_vendor_key("  J.B. Hi-Fi  "), "jb_hi_fi");
        assert_eq!(normalize_vendor_key("O'Neil & Sons"), "oneil_sons");
        assert_eq!(normalize_vendor_key("!!!"), "unknown_vendor");
        assert_eq!(normalize_vendor_key(""), "unknown_vendor");
    }

    #[test]
    fn test_find_by_name() {
        let reg = VendorRegistry::from_profiles([
            profile("acme", "Acme Associates", "ACME ASSOCIATES"),
            profile("globex", "Globex Corporation", "Globex"),
        ]);

        assert_eq!(reg.find_by_name("globex").unwrap().key, "globex");
        assert_eq!(reg.find_by_name("Acme Associates").unwrap().key, "acme");
        assert_eq!(reg.find_by_name("GLOBEX CORPORATION").unwrap().key, "globex");
        // misread characters and extra words
        assert_eq!(reg.find_by_name("Acme Associatcs").unwrap().key, "acme");
        assert_eq!(reg.find_by_name("Globex Pty Ltd").unwrap().key, "globex");

        assert!(matches!(reg.find_by_name("Initech"), Err(Error::VendorUnknown(_))));
        assert!(matches!(reg.find_by_name("  "), Err(Error::VendorUnknown(_))));
    }

    #[test]
    fn test_fuzzy_match() {
        assert!(fuzzy_match("acme_associates", "acme"));
        assert!(fuzzy_match("acme_asociates", "acme_associates"));
        assert!(!fuzzy_match("initech", "globex"));
        assert!(!fuzzy_match("", "globex"));
    }
}
